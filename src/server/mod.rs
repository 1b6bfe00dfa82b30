//! The assembled mock server.
//!
//! [`MockServer`] wires the loader, registry, context store, and dispatcher
//! together behind one facade: point it at a handler directory, then feed it
//! requests. It deliberately owns no sockets — the embedding transport (an
//! HTTP framework route, a test harness, an editor extension) converts the
//! wire into [`RequestRecord`]s and writes the returned [`ResponseRecord`]s
//! back out.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::context::ContextStore;
use crate::dispatch::Dispatcher;
use crate::http::{RequestRecord, ResponseRecord};
use crate::loader::{LoaderError, LoaderEvent, ModuleLoader, WatchHandle};
use crate::openapi::OpenApiDocument;
use crate::registry::Registry;

/// What to load and how to behave.
///
/// # Examples
///
/// ```
/// use understudy::server::ServerConfig;
///
/// let config = ServerConfig::new("./handlers")
///     .with_openapi_document("./openapi.yaml")
///     .with_watch(true);
/// # let _ = config;
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory whose `.rhai` files become routes.
    pub handler_root: PathBuf,
    /// Optional OpenAPI document supplying parameter types and declared
    /// response shapes.
    pub openapi_document: Option<PathBuf>,
    /// Context value registered at `/` before the scan, visible to every
    /// handler unless a closer `_context` file shadows it.
    pub base_context: Option<Value>,
    /// Keep the registry in sync with filesystem edits.
    pub watch: bool,
}

impl ServerConfig {
    pub fn new(handler_root: impl Into<PathBuf>) -> Self {
        Self {
            handler_root: handler_root.into(),
            openapi_document: None,
            base_context: None,
            watch: false,
        }
    }

    pub fn with_openapi_document(mut self, path: impl Into<PathBuf>) -> Self {
        self.openapi_document = Some(path.into());
        self
    }

    pub fn with_base_context(mut self, context: Value) -> Self {
        self.base_context = Some(context);
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }
}

/// A loaded handler tree, ready to serve requests.
///
/// # Examples
///
/// ```rust,no_run
/// use understudy::http::{Method, RequestRecord};
/// use understudy::server::{MockServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = MockServer::start(ServerConfig::new("./handlers"))?;
///     let response = server
///         .dispatch(RequestRecord::new(Method::Get, "/hello"))
///         .await;
///     println!("{} {}", response.status, response.body);
///     Ok(())
/// }
/// ```
pub struct MockServer {
    registry: Arc<Registry>,
    contexts: Arc<ContextStore>,
    dispatcher: Dispatcher,
    loader: ModuleLoader,
    watch: Option<WatchHandle>,
}

impl MockServer {
    /// Loads the handler tree and, when configured, starts watching it.
    ///
    /// A missing handler root is the only fatal condition. An unreadable or
    /// invalid OpenAPI document is reported and ignored, and individual
    /// broken scripts are skipped, so a half-written tree still serves what
    /// it can. Must be called from within a Tokio runtime when `watch` is
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::RootMissing`] when the handler root does not
    /// exist, and [`LoaderError::Watch`] when the filesystem watch cannot be
    /// established.
    pub fn start(config: ServerConfig) -> Result<Self, LoaderError> {
        let registry = Arc::new(Registry::new());
        let contexts = Arc::new(ContextStore::new());

        let document = match &config.openapi_document {
            Some(path) => match OpenApiDocument::load(path) {
                Ok(document) => {
                    info!(path = %path.display(), operations = document.len(), "OpenAPI document loaded");
                    document
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "ignoring unusable OpenAPI document");
                    OpenApiDocument::default()
                }
            },
            None => OpenApiDocument::default(),
        };

        if let Some(base) = config.base_context {
            contexts.add("/", base);
        }

        let loader = ModuleLoader::new(
            &config.handler_root,
            Arc::clone(&registry),
            Arc::clone(&contexts),
        );
        loader.load()?;
        let watch = if config.watch {
            Some(loader.watch()?)
        } else {
            None
        };

        let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&contexts), document);
        Ok(Self {
            registry,
            contexts,
            dispatcher,
            loader,
            watch,
        })
    }

    /// Serves one request. Never fails; errors become responses.
    pub async fn dispatch(&self, request: RequestRecord) -> ResponseRecord {
        self.dispatcher.dispatch(request).await
    }

    /// Subscribes to registration changes (loads, reloads, removals).
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.loader.subscribe()
    }

    /// The loader, for explicit [`reload`](ModuleLoader::reload) /
    /// [`unload`](ModuleLoader::unload) calls from tooling.
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// The live route table.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The shared context store.
    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// `true` while filesystem edits are being applied automatically.
    pub fn is_watching(&self) -> bool {
        self.watch.is_some()
    }

    /// Stops applying filesystem edits; already-loaded modules keep serving.
    pub fn stop_watching(&mut self) {
        if self.watch.take().is_some() {
            info!("stopped watching the handler root");
        }
    }
}
