//! Filesystem loading and hot reload.
//!
//! The loader maps a directory tree of `.rhai` files onto the registry and
//! context store:
//!
//! | File under the root   | Registration                          |
//! |-----------------------|---------------------------------------|
//! | `hello.rhai`          | handlers for `/hello`                 |
//! | `items/{id}.rhai`     | handlers for `/items/{id}`            |
//! | `items/_context.rhai` | shared context for handlers in `items`|
//!
//! [`load`](ModuleLoader::load) performs the initial scan;
//! [`watch`](ModuleLoader::watch) keeps the registry in sync with edits
//! afterwards. A file that fails to compile never disturbs what is already
//! registered: the error is reported and the previous module stays live.
//!
//! Every registration change is published on a broadcast channel as a
//! [`LoaderEvent`], which is how tests (and tooling) observe reloads without
//! polling.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::ContextStore;
use crate::module::{ScriptEngine, ScriptError};
use crate::registry::Registry;
use crate::routing::RouteError;

/// File extension for handler and context scripts.
pub const MODULE_EXTENSION: &str = "rhai";

/// File stem that marks a script as a directory context rather than a
/// handler module.
pub const CONTEXT_STEM: &str = "_context";

const EVENT_CAPACITY: usize = 64;

/// Errors that stop the loader itself, as opposed to one module.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("handler root `{0}` does not exist or is not a directory")]
    RootMissing(PathBuf),
    #[error("failed to scan `{path}`: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to watch the handler root: {0}")]
    Watch(#[from] notify::Error),
}

/// Errors confined to a single file. The rest of the tree is unaffected.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("failed to register route: {0}")]
    Route(#[from] RouteError),
    #[error("`{0}` is not a module path under the handler root")]
    NotAModule(PathBuf),
}

/// What a path under the handler root means.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ModulePath {
    /// A handler script serving `url`.
    Handler { url: String },
    /// A `_context` script for `directory`.
    Context { directory: String },
}

impl ModulePath {
    fn url(&self) -> &str {
        match self {
            Self::Handler { url } => url,
            Self::Context { directory } => directory,
        }
    }
}

/// A registration change, published on the loader's broadcast channel.
#[derive(Debug, Clone)]
pub struct LoaderEvent {
    pub kind: LoaderEventKind,
    /// The route template (or context directory) the file maps to.
    pub url: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderEventKind {
    /// First registration of the url.
    Added,
    /// An existing registration was replaced.
    Changed,
    /// The registration was removed.
    Removed,
    /// The file failed to load; the previous registration, if any, is kept.
    Failed,
}

/// Classifies `path` relative to the handler root.
///
/// Returns `None` for paths outside the root and for files without the
/// module extension.
fn classify(root: &Path, path: &Path) -> Option<ModulePath> {
    let relative = path.strip_prefix(root).ok()?;
    if relative.extension().and_then(|e| e.to_str()) != Some(MODULE_EXTENSION) {
        return None;
    }
    let stem = relative.file_stem()?.to_str()?.to_owned();

    let mut segments: Vec<String> = Vec::new();
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            let Component::Normal(segment) = component else {
                return None;
            };
            segments.push(segment.to_str()?.to_owned());
        }
    }

    if stem == CONTEXT_STEM {
        let directory = format!("/{}", segments.join("/"));
        Some(ModulePath::Context { directory })
    } else {
        segments.push(stem);
        Some(ModulePath::Handler {
            url: format!("/{}", segments.join("/")),
        })
    }
}

/// Scans and reloads handler scripts, keeping the registry and the context
/// store in step with the filesystem.
///
/// Cloning a loader is cheap; clones share the registry, the context store,
/// the script engine, and the event channel.
#[derive(Clone)]
pub struct ModuleLoader {
    root: PathBuf,
    registry: Arc<Registry>,
    contexts: Arc<ContextStore>,
    engine: ScriptEngine,
    events: broadcast::Sender<LoaderEvent>,
}

impl ModuleLoader {
    pub fn new(root: impl Into<PathBuf>, registry: Arc<Registry>, contexts: Arc<ContextStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            root: root.into(),
            registry,
            contexts,
            engine: ScriptEngine::new(),
            events,
        }
    }

    /// The handler root this loader scans.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subscribes to registration changes.
    ///
    /// The channel is lossy under sustained pressure ([`broadcast`]
    /// semantics); subscribers that fall behind see a `Lagged` error rather
    /// than blocking the loader.
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    /// Walks the handler root and loads every module script found.
    ///
    /// A missing root is fatal. Individual files that fail to compile are
    /// reported and skipped so one bad script cannot take down the rest of
    /// the tree.
    pub fn load(&self) -> Result<(), LoaderError> {
        if !self.root.is_dir() {
            return Err(LoaderError::RootMissing(self.root.clone()));
        }

        let mut loaded = 0usize;
        let mut failed = 0usize;
        let mut pending = vec![self.root.clone()];
        while let Some(directory) = pending.pop() {
            let entries = std::fs::read_dir(&directory).map_err(|source| LoaderError::Scan {
                path: directory.clone(),
                source,
            })?;
            for entry in entries {
                let entry = entry.map_err(|source| LoaderError::Scan {
                    path: directory.clone(),
                    source,
                })?;
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if classify(&self.root, &path).is_some() {
                    match self.reload(&path) {
                        Ok(()) => loaded += 1,
                        Err(error) => {
                            warn!(path = %path.display(), %error, "skipping module");
                            failed += 1;
                        }
                    }
                }
            }
        }

        info!(
            root = %self.root.display(),
            loaded,
            failed,
            "handler tree scanned"
        );
        Ok(())
    }

    /// Loads or replaces the module backing `path`.
    ///
    /// On failure the previous registration is left untouched and a
    /// [`LoaderEventKind::Failed`] event is published.
    pub fn reload(&self, path: &Path) -> Result<(), ReloadError> {
        let Some(module_path) = classify(&self.root, path) else {
            return Err(ReloadError::NotAModule(path.to_path_buf()));
        };

        match self.apply(path, &module_path) {
            Ok(replaced) => {
                let kind = if replaced {
                    LoaderEventKind::Changed
                } else {
                    LoaderEventKind::Added
                };
                debug!(url = module_path.url(), ?kind, "module loaded");
                self.publish(kind, &module_path, path);
                Ok(())
            }
            Err(error) => {
                self.publish(LoaderEventKind::Failed, &module_path, path);
                Err(error)
            }
        }
    }

    fn apply(&self, path: &Path, module_path: &ModulePath) -> Result<bool, ReloadError> {
        let source = std::fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match module_path {
            ModulePath::Handler { url } => {
                let module = self.engine.compile_module(path, &source)?;
                Ok(self.registry.add(url, module)?)
            }
            ModulePath::Context { directory } => {
                let value = self.engine.evaluate_context(path, &source)?;
                Ok(self.contexts.add(directory, value))
            }
        }
    }

    /// Drops the registration backing `path`, if any.
    ///
    /// Returns `true` when something was actually removed.
    pub fn unload(&self, path: &Path) -> bool {
        let Some(module_path) = classify(&self.root, path) else {
            return false;
        };
        let removed = match &module_path {
            ModulePath::Handler { url } => self.registry.remove(url),
            ModulePath::Context { directory } => self.contexts.remove(directory),
        };
        if removed {
            debug!(url = module_path.url(), "module unloaded");
            self.publish(LoaderEventKind::Removed, &module_path, path);
        }
        removed
    }

    fn publish(&self, kind: LoaderEventKind, module_path: &ModulePath, path: &Path) {
        // A send error only means nobody is subscribed right now.
        let _ = self.events.send(LoaderEvent {
            kind,
            url: module_path.url().to_owned(),
            path: path.to_path_buf(),
        });
    }

    /// Starts watching the handler root for edits.
    ///
    /// Runs until the returned [`WatchHandle`] is dropped. Must be called
    /// from within a Tokio runtime: filesystem notifications are bridged
    /// onto a spawned task that replays them through
    /// [`reload`](Self::reload) and [`unload`](Self::unload).
    pub fn watch(&self) -> Result<WatchHandle, LoaderError> {
        if !self.root.is_dir() {
            return Err(LoaderError::RootMissing(self.root.clone()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |outcome: Result<notify::Event, notify::Error>| {
                let _ = tx.send(outcome);
            },
            Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        let loader = self.clone();
        let task = tokio::spawn(async move {
            while let Some(outcome) = rx.recv().await {
                let event = match outcome {
                    Ok(event) => event,
                    Err(error) => {
                        warn!(%error, "filesystem watch error");
                        continue;
                    }
                };
                if !(event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove()) {
                    continue;
                }
                for path in &event.paths {
                    if path.extension().and_then(|e| e.to_str()) != Some(MODULE_EXTENSION) {
                        continue;
                    }
                    if event.kind.is_remove() || !path.exists() {
                        loader.unload(path);
                    } else if path.is_file() {
                        if let Err(error) = loader.reload(path) {
                            warn!(path = %path.display(), %error, "reload failed");
                        }
                    }
                }
            }
        });

        info!(root = %self.root.display(), "watching for handler edits");
        Ok(WatchHandle {
            _watcher: watcher,
            task,
        })
    }
}

/// Keeps the filesystem watch alive; dropping it stops the watch.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Stops watching. Equivalent to dropping the handle.
    pub fn stop(self) {}
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
