//! Handler modules.
//!
//! A handler module maps HTTP methods to handler functions. Two sources
//! produce the same shape:
//!
//! | Mode | Source | Hot reload |
//! |------|--------|------------|
//! | Development | `.rhai` script files ([`script`]) | yes, per file |
//! | Production | native closures via [`ModuleBuilder`] | no |
//!
//! Either way a handler receives an [`Interaction`] and produces a
//! [`ReturnValue`], which the dispatcher normalizes into the final response.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::http::Method;

pub mod interaction;
pub mod script;
pub mod value;

pub use interaction::{Interaction, PendingResponse, ResponseBuilder, Tools};
pub use script::{ScriptEngine, ScriptError};
pub use value::{Representation, ResponseBody, ResponseValue, ReturnValue};

/// A boxed async handler function.
///
/// Cloning is cheap (an `Arc` bump), which is what lets the registry hand the
/// same handler to many in-flight requests.
pub type HandlerFn = Arc<
    dyn Fn(Interaction) -> Pin<Box<dyn Future<Output = Result<ReturnValue, HandlerError>> + Send>>
        + Send
        + Sync,
>;

/// Errors a handler invocation can produce. All of them surface as a 500 with
/// the error text in the body — a development server shows its failures.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A script handler faulted at evaluation time.
    #[error("script evaluation failed: {0}")]
    Script(#[from] Box<rhai::EvalAltResult>),
    /// The handler returned a value the response model cannot interpret.
    #[error("handler returned an unusable value: {0}")]
    Shape(String),
    /// A native handler reported failure.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Shorthand for native handlers reporting failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Conversion into a [`HandlerFn`], letting plain async closures register
/// directly:
///
/// ```
/// use understudy::module::{HandlerModule, ReturnValue};
///
/// let module = HandlerModule::builder()
///     .get(|_interaction| async { Ok(ReturnValue::text("pong")) })
///     .build();
/// # assert_eq!(module.len(), 1);
/// ```
pub trait IntoHandler {
    fn into_handler(self) -> HandlerFn;
}

impl<F, Fut> IntoHandler for F
where
    F: Fn(Interaction) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ReturnValue, HandlerError>> + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |interaction| Box::pin(self(interaction)))
    }
}

impl IntoHandler for HandlerFn {
    fn into_handler(self) -> HandlerFn {
        self
    }
}

/// An immutable method → handler table.
///
/// Modules are always built in full before they are registered; the registry
/// swaps whole modules, never individual methods.
pub struct HandlerModule {
    handlers: HashMap<Method, HandlerFn>,
}

impl HandlerModule {
    pub(crate) fn from_handlers(handlers: HashMap<Method, HandlerFn>) -> Self {
        Self { handlers }
    }

    /// Starts a native (production-mode) module.
    pub fn builder() -> ModuleBuilder {
        ModuleBuilder::default()
    }

    /// The handler for `method`, if the module implements it.
    pub fn handler(&self, method: &Method) -> Option<HandlerFn> {
        self.handlers.get(method).map(Arc::clone)
    }

    /// The implemented methods, sorted for deterministic `Allow` headers.
    pub fn methods(&self) -> Vec<Method> {
        let mut methods: Vec<Method> = self.handlers.keys().cloned().collect();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods
    }

    /// The number of implemented methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` if the module implements no methods at all.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerModule")
            .field("methods", &self.methods())
            .finish()
    }
}

/// Builder for native handler modules.
///
/// # Examples
///
/// ```
/// use understudy::module::{HandlerModule, ReturnValue};
///
/// let module = HandlerModule::builder()
///     .get(|_interaction| async { Ok(ReturnValue::text("all good")) })
///     .delete(|_interaction| async { Ok(ReturnValue::text("gone")) })
///     .build();
///
/// assert_eq!(module.len(), 2);
/// ```
#[derive(Default)]
pub struct ModuleBuilder {
    handlers: HashMap<Method, HandlerFn>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an arbitrary method.
    pub fn method(mut self, method: Method, handler: impl IntoHandler) -> Self {
        self.handlers.insert(method, handler.into_handler());
        self
    }

    pub fn get(self, handler: impl IntoHandler) -> Self {
        self.method(Method::Get, handler)
    }

    pub fn post(self, handler: impl IntoHandler) -> Self {
        self.method(Method::Post, handler)
    }

    pub fn put(self, handler: impl IntoHandler) -> Self {
        self.method(Method::Put, handler)
    }

    pub fn delete(self, handler: impl IntoHandler) -> Self {
        self.method(Method::Delete, handler)
    }

    pub fn patch(self, handler: impl IntoHandler) -> Self {
        self.method(Method::Patch, handler)
    }

    pub fn head(self, handler: impl IntoHandler) -> Self {
        self.method(Method::Head, handler)
    }

    pub fn options(self, handler: impl IntoHandler) -> Self {
        self.method(Method::Options, handler)
    }

    pub fn build(self) -> Arc<HandlerModule> {
        Arc::new(HandlerModule::from_handlers(self.handlers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestRecord;

    fn invoke_fixture() -> Interaction {
        Interaction::from_request(&RequestRecord::new(Method::Get, "/ping"))
    }

    #[tokio::test]
    async fn builder_registers_and_invokes() {
        let module = HandlerModule::builder()
            .get(|_interaction| async { Ok(ReturnValue::text("pong")) })
            .build();

        let handler = module.handler(&Method::Get).unwrap();
        let value = handler(invoke_fixture()).await.unwrap();
        assert!(matches!(value, ReturnValue::Text(body) if body == "pong"));
        assert!(module.handler(&Method::Post).is_none());
    }

    #[test]
    fn methods_are_sorted_for_allow_headers() {
        let module = HandlerModule::builder()
            .put(|_interaction| async { Ok(ReturnValue::text("")) })
            .get(|_interaction| async { Ok(ReturnValue::text("")) })
            .delete(|_interaction| async { Ok(ReturnValue::text("")) })
            .build();

        let methods = module.methods();
        let names: Vec<&str> = methods.iter().map(|m| m.as_str()).collect();
        assert_eq!(names, vec!["DELETE", "GET", "PUT"]);
    }

    #[tokio::test]
    async fn native_handlers_can_fail() {
        let module = HandlerModule::builder()
            .get(|_interaction| async { Err(HandlerError::failed("backing store offline")) })
            .build();

        let handler = module.handler(&Method::Get).unwrap();
        let error = handler(invoke_fixture()).await.unwrap_err();
        assert_eq!(error.to_string(), "backing store offline");
    }
}
