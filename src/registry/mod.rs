//! The live module registry.
//!
//! Owns the [`RouteTrie`] behind an [`arc_swap`] snapshot. The filesystem
//! loader is the sole writer: every mutation clones the current trie, applies
//! the change, and publishes the result with one atomic pointer store. A
//! request being dispatched concurrently resolves against whichever complete
//! snapshot was current when it started — there is no lock to contend on and
//! no torn table to observe.
//!
//! Two lookups are exposed: [`handler`](Registry::handler) is pure routing,
//! [`endpoint`](Registry::endpoint) additionally binds the HTTP method and
//! coerces the captured path variables.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::{Map, Value};

use crate::http::Method;
use crate::module::{HandlerFn, HandlerModule};
use crate::openapi::ParameterTypes;
use crate::routing::{RouteError, RouteMatch, RouteTrie};

/// The outcome of binding a method to a resolved route.
#[derive(Debug)]
pub enum Endpoint {
    /// No route for the path.
    NotFound,
    /// The route exists but the module does not implement the method; `allow`
    /// lists what it does implement, sorted.
    MethodNotAllowed { route: String, allow: Vec<Method> },
    /// A handler ready to invoke.
    Bound(BoundEndpoint),
}

/// A resolved handler plus its coerced path variables.
pub struct BoundEndpoint {
    pub route: String,
    pub variables: Map<String, Value>,
    pub handler: HandlerFn,
}

impl std::fmt::Debug for BoundEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundEndpoint")
            .field("route", &self.route)
            .field("variables", &self.variables)
            .finish()
    }
}

/// The shared handler table.
///
/// # Examples
///
/// ```
/// use understudy::http::Method;
/// use understudy::module::{HandlerModule, ReturnValue};
/// use understudy::openapi::ParameterTypes;
/// use understudy::registry::{Endpoint, Registry};
///
/// let registry = Registry::new();
/// let module = HandlerModule::builder()
///     .get(|_interaction| async { Ok(ReturnValue::text("found")) })
///     .build();
/// registry.add("/widgets/{id}", module).unwrap();
///
/// let endpoint = registry.endpoint(&Method::Get, "/widgets/17", &ParameterTypes::default());
/// assert!(matches!(endpoint, Endpoint::Bound(_)));
///
/// let endpoint = registry.endpoint(&Method::Post, "/widgets/17", &ParameterTypes::default());
/// assert!(matches!(endpoint, Endpoint::MethodNotAllowed { .. }));
/// ```
#[derive(Debug, Default)]
pub struct Registry {
    routes: ArcSwap<RouteTrie>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module` under a route template, replacing any previous
    /// module at the same template.
    ///
    /// Returns `true` when a module was replaced.
    pub fn add(&self, url: &str, module: Arc<HandlerModule>) -> Result<bool, RouteError> {
        let mut routes: RouteTrie = self.routes.load().as_ref().clone();
        let replaced = routes.add(url, module)?;
        self.routes.store(Arc::new(routes));
        Ok(replaced)
    }

    /// Unregisters a route template.
    ///
    /// Returns `true` if a module was removed.
    pub fn remove(&self, url: &str) -> bool {
        let mut routes: RouteTrie = self.routes.load().as_ref().clone();
        let removed = routes.remove(url);
        if removed {
            self.routes.store(Arc::new(routes));
        }
        removed
    }

    /// Pure routing resolution, independent of method.
    pub fn handler(&self, path: &str) -> RouteMatch {
        self.routes.load().resolve(path)
    }

    /// Resolves the handler for `method` on `path`, coercing the captured
    /// path variables per `types`.
    pub fn endpoint(&self, method: &Method, path: &str, types: &ParameterTypes) -> Endpoint {
        let RouteMatch::Found(target) = self.handler(path) else {
            return Endpoint::NotFound;
        };
        let Some(handler) = target.module.handler(method) else {
            return Endpoint::MethodNotAllowed {
                route: target.route,
                allow: target.module.methods(),
            };
        };

        let mut variables = Map::new();
        for (name, raw) in &target.variables {
            variables.insert(name.clone(), types.coerce_path(name, raw));
        }
        Endpoint::Bound(BoundEndpoint {
            route: target.route,
            variables,
            handler,
        })
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ReturnValue;
    use crate::openapi::OpenApiDocument;
    use serde_json::json;

    fn module_with(methods: &[Method]) -> Arc<HandlerModule> {
        let mut builder = HandlerModule::builder();
        for method in methods {
            builder = builder.method(method.clone(), |_interaction: crate::module::Interaction| {
                async { Ok(ReturnValue::text("ok")) }
            });
        }
        builder.build()
    }

    #[test]
    fn endpoint_binds_and_coerces() {
        let registry = Registry::new();
        registry
            .add("/pets/{petId}", module_with(&[Method::Get]))
            .unwrap();

        let document = OpenApiDocument::parse(
            r#"
paths:
  /pets/{petId}:
    get:
      parameters:
        - name: petId
          in: path
          schema: { type: integer }
"#,
        )
        .unwrap();
        let types = document
            .operation("/pets/{petId}", &Method::Get)
            .unwrap()
            .parameter_types();

        let Endpoint::Bound(bound) = registry.endpoint(&Method::Get, "/pets/42", &types) else {
            panic!("expected a bound endpoint");
        };
        assert_eq!(bound.route, "/pets/{petId}");
        assert_eq!(bound.variables.get("petId"), Some(&json!(42)));
    }

    #[test]
    fn uncoerced_variables_stay_strings() {
        let registry = Registry::new();
        registry
            .add("/pets/{petId}", module_with(&[Method::Get]))
            .unwrap();

        let Endpoint::Bound(bound) =
            registry.endpoint(&Method::Get, "/pets/42", &ParameterTypes::default())
        else {
            panic!("expected a bound endpoint");
        };
        assert_eq!(bound.variables.get("petId"), Some(&json!("42")));
    }

    #[test]
    fn missing_method_reports_allow_sorted() {
        let registry = Registry::new();
        registry
            .add("/pets", module_with(&[Method::Put, Method::Get, Method::Delete]))
            .unwrap();

        let Endpoint::MethodNotAllowed { route, allow } =
            registry.endpoint(&Method::Post, "/pets", &ParameterTypes::default())
        else {
            panic!("expected method-not-allowed");
        };
        assert_eq!(route, "/pets");
        let names: Vec<&str> = allow.iter().map(|m| m.as_str()).collect();
        assert_eq!(names, vec!["DELETE", "GET", "PUT"]);
    }

    #[test]
    fn missing_route_is_not_found() {
        let registry = Registry::new();
        assert!(matches!(
            registry.endpoint(&Method::Get, "/ghost", &ParameterTypes::default()),
            Endpoint::NotFound
        ));
    }

    #[test]
    fn replacement_swaps_the_whole_module() {
        let registry = Registry::new();
        registry.add("/pets", module_with(&[Method::Get])).unwrap();
        assert!(registry
            .add("/pets", module_with(&[Method::Post]))
            .unwrap());

        // The old GET is gone; the table now answers only with POST.
        assert!(matches!(
            registry.endpoint(&Method::Get, "/pets", &ParameterTypes::default()),
            Endpoint::MethodNotAllowed { .. }
        ));
        assert!(matches!(
            registry.endpoint(&Method::Post, "/pets", &ParameterTypes::default()),
            Endpoint::Bound(_)
        ));
    }

    #[test]
    fn remove_then_resolve_misses() {
        let registry = Registry::new();
        registry
            .add("/items/{id}", module_with(&[Method::Get]))
            .unwrap();
        assert!(registry.handler("/items/42").is_found());

        assert!(registry.remove("/items/{id}"));
        assert!(!registry.handler("/items/42").is_found());
        assert!(matches!(
            registry.endpoint(&Method::Get, "/items/42", &ParameterTypes::default()),
            Endpoint::NotFound
        ));
    }
}
