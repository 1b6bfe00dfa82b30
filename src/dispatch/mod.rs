//! The request pipeline.
//!
//! [`Dispatcher::dispatch`] turns one [`RequestRecord`] into one
//! [`ResponseRecord`]:
//!
//! 1. resolve the path against the registry — miss is `404 Not found.`;
//! 2. look up the operation the document declares for the matched template;
//! 3. bind the method — a route without it is `405` with an `Allow` header;
//! 4. build the [`Interaction`] (coerced variables, nearest context,
//!    declared response shapes, proxy capability) and invoke the handler —
//!    a handler error is `500`;
//! 5. forward proxy directives upstream — an unreachable upstream is `502`;
//! 6. negotiate the representation against the `Accept` header — no
//!    acceptable one is `406` carrying the parsed preference list as JSON.
//!
//! The final response's content type is checked against the preferences once
//! more before it leaves, so a handler that fixes an unacceptable type still
//! produces a `406` rather than a surprise body.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::context::ContextStore;
use crate::http::{Headers, RequestRecord, ResponseRecord, StatusCode};
use crate::media::{MediaRange, accept_allows, preferred_media_types};
use crate::module::{
    Interaction, Representation, ResponseBody, ResponseBuilder, ResponseValue, ReturnValue, Tools,
};
use crate::openapi::{OpenApiDocument, Operation};
use crate::proxy::Proxy;
use crate::registry::{Endpoint, Registry};
use crate::routing::RouteMatch;

/// Drives requests through routing, invocation, and negotiation.
pub struct Dispatcher {
    registry: Arc<Registry>,
    contexts: Arc<ContextStore>,
    document: OpenApiDocument,
    client: reqwest::Client,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        contexts: Arc<ContextStore>,
        document: OpenApiDocument,
    ) -> Self {
        Self {
            registry,
            contexts,
            document,
            client: reqwest::Client::new(),
        }
    }

    /// Serves one request.
    ///
    /// Never fails: every error becomes the corresponding response so the
    /// embedding transport always has something to write back.
    pub async fn dispatch(&self, request: RequestRecord) -> ResponseRecord {
        debug!(method = %request.method, path = request.path.as_str(), "dispatching");

        // Resolve once for the template so the declared operation can be
        // looked up, then bind through the registry with its coercions.
        let RouteMatch::Found(target) = self.registry.handler(&request.path) else {
            return ResponseRecord::text(StatusCode::NotFound, "Not found.");
        };
        let operation = self.document.operation(&target.route, &request.method);
        let types = operation.map(Operation::parameter_types).unwrap_or_default();

        let bound = match self.registry.endpoint(&request.method, &request.path, &types) {
            Endpoint::Bound(bound) => bound,
            Endpoint::NotFound => {
                // The module was unloaded between the two lookups.
                return ResponseRecord::text(StatusCode::NotFound, "Not found.");
            }
            Endpoint::MethodNotAllowed { route, allow } => {
                debug!(route = route.as_str(), "method not implemented");
                let allow: Vec<&str> = allow.iter().map(|method| method.as_str()).collect();
                return ResponseRecord::text(StatusCode::MethodNotAllowed, "Method not allowed.")
                    .with_header("Allow", allow.join(", "));
            }
        };

        let mut query = serde_json::Map::new();
        for (name, raw) in &request.query {
            query.insert(name.clone(), types.coerce_query(name, raw));
        }
        let interaction = Interaction {
            method: request.method.clone(),
            path: request.path.clone(),
            path_variables: bound.variables,
            query,
            headers: request.headers.clone(),
            body: request.body.clone(),
            context: self.contexts.find(&request.path),
            tools: Tools::new(request.accept()),
            response: match operation {
                Some(operation) => ResponseBuilder::bound(operation.responses()),
                None => ResponseBuilder::unbound(),
            },
            proxy: Proxy::new(self.client.clone(), request.clone()),
        };

        let value = match (bound.handler)(interaction).await {
            Ok(value) => value,
            Err(handler_error) => {
                error!(route = bound.route.as_str(), error = %handler_error, "handler failed");
                return ResponseRecord::text(
                    StatusCode::InternalServerError,
                    handler_error.to_string(),
                );
            }
        };

        let response: ResponseValue = match value {
            ReturnValue::Text(body) => ResponseValue {
                status: None,
                headers: Vec::new(),
                body: ResponseBody::Fixed {
                    content_type: "text/plain".to_owned(),
                    body: Value::String(body),
                },
            },
            ReturnValue::Response(response) => response,
            ReturnValue::Proxy(directive) => {
                let proxy = Proxy::new(self.client.clone(), request.clone());
                match proxy.forward(directive).await {
                    Ok(upstream) => upstream.into(),
                    Err(proxy_error) => {
                        warn!(error = %proxy_error, "proxy request failed");
                        return ResponseRecord::text(
                            StatusCode::BadGateway,
                            format!("Proxy request failed: {proxy_error}"),
                        );
                    }
                }
            }
        };

        render(&preferred_media_types(request.accept()), response)
    }
}

/// Negotiates and serializes a structured response.
fn render(preferences: &[MediaRange], response: ResponseValue) -> ResponseRecord {
    let (content_type, body) = match response.body {
        ResponseBody::Empty => (None, String::new()),
        ResponseBody::Fixed { content_type, body } => (Some(content_type), stringify(body)),
        ResponseBody::Negotiable(representations) => {
            match select(preferences, &representations) {
                Some(Representation { media_type, body }) => (Some(media_type), stringify(body)),
                None => return not_acceptable(preferences),
            }
        }
    };

    // The produced type must itself be acceptable; a fixed representation
    // the client ruled out turns into a 406 here.
    if let Some(content_type) = &content_type {
        if !accept_allows(preferences, content_type) {
            return not_acceptable(preferences);
        }
    }

    let mut headers = Headers::new();
    for (name, value) in response.headers {
        headers.insert(name, value);
    }
    ResponseRecord {
        status: response.status.unwrap_or(200),
        headers,
        content_type,
        body,
    }
}

/// First representation acceptable to the most preferred range wins;
/// declaration order breaks ties within a range.
fn select(preferences: &[MediaRange], representations: &[Representation]) -> Option<Representation> {
    for preference in preferences {
        for representation in representations {
            if preference.matches(&representation.media_type) {
                return Some(representation.clone());
            }
        }
    }
    None
}

/// Strings pass through verbatim; anything else is serialized as JSON.
fn stringify(body: Value) -> String {
    match body {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => serde_json::to_string(&other).unwrap_or_default(),
    }
}

/// `406` carrying the parsed preference list, so the caller can see what the
/// server thought it asked for.
fn not_acceptable(preferences: &[MediaRange]) -> ResponseRecord {
    let ranges: Vec<String> = preferences.iter().map(ToString::to_string).collect();
    ResponseRecord::json(
        StatusCode::NotAcceptable,
        serde_json::to_string(&ranges).unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::module::{HandlerError, HandlerModule};
    use crate::proxy::ProxyRequest;
    use serde_json::json;

    fn dispatcher_with(routes: &[(&str, Arc<HandlerModule>)]) -> Dispatcher {
        let registry = Arc::new(Registry::new());
        for (url, module) in routes {
            registry.add(url, Arc::clone(module)).unwrap();
        }
        Dispatcher::new(
            registry,
            Arc::new(ContextStore::new()),
            OpenApiDocument::default(),
        )
    }

    // ── routing outcomes ────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_paths_get_the_stock_404() {
        let dispatcher = dispatcher_with(&[]);
        let response = dispatcher
            .dispatch(RequestRecord::new(Method::Get, "/ghost"))
            .await;
        assert_eq!(response.status, 404);
        assert_eq!(response.content_type.as_deref(), Some("text/plain"));
        assert_eq!(response.body, "Not found.");
    }

    #[tokio::test]
    async fn unimplemented_methods_get_405_with_allow() {
        let module = HandlerModule::builder()
            .get(|_interaction| async { Ok(ReturnValue::text("ok")) })
            .put(|_interaction| async { Ok(ReturnValue::text("ok")) })
            .build();
        let dispatcher = dispatcher_with(&[("/pets", module)]);

        let response = dispatcher
            .dispatch(RequestRecord::new(Method::Post, "/pets"))
            .await;
        assert_eq!(response.status, 405);
        assert_eq!(response.body, "Method not allowed.");
        assert_eq!(response.headers.get("allow"), Some("GET, PUT"));
    }

    // ── handler outcomes ────────────────────────────────────────────

    #[tokio::test]
    async fn text_returns_pass_through_as_plain_200() {
        let module = HandlerModule::builder()
            .get(|_interaction| async { Ok(ReturnValue::text("Hello, world!")) })
            .build();
        let dispatcher = dispatcher_with(&[("/hello", module)]);

        let response = dispatcher
            .dispatch(RequestRecord::new(Method::Get, "/hello"))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type.as_deref(), Some("text/plain"));
        assert_eq!(response.body, "Hello, world!");
    }

    #[tokio::test]
    async fn handler_errors_become_500() {
        let module = HandlerModule::builder()
            .get(|_interaction| async { Err(HandlerError::failed("backing store offline")) })
            .build();
        let dispatcher = dispatcher_with(&[("/flaky", module)]);

        let response = dispatcher
            .dispatch(RequestRecord::new(Method::Get, "/flaky"))
            .await;
        assert_eq!(response.status, 500);
        assert!(response.body.contains("backing store offline"));
    }

    #[tokio::test]
    async fn structured_status_and_headers_carry_through() {
        let module = HandlerModule::builder()
            .post(|_interaction| async {
                Ok(ReturnValue::Response(ResponseValue {
                    status: Some(201),
                    headers: vec![("Location".to_owned(), "/pets/9".to_owned())],
                    body: ResponseBody::Fixed {
                        content_type: "application/json".to_owned(),
                        body: json!({"id": 9}),
                    },
                }))
            })
            .build();
        let dispatcher = dispatcher_with(&[("/pets", module)]);

        let response = dispatcher
            .dispatch(RequestRecord::new(Method::Post, "/pets"))
            .await;
        assert_eq!(response.status, 201);
        assert_eq!(response.headers.get("location"), Some("/pets/9"));
        assert_eq!(response.body, r#"{"id":9}"#);
    }

    // ── negotiation ─────────────────────────────────────────────────

    fn negotiable_module() -> Arc<HandlerModule> {
        HandlerModule::builder()
            .get(|_interaction| async {
                Ok(ReturnValue::Response(ResponseValue {
                    status: None,
                    headers: Vec::new(),
                    body: ResponseBody::Negotiable(vec![
                        Representation {
                            media_type: "application/json".to_owned(),
                            body: json!({"id": 7}),
                        },
                        Representation {
                            media_type: "text/plain".to_owned(),
                            body: json!("id 7"),
                        },
                    ]),
                }))
            })
            .build()
    }

    #[tokio::test]
    async fn negotiation_honors_the_accept_header() {
        let dispatcher = dispatcher_with(&[("/items/{id}", negotiable_module())]);

        let json_response = dispatcher
            .dispatch(
                RequestRecord::new(Method::Get, "/items/7")
                    .with_header("Accept", "application/json"),
            )
            .await;
        assert_eq!(json_response.content_type.as_deref(), Some("application/json"));
        assert_eq!(json_response.body, r#"{"id":7}"#);

        let text_response = dispatcher
            .dispatch(
                RequestRecord::new(Method::Get, "/items/7").with_header("Accept", "text/plain"),
            )
            .await;
        assert_eq!(text_response.content_type.as_deref(), Some("text/plain"));
        assert_eq!(text_response.body, "id 7");
    }

    #[tokio::test]
    async fn wildcard_accept_takes_the_first_declared_representation() {
        let dispatcher = dispatcher_with(&[("/items/{id}", negotiable_module())]);

        let response = dispatcher
            .dispatch(RequestRecord::new(Method::Get, "/items/7"))
            .await;
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn no_acceptable_representation_is_406_with_the_preference_list() {
        let dispatcher = dispatcher_with(&[("/items/{id}", negotiable_module())]);

        let response = dispatcher
            .dispatch(
                RequestRecord::new(Method::Get, "/items/7")
                    .with_header("Accept", "application/xml;q=0.9, image/png"),
            )
            .await;
        assert_eq!(response.status, 406);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(response.body, r#"["image/png","application/xml"]"#);
    }

    #[tokio::test]
    async fn fixed_bodies_are_rechecked_against_accept() {
        let module = HandlerModule::builder()
            .get(|_interaction| async {
                Ok(ReturnValue::Response(ResponseValue {
                    status: None,
                    headers: Vec::new(),
                    body: ResponseBody::Fixed {
                        content_type: "text/html".to_owned(),
                        body: json!("<p>hi</p>"),
                    },
                }))
            })
            .build();
        let dispatcher = dispatcher_with(&[("/page", module)]);

        let response = dispatcher
            .dispatch(
                RequestRecord::new(Method::Get, "/page").with_header("Accept", "application/json"),
            )
            .await;
        assert_eq!(response.status, 406);
    }

    // ── parameter coercion and context ──────────────────────────────

    #[tokio::test]
    async fn declared_parameters_reach_handlers_coerced() {
        let registry = Arc::new(Registry::new());
        let module = HandlerModule::builder()
            .get(|interaction: Interaction| async move {
                Ok(ReturnValue::json(json!({
                    "id": interaction.path_variables.get("petId"),
                    "limit": interaction.query.get("limit"),
                })))
            })
            .build();
        registry.add("/pets/{petId}", module).unwrap();

        let document = OpenApiDocument::parse(
            r#"
paths:
  /pets/{petId}:
    get:
      parameters:
        - name: petId
          in: path
          schema: { type: integer }
        - name: limit
          in: query
          schema: { type: number }
"#,
        )
        .unwrap();
        let dispatcher = Dispatcher::new(registry, Arc::new(ContextStore::new()), document);

        let response = dispatcher
            .dispatch(RequestRecord::new(Method::Get, "/pets/42").with_query("limit", "5"))
            .await;
        assert_eq!(response.body, r#"{"id":42,"limit":5}"#);
    }

    #[tokio::test]
    async fn the_nearest_context_reaches_handlers() {
        let registry = Arc::new(Registry::new());
        let module = HandlerModule::builder()
            .get(|interaction: Interaction| async move {
                let region = interaction
                    .context
                    .as_deref()
                    .and_then(|context| context.get("region"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(ReturnValue::json(json!({ "region": region })))
            })
            .build();
        registry.add("/admin/status", module).unwrap();

        let contexts = Arc::new(ContextStore::new());
        contexts.add("/admin", json!({ "region": "eu" }));
        let dispatcher = Dispatcher::new(registry, contexts, OpenApiDocument::default());

        let response = dispatcher
            .dispatch(RequestRecord::new(Method::Get, "/admin/status"))
            .await;
        assert_eq!(response.body, r#"{"region":"eu"}"#);
    }

    // ── proxying ────────────────────────────────────────────────────

    #[tokio::test]
    async fn unreachable_upstreams_become_502() {
        let module = HandlerModule::builder()
            .get(|_interaction| async {
                // Port 1 is never listening; the forward fails fast.
                Ok(ReturnValue::Proxy(ProxyRequest::to("http://127.0.0.1:1")))
            })
            .build();
        let dispatcher = dispatcher_with(&[("/upstream", module)]);

        let response = dispatcher
            .dispatch(RequestRecord::new(Method::Get, "/upstream"))
            .await;
        assert_eq!(response.status, 502);
        assert!(response.body.starts_with("Proxy request failed:"));
    }
}
