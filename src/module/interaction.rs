//! The request-scoped object handlers receive.
//!
//! One [`Interaction`] is built per dispatch. It carries the parsed request
//! (with path variables and query values already coerced), the nearest shared
//! context, mock-data [`Tools`], a [`ResponseBuilder`] bound to the declared
//! response shapes, and the [`Proxy`] capability. Script handlers get the
//! same information as plain data via [`Interaction::to_script_value`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::http::{Headers, Method, RequestRecord};
use crate::media::{MediaRange, accept_allows, preferred_media_types};
use crate::openapi::ResponseSpec;
use crate::proxy::Proxy;

use super::value::{Representation, ResponseBody, ResponseValue, ReturnValue};

/// Everything a handler can see and do for one request.
pub struct Interaction {
    pub method: Method,
    pub path: String,
    /// Wildcard captures, coerced per the declared parameter types.
    pub path_variables: Map<String, Value>,
    /// Query parameters, coerced per the declared parameter types.
    pub query: Map<String, Value>,
    pub headers: Headers,
    pub body: Option<Value>,
    /// The nearest ancestor directory context, if any.
    pub context: Option<Arc<Value>>,
    pub tools: Tools,
    pub response: ResponseBuilder,
    pub proxy: Proxy,
}

impl Interaction {
    /// Builds a bare interaction straight from a request: nothing coerced, no
    /// context, no declared responses. The dispatcher enriches its own
    /// interactions; this constructor is for exercising handlers directly.
    pub fn from_request(request: &RequestRecord) -> Self {
        Self {
            method: request.method.clone(),
            path: request.path.clone(),
            path_variables: Map::new(),
            query: request
                .query
                .iter()
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            context: None,
            tools: Tools::new(request.accept()),
            response: ResponseBuilder::unbound(),
            proxy: Proxy::new(reqwest::Client::new(), request.clone()),
        }
    }

    /// Projects the interaction into plain JSON for script handlers.
    ///
    /// Headers collapse to one lower-cased key per name; declared responses
    /// appear under `responses` as `{ status: { media_type: { example } } }`.
    pub fn to_script_value(&self) -> Value {
        json!({
            "method": self.method.as_str(),
            "path": self.path,
            "path_variables": Value::Object(self.path_variables.clone()),
            "query": Value::Object(self.query.clone()),
            "headers": self.headers.single_valued(),
            "body": self.body.clone().unwrap_or(Value::Null),
            "context": self
                .context
                .as_deref()
                .cloned()
                .unwrap_or(Value::Null),
            "responses": self.response.declared_json(),
        })
    }
}

/// Mock-data helpers.
#[derive(Debug, Clone)]
pub struct Tools {
    preferences: Vec<MediaRange>,
}

impl Tools {
    /// Builds tools for a request with the given `Accept` header.
    pub fn new(accept: &str) -> Self {
        Self {
            preferences: preferred_media_types(accept),
        }
    }

    /// `true` if the request's `Accept` header covers `media_type`.
    pub fn accepts(&self, media_type: &str) -> bool {
        accept_allows(&self.preferences, media_type)
    }

    /// Picks one of `choices` at random; `None` only when `choices` is empty.
    pub fn one_of<'a, T>(&self, choices: &'a [T]) -> Option<&'a T> {
        if choices.is_empty() {
            None
        } else {
            Some(&choices[fastrand::usize(..choices.len())])
        }
    }
}

/// Builds [`ReturnValue`]s from the operation's declared response shapes.
///
/// # Examples
///
/// ```
/// use understudy::module::ResponseBuilder;
///
/// let builder = ResponseBuilder::unbound();
/// let value = builder.status(201).header("Location", "/widgets/9").text("created");
/// # let _ = value;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResponseBuilder {
    declared: Option<Arc<BTreeMap<String, ResponseSpec>>>,
}

impl ResponseBuilder {
    /// A builder with no declared shapes; `example()` produces empty bodies.
    pub fn unbound() -> Self {
        Self::default()
    }

    /// A builder bound to an operation's declared responses.
    pub fn bound(declared: Arc<BTreeMap<String, ResponseSpec>>) -> Self {
        Self {
            declared: Some(declared),
        }
    }

    /// Starts a response with the given status, attaching the declared shape
    /// for that status (falling back to the `default` entry).
    pub fn status(&self, status: u16) -> PendingResponse {
        let spec = self.declared.as_ref().and_then(|declared| {
            declared
                .get(&status.to_string())
                .or_else(|| declared.get("default"))
                .cloned()
        });
        PendingResponse {
            status,
            headers: Vec::new(),
            spec,
        }
    }

    pub(crate) fn declared_json(&self) -> Value {
        let Some(declared) = &self.declared else {
            return Value::Null;
        };
        let mut statuses = Map::new();
        for (status, spec) in declared.iter() {
            let mut content = Map::new();
            for declared_content in &spec.content {
                content.insert(
                    declared_content.media_type.clone(),
                    json!({ "example": declared_content.example.clone().unwrap_or(Value::Null) }),
                );
            }
            statuses.insert(status.clone(), Value::Object(content));
        }
        Value::Object(statuses)
    }
}

/// A response under construction; finish it with one of the body methods.
#[derive(Debug, Clone)]
pub struct PendingResponse {
    status: u16,
    headers: Vec<(String, String)>,
    spec: Option<ResponseSpec>,
}

impl PendingResponse {
    /// Adds one response header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Finishes with a `text/plain` body.
    pub fn text(self, body: impl Into<String>) -> ReturnValue {
        let body = Value::String(body.into());
        self.fixed("text/plain", body)
    }

    /// Finishes with an `application/json` body.
    pub fn json(self, body: Value) -> ReturnValue {
        self.fixed("application/json", body)
    }

    /// Finishes with an arbitrary concrete representation.
    pub fn content(self, content_type: impl Into<String>, body: Value) -> ReturnValue {
        self.fixed(content_type.into(), body)
    }

    /// Finishes with no body at all.
    pub fn empty(self) -> ReturnValue {
        ReturnValue::Response(ResponseValue {
            status: Some(self.status),
            headers: self.headers,
            body: ResponseBody::Empty,
        })
    }

    /// Finishes with the declared examples for this status, one candidate per
    /// declared content type, leaving the final pick to negotiation.
    ///
    /// With nothing declared for the status, the response is empty.
    pub fn example(self) -> ReturnValue {
        let representations: Vec<Representation> = self
            .spec
            .as_ref()
            .map(|spec| {
                spec.content
                    .iter()
                    .map(|content| Representation {
                        media_type: content.media_type.clone(),
                        body: content.example.clone().unwrap_or(Value::Null),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let body = if representations.is_empty() {
            ResponseBody::Empty
        } else {
            ResponseBody::Negotiable(representations)
        };
        ReturnValue::Response(ResponseValue {
            status: Some(self.status),
            headers: self.headers,
            body,
        })
    }

    fn fixed(self, content_type: impl Into<String>, body: Value) -> ReturnValue {
        ReturnValue::Response(ResponseValue {
            status: Some(self.status),
            headers: self.headers,
            body: ResponseBody::Fixed {
                content_type: content_type.into(),
                body,
            },
        })
    }
}
