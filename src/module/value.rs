//! Handler return values.
//!
//! Handlers produce a [`ReturnValue`]; the dispatcher normalizes it into the
//! final [`ResponseRecord`](crate::http::ResponseRecord). Script handlers
//! return plain data that [`ReturnValue::from_script_value`] maps onto the
//! same model, so native and scripted modules are indistinguishable past this
//! point.

use serde_json::Value;

use crate::proxy::{ProxyRequest, ProxyResponse};

use super::HandlerError;

/// Map key marking a script return value as a proxy directive.
pub const PROXY_DIRECTIVE_KEY: &str = "$proxy";

/// What a handler hands back to the dispatcher.
#[derive(Debug, Clone)]
pub enum ReturnValue {
    /// A bare textual body: becomes `200 text/plain`.
    Text(String),
    /// A structured response, possibly offering several representations.
    Response(ResponseValue),
    /// Forward the request upstream and answer with whatever comes back.
    Proxy(ProxyRequest),
}

/// A structured response before negotiation.
#[derive(Debug, Clone, Default)]
pub struct ResponseValue {
    /// Defaults to 200 when the handler does not set one.
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

/// The body of a structured response.
#[derive(Debug, Clone, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    /// One concrete representation; negotiation only re-checks it at the end.
    Fixed { content_type: String, body: Value },
    /// Candidate representations; the dispatcher picks one via the `Accept`
    /// header, in declaration order within each preference tier.
    Negotiable(Vec<Representation>),
}

/// One candidate representation of a negotiable response.
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub media_type: String,
    pub body: Value,
}

impl ReturnValue {
    /// A bare text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text(body.into())
    }

    /// A `200 application/json` response carrying `body`.
    pub fn json(body: Value) -> Self {
        Self::Response(ResponseValue {
            status: None,
            headers: Vec::new(),
            body: ResponseBody::Fixed {
                content_type: "application/json".to_owned(),
                body,
            },
        })
    }

    /// Interprets the plain value a script handler returned.
    ///
    /// The rules, in order:
    /// - a string is a bare text body;
    /// - `()` / null is an empty 200;
    /// - a map carrying [`PROXY_DIRECTIVE_KEY`] is a proxy directive;
    /// - a map with any of `status` / `headers` / `content` / `contentType` /
    ///   `body` is a structured response (`content` — an array of
    ///   `{ "type", "body" }` entries — wins over `contentType` + `body`);
    /// - any other value (including maps without the keys above) is a JSON
    ///   body.
    pub fn from_script_value(value: Value) -> Result<Self, HandlerError> {
        match value {
            Value::String(body) => Ok(Self::Text(body)),
            Value::Null => Ok(Self::Response(ResponseValue::default())),
            Value::Object(map) => {
                if let Some(host) = map.get(PROXY_DIRECTIVE_KEY) {
                    let host = host.as_str().ok_or_else(|| {
                        HandlerError::Shape(format!(
                            "`{PROXY_DIRECTIVE_KEY}` must name a host string"
                        ))
                    })?;
                    return Ok(Self::Proxy(ProxyRequest::to(host)));
                }
                let structured = ["status", "headers", "content", "contentType", "body"]
                    .iter()
                    .any(|key| map.contains_key(*key));
                if !structured {
                    return Ok(Self::json(Value::Object(map)));
                }

                let status = match map.get("status") {
                    None => None,
                    Some(raw) => Some(parse_status(raw)?),
                };
                let headers = match map.get("headers") {
                    None => Vec::new(),
                    Some(raw) => parse_headers(raw)?,
                };
                let body = parse_body(&map)?;
                Ok(Self::Response(ResponseValue {
                    status,
                    headers,
                    body,
                }))
            }
            other => Ok(Self::json(other)),
        }
    }
}

fn parse_status(raw: &Value) -> Result<u16, HandlerError> {
    raw.as_u64()
        .filter(|code| (100..=999).contains(code))
        .map(|code| code as u16)
        .ok_or_else(|| HandlerError::Shape(format!("`status` must be an HTTP status code, got {raw}")))
}

fn parse_headers(raw: &Value) -> Result<Vec<(String, String)>, HandlerError> {
    let entries = raw
        .as_object()
        .ok_or_else(|| HandlerError::Shape("`headers` must be a map".to_owned()))?;
    let mut headers = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        let value = match value {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            other => {
                return Err(HandlerError::Shape(format!(
                    "header `{name}` must be a scalar, got {other}"
                )));
            }
        };
        headers.push((name.clone(), value));
    }
    Ok(headers)
}

fn parse_body(map: &serde_json::Map<String, Value>) -> Result<ResponseBody, HandlerError> {
    if let Some(content) = map.get("content") {
        let entries = content
            .as_array()
            .ok_or_else(|| HandlerError::Shape("`content` must be an array".to_owned()))?;
        let mut representations = Vec::with_capacity(entries.len());
        for entry in entries {
            let media_type = entry
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    HandlerError::Shape("each `content` entry needs a `type` string".to_owned())
                })?;
            representations.push(Representation {
                media_type: media_type.to_owned(),
                body: entry.get("body").cloned().unwrap_or(Value::Null),
            });
        }
        return Ok(ResponseBody::Negotiable(representations));
    }

    let declared_type = map.get("contentType").and_then(Value::as_str);
    match (declared_type, map.get("body")) {
        (Some(content_type), body) => Ok(ResponseBody::Fixed {
            content_type: content_type.to_owned(),
            body: body.cloned().unwrap_or(Value::Null),
        }),
        (None, Some(Value::String(text))) => Ok(ResponseBody::Fixed {
            content_type: "text/plain".to_owned(),
            body: Value::String(text.clone()),
        }),
        (None, Some(body)) => Ok(ResponseBody::Fixed {
            content_type: "application/json".to_owned(),
            body: body.clone(),
        }),
        (None, None) => Ok(ResponseBody::Empty),
    }
}

impl From<ProxyResponse> for ResponseValue {
    fn from(upstream: ProxyResponse) -> Self {
        Self {
            status: Some(upstream.status),
            headers: upstream
                .headers
                .iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect(),
            body: ResponseBody::Fixed {
                content_type: upstream.content_type,
                // The upstream body is passed through verbatim.
                body: Value::String(upstream.body),
            },
        }
    }
}

impl From<ProxyResponse> for ReturnValue {
    fn from(upstream: ProxyResponse) -> Self {
        Self::Response(upstream.into())
    }
}
