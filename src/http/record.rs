//! Boundary records exchanged with the embedding transport.
//!
//! The crate deliberately owns no sockets: a transport adapter parses the wire
//! into a [`RequestRecord`], hands it to the dispatcher, and serializes the
//! returned [`ResponseRecord`] back out. Both records are also convenient to
//! construct by hand in tests.

use std::collections::HashMap;

use serde_json::Value;

use super::{Headers, Method};

/// The default media range assumed when a request carries no `Accept` header.
pub const ANY_MEDIA_TYPE: &str = "*/*";

/// One inbound request, already parsed off the wire.
///
/// `path` is the URL path only; the transport splits off and decodes the
/// query string into `query` before dispatch.
///
/// # Examples
///
/// ```
/// use understudy::http::{Method, RequestRecord};
///
/// let request = RequestRecord::new(Method::Get, "/widgets/17")
///     .with_header("Accept", "application/json")
///     .with_query("verbose", "true");
///
/// assert_eq!(request.accept(), "application/json");
/// assert_eq!(request.query.get("verbose").map(String::as_str), Some("true"));
/// ```
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub method: Method,
    pub path: String,
    pub headers: Headers,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
}

impl RequestRecord {
    /// Creates a request with empty headers, query, and body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Headers::new(),
            query: HashMap::new(),
            body: None,
        }
    }

    /// Appends one header entry.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds one query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Attaches a parsed JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// The `Accept` header, or `*/*` when the request declares none.
    pub fn accept(&self) -> &str {
        self.headers.get("accept").unwrap_or(ANY_MEDIA_TYPE)
    }
}

/// One outbound response, normalized and ready for the wire.
///
/// `status` is a plain `u16` because handlers may return any code; the named
/// [`StatusCode`](super::StatusCode) variants cover only what the dispatcher
/// emits itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRecord {
    pub status: u16,
    pub headers: Headers,
    pub content_type: Option<String>,
    pub body: String,
}

impl ResponseRecord {
    /// A `text/plain` response with the given status and body.
    pub fn text(status: impl Into<u16>, body: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            headers: Headers::new(),
            content_type: Some("text/plain".to_owned()),
            body: body.into(),
        }
    }

    /// An `application/json` response with the given status and body.
    pub fn json(status: impl Into<u16>, body: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            headers: Headers::new(),
            content_type: Some("application/json".to_owned()),
            body: body.into(),
        }
    }

    /// A bodiless response with no content type.
    pub fn empty(status: impl Into<u16>) -> Self {
        Self {
            status: status.into(),
            headers: Headers::new(),
            content_type: None,
            body: String::new(),
        }
    }

    /// Appends one header entry.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}
