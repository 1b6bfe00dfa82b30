//! Per-request upstream forwarding.
//!
//! A [`Proxy`] is handed to each handler invocation, pre-bound to the inbound
//! request. Calling [`Proxy::forward`] with just a host replays the request
//! against that host; any part of it (method, path, headers, query, body) can
//! be overridden per call. Nothing here retries or times out — a development
//! proxy should surface upstream behavior, not paper over it.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::http::{Headers, Method, RequestRecord};

/// Content type reported when the upstream response carries none.
pub const UNKNOWN_CONTENT_TYPE: &str = "unknown/unknown";

/// Errors raised while forwarding to an upstream host.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("method `{0}` cannot be forwarded")]
    Method(String),
    #[error(transparent)]
    Upstream(#[from] reqwest::Error),
}

/// What to forward: a target host plus optional overrides.
///
/// Fields left `None` are filled in from the inbound request, so the common
/// case is just a host — `proxy.forward("http://localhost:3100")` replays the
/// current request there.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub host: String,
    pub method: Option<Method>,
    pub path: Option<String>,
    pub headers: Option<Headers>,
    pub query: Option<HashMap<String, String>>,
    pub body: Option<Value>,
}

impl ProxyRequest {
    /// A directive that replays the inbound request against `host`.
    pub fn to(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            method: None,
            path: None,
            headers: None,
            query: None,
            body: None,
        }
    }

    /// Overrides the forwarded method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Overrides the forwarded path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Overrides the forwarded headers wholesale.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Overrides the forwarded query parameters wholesale.
    pub fn query(mut self, query: HashMap<String, String>) -> Self {
        self.query = Some(query);
        self
    }

    /// Overrides the forwarded body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

impl From<&str> for ProxyRequest {
    fn from(host: &str) -> Self {
        Self::to(host)
    }
}

impl From<String> for ProxyRequest {
    fn from(host: String) -> Self {
        Self::to(host)
    }
}

/// The upstream's answer, flattened for the dispatcher.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Headers,
    /// The upstream `Content-Type`, or [`UNKNOWN_CONTENT_TYPE`].
    pub content_type: String,
    pub body: String,
}

/// The forwarding capability bound to one inbound request.
#[derive(Debug, Clone)]
pub struct Proxy {
    client: reqwest::Client,
    origin: RequestRecord,
}

impl Proxy {
    pub fn new(client: reqwest::Client, origin: RequestRecord) -> Self {
        Self { client, origin }
    }

    /// Forwards the request described by `target`, filling unset parts from
    /// the inbound request.
    ///
    /// Network and upstream failures propagate to the caller untouched.
    pub async fn forward(
        &self,
        target: impl Into<ProxyRequest>,
    ) -> Result<ProxyResponse, ProxyError> {
        let composed = compose(&self.origin, target.into());
        let method = forwardable(&composed.method)?;
        debug!(method = %composed.method, url = %composed.url, "forwarding request upstream");

        let mut builder = self.client.request(method, &composed.url);
        for (name, value) in &composed.headers {
            builder = builder.header(name, value);
        }
        if !composed.query.is_empty() {
            builder = builder.query(&composed.query);
        }
        if let Some(body) = &composed.body {
            builder = builder.json(body);
        }

        let upstream = builder.send().await?;
        let status = upstream.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in upstream.headers() {
            headers.insert(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        let content_type = headers
            .get("content-type")
            .unwrap_or(UNKNOWN_CONTENT_TYPE)
            .to_owned();
        let body = upstream.text().await?;

        Ok(ProxyResponse {
            status,
            headers,
            content_type,
            body,
        })
    }
}

struct Forwarded {
    method: Method,
    url: String,
    headers: Headers,
    query: HashMap<String, String>,
    body: Option<Value>,
}

/// Merges the directive with the inbound request and builds the final URL.
fn compose(origin: &RequestRecord, target: ProxyRequest) -> Forwarded {
    let method = target.method.unwrap_or_else(|| origin.method.clone());
    let path = target.path.unwrap_or_else(|| origin.path.clone());
    let headers = target.headers.unwrap_or_else(|| origin.headers.clone());
    let query = target.query.unwrap_or_else(|| origin.query.clone());
    let body = target.body.or_else(|| origin.body.clone());

    let host = target.host.trim_end_matches('/');
    let url = if path.starts_with('/') {
        format!("{host}{path}")
    } else {
        format!("{host}/{path}")
    };

    // Connection-scoped headers must not leak upstream; the client supplies
    // its own Host and Content-Length.
    let headers = headers
        .iter()
        .filter(|(name, _)| {
            !["host", "content-length", "connection", "transfer-encoding"]
                .iter()
                .any(|skip| name.eq_ignore_ascii_case(skip))
        })
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect();

    Forwarded {
        method,
        url,
        headers,
        query,
        body,
    }
}

fn forwardable(method: &Method) -> Result<reqwest::Method, ProxyError> {
    reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| ProxyError::Method(method.as_str().to_owned()))
}
