//! # understudy
//!
//! A mock REST server core: point it at a directory of small script files
//! and it serves the API they describe, hot-reloading as the files change.
//!
//! Each `.rhai` file under the handler root becomes a route; functions named
//! after HTTP methods become that route's handlers. A file at
//! `items/{id}.rhai` serves `/items/{id}`:
//!
//! ```text
//! fn GET(request) {
//!     #{ "id": request.path_variables.id, "name": "Socks" }
//! }
//!
//! fn DELETE(request) {
//!     #{ "status": 204 }
//! }
//! ```
//!
//! An optional OpenAPI document types the parameters and declares the
//! response shapes handlers can lean on; `_context.rhai` files share state
//! with every handler below their directory; returning
//! `proxy("http://localhost:3100")` forwards the request to a real backend
//! instead.
//!
//! The crate owns no sockets. The embedding transport parses the wire into a
//! [`RequestRecord`](http::RequestRecord), calls
//! [`dispatch`](server::MockServer::dispatch), and writes the returned
//! [`ResponseRecord`](http::ResponseRecord) back out — which also makes the
//! whole pipeline trivially testable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use understudy::http::{Method, RequestRecord};
//! use understudy::server::{MockServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = MockServer::start(
//!         ServerConfig::new("./handlers")
//!             .with_openapi_document("./openapi.yaml")
//!             .with_watch(true),
//!     )?;
//!
//!     let response = server
//!         .dispatch(RequestRecord::new(Method::Get, "/hello"))
//!         .await;
//!     println!("{} {}", response.status, response.body);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | [`server`]   | the assembled facade: config, startup, dispatch         |
//! | [`loader`]   | filesystem scan, hot reload, change events              |
//! | [`routing`]  | the path trie with `{variable}` wildcards               |
//! | [`registry`] | atomically swapped route table, method binding          |
//! | [`dispatch`] | the request pipeline from route match to final response |
//! | [`module`]   | handler modules, scripted and native, and their values  |
//! | [`openapi`]  | parameter types and declared responses from a document  |
//! | [`media`]    | `Accept` parsing and media-range matching               |
//! | [`context`]  | directory-scoped shared state                           |
//! | [`proxy`]    | forwarding requests to a real backend                   |
//! | [`http`]     | methods, status codes, and the boundary records         |

pub mod context;
pub mod dispatch;
pub mod http;
pub mod loader;
pub mod media;
pub mod module;
pub mod openapi;
pub mod proxy;
pub mod registry;
pub mod routing;
pub mod server;

pub use dispatch::Dispatcher;
pub use http::{Method, RequestRecord, ResponseRecord, StatusCode};
pub use loader::{LoaderEvent, LoaderEventKind, ModuleLoader};
pub use server::{MockServer, ServerConfig};
