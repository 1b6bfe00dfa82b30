//! Rhai script handler modules (development mode).
//!
//! A handler file defines one function per upper-case HTTP method it answers:
//!
//! ```rhai
//! fn GET(request) {
//!     "Hello, " + request.path_variables.name + "!"
//! }
//!
//! fn DELETE(request) {
//!     #{ "status": 204 }
//! }
//! ```
//!
//! Scripts receive the interaction as a plain map (see
//! [`Interaction::to_script_value`]) and return plain data (see
//! [`ReturnValue::from_script_value`]). Two helpers are registered in every
//! engine: `proxy(host)` produces a proxy directive, and `one_of(array)`
//! picks a random element. A `_context` file's final expression becomes its
//! directory's shared context value.
//!
//! The engine is sandboxed with an operation limit so a runaway script
//! terminates with an error instead of pinning a worker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::http::Method;

use super::value::ReturnValue;
use super::{HandlerFn, HandlerModule, Interaction};

/// Evaluation ceiling per script call.
const MAX_OPERATIONS: u64 = 500_000;

/// Errors raised while turning a script file into a module or context value.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to compile `{path}`: {source}")]
    Compile {
        path: PathBuf,
        #[source]
        source: rhai::ParseError,
    },
    #[error("failed to evaluate `{path}`: {source}")]
    Evaluate {
        path: PathBuf,
        #[source]
        source: Box<rhai::EvalAltResult>,
    },
    #[error("`{path}` did not produce a JSON-representable value: {detail}")]
    Convert { path: PathBuf, detail: String },
}

/// A shared, sandboxed Rhai engine.
///
/// One engine serves every module; per-call state lives in a fresh [`Scope`],
/// so concurrent invocations do not observe each other.
#[derive(Clone)]
pub struct ScriptEngine {
    engine: Arc<Engine>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.register_fn("proxy", |host: &str| {
            let mut directive = rhai::Map::new();
            directive.insert(
                super::value::PROXY_DIRECTIVE_KEY.into(),
                host.to_owned().into(),
            );
            directive
        });
        engine.register_fn("one_of", |choices: rhai::Array| {
            if choices.is_empty() {
                Dynamic::UNIT
            } else {
                choices[fastrand::usize(..choices.len())].clone()
            }
        });
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Compiles a handler script into a module.
    ///
    /// Every top-level `fn METHOD(request)` whose name is an upper-case HTTP
    /// method becomes that method's handler; other functions are plain
    /// helpers the handlers may call.
    pub fn compile_module(
        &self,
        path: &Path,
        source: &str,
    ) -> Result<Arc<HandlerModule>, ScriptError> {
        let ast = Arc::new(self.engine.compile(source).map_err(|source| {
            ScriptError::Compile {
                path: path.to_path_buf(),
                source,
            }
        })?);

        let functions: Vec<(String, usize)> = ast
            .iter_functions()
            .map(|function| (function.name.to_owned(), function.params.len()))
            .collect();

        let mut handlers: HashMap<Method, HandlerFn> = HashMap::new();
        for (name, parameter_count) in functions {
            let Some(method) = method_for_name(&name) else {
                continue;
            };
            if parameter_count != 1 {
                trace!(
                    function = name.as_str(),
                    "method-named function does not take exactly one parameter, skipping"
                );
                continue;
            }
            let engine = Arc::clone(&self.engine);
            let ast = Arc::clone(&ast);
            let handler: HandlerFn = Arc::new(move |interaction: Interaction| {
                let engine = Arc::clone(&engine);
                let ast = Arc::clone(&ast);
                let name = name.clone();
                Box::pin(async move {
                    let request = rhai::serde::to_dynamic(interaction.to_script_value())?;
                    let mut scope = Scope::new();
                    let produced =
                        engine.call_fn::<Dynamic>(&mut scope, &ast, &name, (request,))?;
                    let value: Value = rhai::serde::from_dynamic(&produced)?;
                    ReturnValue::from_script_value(value)
                })
            });
            handlers.insert(method, handler);
        }

        Ok(Arc::new(HandlerModule::from_handlers(handlers)))
    }

    /// Evaluates a `_context` script; its final expression is the context
    /// value shared with every handler under the file's directory.
    pub fn evaluate_context(&self, path: &Path, source: &str) -> Result<Value, ScriptError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|source| ScriptError::Compile {
                path: path.to_path_buf(),
                source,
            })?;
        let produced =
            self.engine
                .eval_ast::<Dynamic>(&ast)
                .map_err(|source| ScriptError::Evaluate {
                    path: path.to_path_buf(),
                    source,
                })?;
        rhai::serde::from_dynamic(&produced).map_err(|error| ScriptError::Convert {
            path: path.to_path_buf(),
            detail: error.to_string(),
        })
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn method_for_name(name: &str) -> Option<Method> {
    Some(match name {
        "GET" => Method::Get,
        "POST" => Method::Post,
        "PUT" => Method::Put,
        "DELETE" => Method::Delete,
        "PATCH" => Method::Patch,
        "HEAD" => Method::Head,
        "OPTIONS" => Method::Options,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestRecord;
    use serde_json::json;
    use std::path::Path;

    fn engine() -> ScriptEngine {
        ScriptEngine::new()
    }

    fn interaction(path: &str) -> Interaction {
        Interaction::from_request(&RequestRecord::new(Method::Get, path))
    }

    async fn invoke(module: &HandlerModule, method: Method, i: Interaction) -> ReturnValue {
        let handler = module.handler(&method).unwrap();
        handler(i).await.unwrap()
    }

    // ── Compilation ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn method_functions_become_handlers() {
        let source = r#"
            fn greeting() { "Hello" }
            fn GET(request) { greeting() + ", " + request.path + "!" }
            fn DELETE(request) { #{ "status": 204 } }
        "#;
        let module = engine()
            .compile_module(Path::new("greeter.rhai"), source)
            .unwrap();

        // `greeting` is a helper, not a route method.
        let methods = module.methods();
        let names: Vec<&str> = methods.iter().map(|m| m.as_str()).collect();
        assert_eq!(names, vec!["DELETE", "GET"]);

        let value = invoke(&module, Method::Get, interaction("/greeter")).await;
        assert!(matches!(value, ReturnValue::Text(body) if body == "Hello, /greeter!"));
    }

    #[test]
    fn compile_errors_are_reported_with_the_path() {
        let error = engine()
            .compile_module(Path::new("broken.rhai"), "fn GET(request) {")
            .unwrap_err();
        assert!(matches!(error, ScriptError::Compile { .. }));
        assert!(error.to_string().contains("broken.rhai"));
    }

    #[tokio::test]
    async fn structured_returns_flow_through() {
        let source = r#"
            fn GET(request) {
                #{
                    "status": 200,
                    "content": [
                        #{ "type": "application/json", "body": #{ "path": request.path } },
                        #{ "type": "text/plain", "body": "plain " + request.path },
                    ],
                }
            }
        "#;
        let module = engine()
            .compile_module(Path::new("itemized.rhai"), source)
            .unwrap();

        let ReturnValue::Response(response) =
            invoke(&module, Method::Get, interaction("/itemized")).await
        else {
            panic!("expected a response");
        };
        let crate::module::ResponseBody::Negotiable(representations) = response.body else {
            panic!("expected negotiable body");
        };
        assert_eq!(representations[0].body, json!({"path": "/itemized"}));
    }

    // ── Registered helpers ────────────────────────────────────────────────────

    #[tokio::test]
    async fn proxy_helper_produces_a_directive() {
        let source = r#"fn GET(request) { proxy("http://localhost:3100") }"#;
        let module = engine()
            .compile_module(Path::new("forwarded.rhai"), source)
            .unwrap();

        let value = invoke(&module, Method::Get, interaction("/forwarded")).await;
        assert!(
            matches!(value, ReturnValue::Proxy(directive) if directive.host == "http://localhost:3100")
        );
    }

    #[tokio::test]
    async fn one_of_helper_picks_from_the_array() {
        let source = r#"fn GET(request) { one_of(["red", "green", "blue"]) }"#;
        let module = engine()
            .compile_module(Path::new("colors.rhai"), source)
            .unwrap();

        let ReturnValue::Text(color) = invoke(&module, Method::Get, interaction("/colors")).await
        else {
            panic!("expected text");
        };
        assert!(["red", "green", "blue"].contains(&color.as_str()));
    }

    // ── Sandbox ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn runaway_scripts_are_cut_off() {
        let source = r#"fn GET(request) { loop { } }"#;
        let module = engine()
            .compile_module(Path::new("spinner.rhai"), source)
            .unwrap();

        let handler = module.handler(&Method::Get).unwrap();
        let error = handler(interaction("/spinner")).await.unwrap_err();
        assert!(matches!(error, crate::module::HandlerError::Script(_)));
    }

    // ── Context files ─────────────────────────────────────────────────────────

    #[test]
    fn context_scripts_evaluate_to_their_final_expression() {
        let value = engine()
            .evaluate_context(
                Path::new("_context.rhai"),
                r#"
                    let seed = 40;
                    #{ "tenant": "acme", "answer": seed + 2 }
                "#,
            )
            .unwrap();
        assert_eq!(value, json!({"tenant": "acme", "answer": 42}));
    }

    #[test]
    fn context_evaluation_failures_are_reported() {
        let error = engine()
            .evaluate_context(Path::new("_context.rhai"), r#"missing_function()"#)
            .unwrap_err();
        assert!(matches!(error, ScriptError::Evaluate { .. }));
    }
}
