//! OpenAPI document metadata.
//!
//! The dispatcher consults an optional OpenAPI document for two things only:
//! declared parameter types (so `/widgets/{id}` can hand handlers a numeric
//! `id`) and declared response shapes (content types and examples for the
//! response builder). Routing never depends on the document — handler files
//! on disk are the source of truth for what exists.
//!
//! Documents load from YAML or JSON and are fully dereferenced up front:
//! every local `#/` reference is resolved before any operation is served, so
//! lookup code never sees a `$ref`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::http::Method;

/// Longest `$ref` chain followed before assuming the document is cyclic.
const MAX_REF_DEPTH: u8 = 32;

/// Errors raised while loading or dereferencing a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse document: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("mapping key `{0}` is not representable as a string")]
    Key(String),
    #[error("unresolvable reference `{0}`")]
    UnresolvedRef(String),
    #[error("reference chain exceeds the depth limit; the document is probably cyclic")]
    RefDepth,
}

/// Where a declared parameter lives in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
    FormData,
    Body,
}

impl ParameterLocation {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "path" => Self::Path,
            "query" => Self::Query,
            "header" => Self::Header,
            "cookie" => Self::Cookie,
            "formData" => Self::FormData,
            "body" => Self::Body,
            _ => return None,
        })
    }
}

/// How a raw string parameter value is converted before handlers see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coercion {
    /// Declared `integer` or `number`: parse into a JSON number.
    Number,
    /// Everything else passes through as the original string.
    #[default]
    Verbatim,
}

impl Coercion {
    fn from_declared_type(declared: Option<&str>) -> Self {
        match declared {
            Some("integer") | Some("number") => Self::Number,
            _ => Self::Verbatim,
        }
    }
}

/// One declared parameter of an operation.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub coercion: Coercion,
}

/// Declared body for one content type of a response, with its example if the
/// document carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentSpec {
    pub media_type: String,
    pub example: Option<Value>,
}

/// One declared response: the content types it may carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSpec {
    pub content: Vec<ContentSpec>,
}

/// Declared parameter coercions for one operation, split by location.
///
/// The default value coerces nothing, which is exactly the behavior wanted
/// when no document (or no matching operation) exists.
#[derive(Debug, Clone, Default)]
pub struct ParameterTypes {
    path: HashMap<String, Coercion>,
    query: HashMap<String, Coercion>,
}

impl ParameterTypes {
    /// Converts one extracted path variable per its declared type.
    pub fn coerce_path(&self, name: &str, raw: &str) -> Value {
        coerce(self.path.get(name).copied(), name, raw)
    }

    /// Converts one query parameter per its declared type.
    pub fn coerce_query(&self, name: &str, raw: &str) -> Value {
        coerce(self.query.get(name).copied(), name, raw)
    }
}

fn coerce(coercion: Option<Coercion>, name: &str, raw: &str) -> Value {
    match coercion {
        Some(Coercion::Number) => {
            if let Ok(int) = raw.parse::<i64>() {
                return Value::Number(int.into());
            }
            if let Ok(float) = raw.parse::<f64>() {
                if let Some(number) = serde_json::Number::from_f64(float) {
                    return Value::Number(number);
                }
            }
            debug!(
                parameter = name,
                value = raw,
                "declared numeric parameter did not parse, passing it through verbatim"
            );
            Value::String(raw.to_owned())
        }
        _ => Value::String(raw.to_owned()),
    }
}

/// One operation (path template + method) from the document.
#[derive(Debug, Clone)]
pub struct Operation {
    parameters: Vec<Parameter>,
    responses: Arc<BTreeMap<String, ResponseSpec>>,
}

impl Operation {
    /// The declared parameters, path-level and operation-level merged.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Builds the coercion table the registry applies to this operation.
    pub fn parameter_types(&self) -> ParameterTypes {
        let mut types = ParameterTypes::default();
        for parameter in &self.parameters {
            let slot = match parameter.location {
                ParameterLocation::Path => &mut types.path,
                ParameterLocation::Query => &mut types.query,
                _ => continue,
            };
            slot.insert(parameter.name.clone(), parameter.coercion);
        }
        types
    }

    /// Declared responses keyed by status pattern (`"200"`, `"default"`, ...).
    pub fn responses(&self) -> Arc<BTreeMap<String, ResponseSpec>> {
        Arc::clone(&self.responses)
    }
}

/// A loaded, fully dereferenced OpenAPI document.
///
/// # Examples
///
/// ```
/// use understudy::http::Method;
/// use understudy::openapi::OpenApiDocument;
///
/// let document = OpenApiDocument::parse(r#"
/// paths:
///   /widgets/{id}:
///     get:
///       parameters:
///         - name: id
///           in: path
///           schema: { type: integer }
///       responses:
///         200:
///           content:
///             application/json: {}
/// "#).unwrap();
///
/// let operation = document.operation("/widgets/{id}", &Method::Get).unwrap();
/// let types = operation.parameter_types();
/// assert_eq!(types.coerce_path("id", "17"), serde_json::json!(17));
/// ```
#[derive(Debug, Clone, Default)]
pub struct OpenApiDocument {
    operations: HashMap<(String, String), Operation>,
}

impl OpenApiDocument {
    /// Reads and parses a document from disk (YAML or JSON).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source)
    }

    /// Parses a document from a string (YAML or JSON).
    pub fn parse(source: &str) -> Result<Self, DocumentError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(source)?;
        let root = yaml_to_json(raw)?;
        let root = dereference(&root)?;
        Ok(Self::from_document(&root))
    }

    /// Looks up the operation for a route template and method.
    ///
    /// Both sides are case-folded, so `/Widgets/{Id}` in the document matches
    /// the `/widgets/{id}` template derived from the filesystem.
    pub fn operation(&self, route: &str, method: &Method) -> Option<&Operation> {
        let key = (
            route.to_ascii_lowercase(),
            method.as_str().to_ascii_lowercase(),
        );
        self.operations.get(&key)
    }

    /// The number of operations in the document.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// `true` if the document declares no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn from_document(root: &Value) -> Self {
        let mut operations = HashMap::new();
        let Some(paths) = root.get("paths").and_then(Value::as_object) else {
            return Self { operations };
        };
        for (template, item) in paths {
            let Some(item) = item.as_object() else {
                continue;
            };
            // Path-level parameters apply to every operation under the template.
            let shared = item
                .get("parameters")
                .map(parse_parameters)
                .unwrap_or_default();
            for (field, operation) in item {
                if !is_http_method(field) {
                    continue;
                }
                let Some(operation) = operation.as_object() else {
                    continue;
                };
                let mut parameters = shared.clone();
                if let Some(own) = operation.get("parameters") {
                    parameters.extend(parse_parameters(own));
                }
                let responses = parse_responses(operation.get("responses"));
                operations.insert(
                    (template.to_ascii_lowercase(), field.to_ascii_lowercase()),
                    Operation {
                        parameters,
                        responses: Arc::new(responses),
                    },
                );
            }
        }
        Self { operations }
    }
}

fn is_http_method(field: &str) -> bool {
    matches!(
        field,
        "get" | "post" | "put" | "delete" | "patch" | "head" | "options" | "trace"
    )
}

fn parse_parameters(raw: &Value) -> Vec<Parameter> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let item = item.as_object()?;
            let name = item.get("name")?.as_str()?.to_owned();
            let location = ParameterLocation::parse(item.get("in")?.as_str()?)?;
            // OpenAPI 3 nests the type under `schema`; 2.0 put it on the parameter.
            let declared = item
                .get("schema")
                .and_then(|schema| schema.get("type"))
                .or_else(|| item.get("type"))
                .and_then(Value::as_str);
            Some(Parameter {
                name,
                location,
                coercion: Coercion::from_declared_type(declared),
            })
        })
        .collect()
}

fn parse_responses(raw: Option<&Value>) -> BTreeMap<String, ResponseSpec> {
    let mut specs = BTreeMap::new();
    let Some(entries) = raw.and_then(Value::as_object) else {
        return specs;
    };
    for (status, response) in entries {
        let mut content = Vec::new();
        if let Some(declared) = response.get("content").and_then(Value::as_object) {
            for (media_type, body) in declared {
                content.push(ContentSpec {
                    media_type: media_type.to_ascii_lowercase(),
                    example: declared_example(body),
                });
            }
        }
        specs.insert(status.clone(), ResponseSpec { content });
    }
    specs
}

fn declared_example(body: &Value) -> Option<Value> {
    if let Some(example) = body.get("example") {
        return Some(example.clone());
    }
    if let Some(first) = body
        .get("examples")
        .and_then(Value::as_object)
        .and_then(|examples| examples.values().next())
    {
        return first.get("value").cloned().or_else(|| Some(first.clone()));
    }
    body.get("schema").and_then(|schema| schema.get("example")).cloned()
}

/// Replaces every local `#/` reference with the value it points at.
fn dereference(root: &Value) -> Result<Value, DocumentError> {
    deref_value(root, root, MAX_REF_DEPTH)
}

fn deref_value(root: &Value, value: &Value, depth: u8) -> Result<Value, DocumentError> {
    if depth == 0 {
        return Err(DocumentError::RefDepth);
    }
    match value {
        Value::Object(fields) => {
            if let Some(target) = fields.get("$ref").and_then(Value::as_str) {
                let pointer = target.strip_prefix('#').unwrap_or(target);
                let resolved = root
                    .pointer(pointer)
                    .ok_or_else(|| DocumentError::UnresolvedRef(target.to_owned()))?;
                return deref_value(root, resolved, depth - 1);
            }
            let mut out = Map::new();
            for (key, field) in fields {
                out.insert(key.clone(), deref_value(root, field, depth)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let out = items
                .iter()
                .map(|item| deref_value(root, item, depth))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// Converts YAML into JSON, stringifying the scalar mapping keys OpenAPI
/// documents actually use (`200:` response statuses in particular).
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, DocumentError> {
    use serde_yaml::Value as Yaml;
    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(flag) => Value::Bool(flag),
        Yaml::Number(number) => {
            if let Some(int) = number.as_i64() {
                Value::Number(int.into())
            } else if let Some(int) = number.as_u64() {
                Value::Number(int.into())
            } else {
                // YAML permits .inf/.nan; JSON has no spelling for them.
                number
                    .as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Yaml::String(text) => Value::String(text),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut object = Map::new();
            for (key, item) in mapping {
                let key = match key {
                    Yaml::String(text) => text,
                    Yaml::Number(number) => number.to_string(),
                    Yaml::Bool(flag) => flag.to_string(),
                    other => return Err(DocumentError::Key(format!("{other:?}"))),
                };
                object.insert(key, yaml_to_json(item)?);
            }
            Value::Object(object)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PETSTORE_SLICE: &str = r##"
paths:
  /pets/{petId}:
    parameters:
      - name: petId
        in: path
        schema:
          $ref: "#/components/schemas/Id"
    get:
      parameters:
        - name: limit
          in: query
          schema: { type: number }
        - name: verbose
          in: query
          schema: { type: string }
      responses:
        200:
          content:
            application/json:
              example: { id: 1, name: "Socks" }
            text/plain:
              schema: { type: string, example: "Socks" }
        default:
          content:
            application/json: {}
components:
  schemas:
    Id:
      type: integer
"##;

    // ── Loading & dereferencing ───────────────────────────────────────────────

    #[test]
    fn parses_yaml_with_numeric_status_keys() {
        let document = OpenApiDocument::parse(PETSTORE_SLICE).unwrap();
        let operation = document.operation("/pets/{petId}", &Method::Get).unwrap();
        let responses = operation.responses();
        assert!(responses.contains_key("200"));
        assert!(responses.contains_key("default"));
    }

    #[test]
    fn dereferences_local_refs_before_lookup() {
        let document = OpenApiDocument::parse(PETSTORE_SLICE).unwrap();
        let operation = document.operation("/pets/{petId}", &Method::Get).unwrap();
        // petId's type comes through the $ref into components.
        let types = operation.parameter_types();
        assert_eq!(types.coerce_path("petId", "7"), json!(7));
    }

    #[test]
    fn cyclic_references_are_reported() {
        let cyclic = r##"
paths: {}
components:
  schemas:
    Node:
      $ref: "#/components/schemas/Node"
"##;
        assert!(matches!(
            OpenApiDocument::parse(cyclic),
            Err(DocumentError::RefDepth)
        ));
    }

    #[test]
    fn unresolved_references_are_reported() {
        let dangling = r##"
paths:
  /x:
    get:
      responses:
        200:
          $ref: "#/components/responses/Missing"
"##;
        assert!(matches!(
            OpenApiDocument::parse(dangling),
            Err(DocumentError::UnresolvedRef(_))
        ));
    }

    #[test]
    fn parses_json_documents_too() {
        let document = OpenApiDocument::parse(
            r#"{"paths": {"/a": {"get": {"responses": {"204": {}}}}}}"#,
        )
        .unwrap();
        assert!(document.operation("/a", &Method::Get).is_some());
        assert_eq!(document.len(), 1);
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    #[test]
    fn lookup_is_case_insensitive() {
        let document = OpenApiDocument::parse(PETSTORE_SLICE).unwrap();
        assert!(document.operation("/Pets/{PetId}", &Method::Get).is_some());
        assert!(document.operation("/pets/{petid}", &Method::Get).is_some());
        assert!(document.operation("/pets/{petId}", &Method::Post).is_none());
    }

    #[test]
    fn missing_paths_section_yields_an_empty_document() {
        let document = OpenApiDocument::parse("openapi: 3.0.0").unwrap();
        assert!(document.is_empty());
    }

    // ── Coercion ──────────────────────────────────────────────────────────────

    #[test]
    fn numbers_coerce_and_strings_pass_through() {
        let document = OpenApiDocument::parse(PETSTORE_SLICE).unwrap();
        let types = document
            .operation("/pets/{petId}", &Method::Get)
            .unwrap()
            .parameter_types();

        assert_eq!(types.coerce_path("petId", "42"), json!(42));
        assert_eq!(types.coerce_query("limit", "2.5"), json!(2.5));
        assert_eq!(types.coerce_query("verbose", "yes"), json!("yes"));
        // Undeclared names stay verbatim.
        assert_eq!(types.coerce_query("unknown", "9"), json!("9"));
    }

    #[test]
    fn failed_numeric_parse_keeps_the_string() {
        let document = OpenApiDocument::parse(PETSTORE_SLICE).unwrap();
        let types = document
            .operation("/pets/{petId}", &Method::Get)
            .unwrap()
            .parameter_types();
        assert_eq!(types.coerce_path("petId", "seven"), json!("seven"));
    }

    #[test]
    fn declared_examples_are_extracted() {
        let document = OpenApiDocument::parse(PETSTORE_SLICE).unwrap();
        let responses = document
            .operation("/pets/{petId}", &Method::Get)
            .unwrap()
            .responses();
        let ok = responses.get("200").unwrap();
        let json_content = ok
            .content
            .iter()
            .find(|c| c.media_type == "application/json")
            .unwrap();
        assert_eq!(json_content.example, Some(json!({"id": 1, "name": "Socks"})));
        let text_content = ok
            .content
            .iter()
            .find(|c| c.media_type == "text/plain")
            .unwrap();
        assert_eq!(text_content.example, Some(json!("Socks")));
    }
}
