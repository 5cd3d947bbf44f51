//! Compiled operations and the registry that owns them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The HTTP verbs an operation can be compiled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    /// Parse a path-item key (`get`, `POST`, ...). Unrecognized verbs return `None`.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "delete" => Some(Self::Delete),
            "patch" => Some(Self::Patch),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }

    #[must_use]
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A callable unit compiled from one verb + path entry of an API description.
///
/// Operations are immutable once compiled; the registry hands out shared references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub(crate) name: String,
    pub(crate) method: HttpMethod,
    pub(crate) path_template: String,
    pub(crate) operation_id: Option<String>,
    pub(crate) summary: Option<String>,
    pub(crate) required_path_params: Vec<String>,
    pub(crate) required_query_params: Vec<String>,
    pub(crate) optional_query_params: Vec<String>,
    pub(crate) has_body: bool,
}

impl Operation {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Path with `{param}` placeholders, exactly as declared.
    #[must_use]
    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    #[must_use]
    pub fn required_path_params(&self) -> &[String] {
        &self.required_path_params
    }

    #[must_use]
    pub fn required_query_params(&self) -> &[String] {
        &self.required_query_params
    }

    #[must_use]
    pub fn optional_query_params(&self) -> &[String] {
        &self.optional_query_params
    }

    /// Whether the caller may supply an opaque `body` value.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.has_body
    }

    /// Human-readable description listing the call shape.
    #[must_use]
    pub fn description(&self) -> String {
        let mut lines = vec![format!("{} {}", self.method, self.path_template)];
        if let Some(summary) = self.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            lines.push(summary.trim().to_string());
        }
        lines.push(describe_params("Required path params", &self.required_path_params));
        lines.push(describe_params("Required query params", &self.required_query_params));
        lines.push(describe_params("Optional query params", &self.optional_query_params));
        if self.has_body {
            lines.push("Optional `body`: forwarded as the JSON request body.".to_string());
        }
        lines.join("\n")
    }

    /// Argument shape as a JSON-Schema-like object (parameter names only, no types).
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for name in &self.required_path_params {
            properties.insert(name.clone(), json!({ "description": "path parameter" }));
        }
        for name in &self.required_query_params {
            properties.insert(name.clone(), json!({ "description": "query parameter" }));
        }
        for name in &self.optional_query_params {
            properties.insert(
                name.clone(),
                json!({ "description": "optional query parameter" }),
            );
        }
        if self.has_body {
            properties.insert("body".to_string(), json!({ "description": "request body" }));
        }

        let required: Vec<&String> = self
            .required_path_params
            .iter()
            .chain(&self.required_query_params)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn describe_params(label: &str, names: &[String]) -> String {
    if names.is_empty() {
        format!("{label}: none")
    } else {
        format!("{label}: {}", names.join(", "))
    }
}

/// An operation that was not registered because its name was already taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOperation {
    pub name: String,
    pub method: HttpMethod,
    pub path: String,
}

/// Name-indexed, insertion-ordered set of compiled operations.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: Vec<Arc<Operation>>,
    index: HashMap<String, usize>,
    skipped: Vec<SkippedOperation>,
}

impl OperationRegistry {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub(crate) fn insert(&mut self, op: Operation) {
        self.index.insert(op.name.clone(), self.operations.len());
        self.operations.push(Arc::new(op));
    }

    pub(crate) fn record_skipped(&mut self, skipped: SkippedOperation) {
        self.skipped.push(skipped);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Operation>> {
        self.index
            .get(name)
            .and_then(|i| self.operations.get(*i))
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Operation>> {
        self.operations.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations dropped because of a name collision, in encounter order.
    #[must_use]
    pub fn skipped(&self) -> &[SkippedOperation] {
        &self.skipped
    }
}
