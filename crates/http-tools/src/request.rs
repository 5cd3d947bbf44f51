//! Turning an [`Operation`] plus caller arguments into URL, query, headers and body.

use crate::error::{ExecutorError, Result};
use apigate_openapi_tools::Operation;
use serde_json::{Map, Value};
use std::collections::HashSet;
use url::{Url, form_urlencoded};

/// Caller-supplied arguments, keyed by parameter name (plus `body`).
pub type Arguments = Map<String, Value>;

/// Name of the argument carrying the opaque request body.
pub const BODY_ARGUMENT: &str = "body";

/// Credentials already projected into request shape by the credential layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthProjection {
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestParts {
    /// Path with every placeholder substituted (percent-encoded).
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Validate `args` against `op` and assemble the request.
///
/// A `null` argument counts as absent. Auth query parameters never replace a caller-supplied
/// parameter of the same name.
///
/// # Errors
///
/// Returns [`ExecutorError::InvalidArguments`] naming every missing required path/query
/// parameter.
pub fn build_request_parts(
    op: &Operation,
    args: &Arguments,
    auth: &AuthProjection,
) -> Result<RequestParts> {
    let present = |name: &str| args.get(name).filter(|v| !v.is_null());

    let mut missing: Vec<String> = Vec::new();
    for name in op
        .required_path_params()
        .iter()
        .chain(op.required_query_params())
    {
        if present(name).is_none() && !missing.contains(name) {
            missing.push(name.clone());
        }
    }
    if !missing.is_empty() {
        return Err(ExecutorError::InvalidArguments { missing });
    }

    let mut path = op.path_template().to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    for name in op.required_path_params() {
        if let Some(value) = present(name) {
            path = path.replace(
                &format!("{{{name}}}"),
                &encode_path_segment(&value_to_string(value)),
            );
        }
    }

    let mut query: Vec<(String, String)> = Vec::new();
    for name in op
        .required_query_params()
        .iter()
        .chain(op.optional_query_params())
    {
        if let Some(value) = present(name) {
            push_query_value(&mut query, name, value);
        }
    }
    let caller_keys: HashSet<String> = query.iter().map(|(k, _)| k.clone()).collect();
    query.extend(
        auth.query
            .iter()
            .filter(|(k, _)| !caller_keys.contains(k))
            .cloned(),
    );

    let body = if op.has_body() {
        present(BODY_ARGUMENT).cloned()
    } else {
        None
    };

    Ok(RequestParts {
        path,
        query,
        headers: auth.headers.clone(),
        body,
    })
}

/// Join `base_url` and `path`, then append the query pairs.
///
/// # Errors
///
/// Returns [`ExecutorError::Config`] if the result is not a valid URL.
pub fn build_url(base_url: &str, path: &str, query: &[(String, String)]) -> Result<Url> {
    let raw = format!("{}{}", base_url.trim_end_matches('/'), path);
    let mut url =
        Url::parse(&raw).map_err(|e| ExecutorError::Config(format!("invalid URL '{raw}': {e}")))?;

    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

// Arrays become repeated keys; null elements are dropped.
fn push_query_value(query: &mut Vec<(String, String)>, name: &str, value: &Value) {
    match value {
        Value::Array(items) => query.extend(
            items
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| (name.to_string(), value_to_string(v))),
        ),
        other => query.push((name.to_string(), value_to_string(other))),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// Form encoding escapes a literal `+`, so the remaining `+`s are spaces.
fn encode_path_segment(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_openapi_tools::compile;
    use apigate_openapi_tools::config::CompileConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn operation(spec: Value, name: &str) -> Arc<Operation> {
        let registry = compile(&spec, &CompileConfig::with_prefix("svc")).unwrap();
        registry.get(name).unwrap()
    }

    fn args(v: Value) -> Arguments {
        v.as_object().cloned().unwrap()
    }

    fn item_op() -> Arc<Operation> {
        operation(
            json!({"paths": {"/items/{id}": {"put": {
                "operationId": "updateItem",
                "parameters": [
                    {"name": "id", "in": "path", "required": true},
                    {"name": "version", "in": "query", "required": true},
                    {"name": "tags", "in": "query"},
                    {"name": "verbose", "in": "query"}
                ],
                "requestBody": {"content": {}}
            }}}}),
            "svc_updateitem",
        )
    }

    #[test]
    fn reports_every_missing_name_once() {
        let op = item_op();
        let err = build_request_parts(
            &op,
            &args(json!({"version": null, "tags": ["a"]})),
            &AuthProjection::default(),
        )
        .unwrap_err();
        match err {
            ExecutorError::InvalidArguments { missing } => assert_eq!(missing, ["id", "version"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn substitutes_path_and_collects_query() {
        let op = item_op();
        let parts = build_request_parts(
            &op,
            &args(json!({
                "id": "a b/c",
                "version": 3,
                "tags": ["x", null, "y"],
                "verbose": null,
                "body": {"name": "widget"}
            })),
            &AuthProjection::default(),
        )
        .unwrap();

        assert_eq!(parts.path, "/items/a%20b%2Fc");
        assert_eq!(
            parts.query,
            [
                ("version".to_string(), "3".to_string()),
                ("tags".to_string(), "x".to_string()),
                ("tags".to_string(), "y".to_string()),
            ]
        );
        assert_eq!(parts.body, Some(json!({"name": "widget"})));
    }

    #[test]
    fn path_segments_escape_plus_and_non_ascii() {
        assert_eq!(encode_path_segment("c++ ü"), "c%2B%2B%20%C3%BC");
        assert_eq!(encode_path_segment("a-b_c.d"), "a-b_c.d");
        assert_eq!(encode_path_segment("?#&"), "%3F%23%26");
    }

    #[test]
    fn caller_query_values_win_over_auth() {
        let op = operation(
            json!({"paths": {"/search": {"get": {
                "operationId": "search",
                "parameters": [{"name": "api_key", "in": "query"}]
            }}}}),
            "svc_search",
        );
        let auth = AuthProjection {
            query: vec![
                ("api_key".to_string(), "from-auth".to_string()),
                ("account".to_string(), "42".to_string()),
            ],
            headers: vec![("Authorization".to_string(), "Bearer t".to_string())],
        };

        let parts = build_request_parts(&op, &args(json!({"api_key": "mine"})), &auth).unwrap();
        assert_eq!(
            parts.query,
            [
                ("api_key".to_string(), "mine".to_string()),
                ("account".to_string(), "42".to_string()),
            ]
        );
        assert_eq!(parts.headers, auth.headers);

        let parts = build_request_parts(&op, &Arguments::new(), &auth).unwrap();
        assert_eq!(parts.query, auth.query);
    }

    #[test]
    fn body_is_dropped_when_operation_declares_none() {
        let op = operation(
            json!({"paths": {"/ping": {"post": {"operationId": "ping"}}}}),
            "svc_ping",
        );
        let parts = build_request_parts(
            &op,
            &args(json!({"body": {"ignored": true}})),
            &AuthProjection::default(),
        )
        .unwrap();
        assert_eq!(parts.body, None);
    }

    #[test]
    fn build_url_joins_and_encodes() {
        let url = build_url(
            "http://localhost:8080/api/",
            "/items/1",
            &[("q".to_string(), "a&b=c d".to_string())],
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/items/1?q=a%26b%3Dc+d");

        assert!(matches!(
            build_url("not a url", "/x", &[]),
            Err(ExecutorError::Config(_))
        ));
    }
}
