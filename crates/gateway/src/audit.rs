//! Audit trail for executed operations.
//!
//! Records are emitted as `tracing` events under the `apigate::audit` target: `info` for
//! successful calls, `warn` for failed ones.

use crate::tool_policy::{PolicyAction, PolicyEngine, RiskLevel};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub const AUDIT_TARGET: &str = "apigate::audit";

/// Replacement for values under sensitive keys.
pub const REDACTED: &str = "[REDACTED]";

/// Strings longer than this (in chars) are cut and suffixed with `...`.
pub const MAX_VALUE_CHARS: usize = 100;

const SENSITIVE_KEYS: [&str; 7] = [
    "key",
    "token",
    "password",
    "secret",
    "credential",
    "api_key",
    "apikey",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub operation: String,
    pub risk_level: RiskLevel,
    pub action: PolicyAction,
    pub params: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Copy of `params` safe to log: sensitive keys redacted, long strings truncated, at any depth.
#[must_use]
pub fn sanitize_params(params: &Map<String, Value>) -> Map<String, Value> {
    params
        .iter()
        .map(|(key, value)| {
            let safe = if is_sensitive(key) {
                Value::String(REDACTED.to_string())
            } else {
                sanitize_value(value)
            };
            (key.clone(), safe)
        })
        .collect()
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate(s)),
        Value::Object(map) => Value::Object(sanitize_params(map)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

fn is_sensitive(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lowered.contains(s))
}

fn truncate(s: &str) -> String {
    match s.char_indices().nth(MAX_VALUE_CHARS) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

impl PolicyEngine {
    /// Emit an audit record for one execution, if `name` is audited.
    ///
    /// Returns the record that was emitted.
    pub fn log_execution(
        &self,
        name: &str,
        params: &Map<String, Value>,
        result_summary: Option<&str>,
        error: Option<&str>,
    ) -> Option<AuditRecord> {
        if !self.should_log(name) {
            return None;
        }
        let decision = self.classify(name);
        let record = AuditRecord {
            operation: name.to_string(),
            risk_level: decision.risk,
            action: decision.action,
            params: sanitize_params(params),
            result: result_summary.map(str::to_string),
            error: error.map(str::to_string),
            timestamp: Utc::now(),
        };
        emit(&record);
        Some(record)
    }
}

fn emit(record: &AuditRecord) {
    let params = Value::Object(record.params.clone());
    match &record.error {
        Some(error) => tracing::warn!(
            target: AUDIT_TARGET,
            operation = %record.operation,
            risk = %record.risk_level,
            action = %record.action,
            params = %params,
            error = %error,
            "operation failed"
        ),
        None => tracing::info!(
            target: AUDIT_TARGET,
            operation = %record.operation,
            risk = %record.risk_level,
            action = %record.action,
            params = %params,
            result = record.result.as_deref().unwrap_or_default(),
            "operation executed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn redacts_sensitive_keys_case_insensitively() {
        let safe = sanitize_params(&params(json!({
            "apiKey": "k",
            "X-Auth-Token": "t",
            "user_password": "p",
            "board_id": "b1",
            "limit": 10,
            "monkey": "banana"
        })));
        assert_eq!(safe["apiKey"], REDACTED);
        assert_eq!(safe["X-Auth-Token"], REDACTED);
        assert_eq!(safe["user_password"], REDACTED);
        assert_eq!(safe["board_id"], "b1");
        assert_eq!(safe["limit"], 10);
        // Substring match: "monkey" contains "key".
        assert_eq!(safe["monkey"], REDACTED);
    }

    #[test]
    fn truncates_long_strings_at_any_depth() {
        let long = "é".repeat(150);
        let safe = sanitize_params(&params(json!({
            "description": long,
            "body": {"text": long, "secret": "s", "tags": [long]},
            "short": "ok"
        })));
        let expected = format!("{}...", "é".repeat(MAX_VALUE_CHARS));
        assert_eq!(safe["description"], expected);
        assert_eq!(safe["body"]["text"], expected);
        assert_eq!(safe["body"]["secret"], REDACTED);
        assert_eq!(safe["body"]["tags"][0], expected);
        assert_eq!(safe["short"], "ok");

        let exact = "x".repeat(MAX_VALUE_CHARS);
        assert_eq!(truncate(&exact), exact);
    }

    #[test]
    fn log_execution_respects_should_log() {
        let engine = PolicyEngine::new(&PolicyConfig::default()).unwrap();
        assert!(engine.log_execution("get_item", &Map::new(), None, None).is_none());

        let record = engine
            .log_execution(
                "delete_item",
                &params(json!({"id": "1", "token": "t"})),
                None,
                Some("API returned 500"),
            )
            .unwrap();
        assert_eq!(record.risk_level, RiskLevel::Medium);
        assert_eq!(record.action, PolicyAction::AllowWithLogging);
        assert_eq!(record.params["token"], REDACTED);
        assert_eq!(record.error.as_deref(), Some("API returned 500"));

        let silent = PolicyEngine::new(&PolicyConfig {
            disable_operation_logging: true,
            ..PolicyConfig::default()
        })
        .unwrap();
        assert!(silent.log_execution("delete_item", &Map::new(), None, None).is_none());
    }
}
