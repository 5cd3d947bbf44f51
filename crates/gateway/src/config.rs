//! Service configuration (`service.yaml`).

use apigate_http_tools::{OutboundPolicy, RetryPolicy};
use apigate_openapi_tools::config::{
    CollisionPolicy, CompileConfig, DEFAULT_MAX_NAME_LENGTH, HashPolicy, SpecSourceConfig,
};
use regex::RegexBuilder;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub policies: PolicyConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub base_url: String,
    /// API description location (file path or http(s) URL).
    pub spec: String,
    #[serde(default)]
    pub spec_hash: Option<String>,
    #[serde(default)]
    pub spec_hash_policy: HashPolicy,
    /// Prefix for generated operation names. Defaults to `service.name`.
    #[serde(default)]
    pub tool_prefix: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,
    #[serde(default)]
    pub on_name_collision: CollisionPolicy,
    #[serde(default)]
    pub max_response_bytes: Option<usize>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub allowed_hosts: BTreeSet<String>,
    #[serde(default = "default_true")]
    pub allow_private_networks: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub default_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    pub gateway_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Defaults to `/credentials/<service.name>`.
    #[serde(default)]
    pub gateway_endpoint: Option<String>,
    #[serde(default = "default_credentials_ttl_secs")]
    pub credentials_ttl_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub credentials: Vec<CredentialMapping>,
}

/// How one credential value is attached to outbound API requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMapping {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Prepended to the value (e.g. `"Bearer "`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl CredentialMapping {
    /// `prefix + value`.
    #[must_use]
    pub fn render(&self, value: &str) -> String {
        format!("{}{value}", self.prefix.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Case-insensitive regexes (substring search). A match blocks the operation.
    #[serde(default, deserialize_with = "null_as_default")]
    pub blocked_patterns: Vec<String>,
    /// Case-insensitive regexes. A match requires explicit confirmation.
    #[serde(default, deserialize_with = "null_as_default")]
    pub require_confirmation: Vec<String>,
    #[serde(default)]
    pub audit_all: bool,
    /// Bypass `blockedPatterns` entirely.
    #[serde(default)]
    pub enable_critical_tools: bool,
    #[serde(default)]
    pub disable_operation_logging: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_credentials_ttl_secs() -> u64 {
    3_600
}

fn default_max_name_length() -> usize {
    DEFAULT_MAX_NAME_LENGTH
}

fn default_true() -> bool {
    true
}

// `key:` with only commented-out entries below it parses as null.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl GatewayConfig {
    /// Read, parse and validate a YAML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails [`GatewayConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid YAML for this schema or fails validation.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let cfg = Self::parse(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse without validating, for callers that layer overrides before [`Self::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document does not match the schema.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service.name must not be empty".into()));
        }
        require_http_url("api.baseUrl", &self.api.base_url)?;
        require_http_url("auth.gatewayUrl", &self.auth.gateway_url)?;
        if self.api.spec.trim().is_empty() {
            return Err(ConfigError::Invalid("api.spec must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for mapping in &self.auth.credentials {
            if mapping.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "auth.credentials: every entry needs a name".into(),
                ));
            }
            if !seen.insert(mapping.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "auth.credentials: duplicate credential '{}'",
                    mapping.name
                )));
            }
            if mapping.query_param.is_some() == mapping.header.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "auth.credentials: '{}' must set exactly one of queryParam or header",
                    mapping.name
                )));
            }
        }

        for (field, patterns) in [
            ("policies.blockedPatterns", &self.policies.blocked_patterns),
            ("policies.requireConfirmation", &self.policies.require_confirmation),
        ] {
            for pattern in patterns {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        ConfigError::Invalid(format!("{field}: invalid pattern '{pattern}': {e}"))
                    })?;
            }
        }

        apigate_openapi_tools::validate_naming(&self.compile_config()).map_err(|_| {
            ConfigError::Invalid(format!(
                "api.maxNameLength ({}) leaves no room after prefix '{}'",
                self.api.max_name_length,
                self.tool_prefix()
            ))
        })?;
        Ok(())
    }

    #[must_use]
    pub fn tool_prefix(&self) -> String {
        self.api
            .tool_prefix
            .clone()
            .unwrap_or_else(|| self.service.name.clone())
    }

    #[must_use]
    pub fn gateway_endpoint(&self) -> String {
        self.auth
            .gateway_endpoint
            .clone()
            .unwrap_or_else(|| format!("/credentials/{}", self.service.name))
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.service
            .display_name
            .as_deref()
            .unwrap_or(&self.service.name)
    }

    #[must_use]
    pub fn spec_source(&self) -> SpecSourceConfig {
        SpecSourceConfig {
            spec: self.api.spec.clone(),
            spec_hash: self.api.spec_hash.clone(),
            spec_hash_policy: self.api.spec_hash_policy,
        }
    }

    #[must_use]
    pub fn compile_config(&self) -> CompileConfig {
        CompileConfig {
            name_prefix: self.tool_prefix(),
            max_name_length: self.api.max_name_length,
            on_collision: self.api.on_name_collision,
        }
    }

    #[must_use]
    pub fn outbound_policy(&self) -> OutboundPolicy {
        OutboundPolicy {
            allowed_hosts: self
                .api
                .allowed_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            allow_private_networks: self.api.allow_private_networks,
            max_response_bytes: self.api.max_response_bytes,
        }
    }

    #[must_use]
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.timeout_secs)
    }

    #[must_use]
    pub fn credentials_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.credentials_ttl_secs)
    }
}

fn require_http_url(field: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::Invalid(format!("{field}: invalid URL '{raw}': {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Invalid(format!(
            "{field}: expected an http(s) URL, got '{raw}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
service:
  name: trello
api:
  baseUrl: https://api.trello.com/1
  spec: ./openapi.json
auth:
  gatewayUrl: https://auth.example.com
  apiKey: k
  credentials:
    - name: api_key
      queryParam: key
    - name: token
      queryParam: token
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = GatewayConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(cfg.tool_prefix(), "trello");
        assert_eq!(cfg.gateway_endpoint(), "/credentials/trello");
        assert_eq!(cfg.display_name(), "trello");
        assert_eq!(cfg.api_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.credentials_ttl(), Duration::from_secs(3_600));
        assert_eq!(cfg.api.max_name_length, 64);
        assert_eq!(cfg.api.on_name_collision, CollisionPolicy::Skip);
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert!(cfg.policies.blocked_patterns.is_empty());
        assert!(cfg.outbound_policy().allow_private_networks);
    }

    #[test]
    fn full_config_round_trips_fields() {
        let raw = r#"
service:
  name: github
  displayName: GitHub
api:
  baseUrl: https://api.github.com
  spec: https://example.com/openapi.yaml
  specHash: "sha256:abc"
  specHashPolicy: fail
  toolPrefix: gh
  timeoutSecs: 10
  maxNameLength: 40
  onNameCollision: suffix
  maxResponseBytes: 1048576
  allowedHosts: [API.GitHub.com]
  defaultHeaders:
    Accept: application/vnd.github+json
auth:
  gatewayUrl: http://localhost:9000
  gatewayEndpoint: /v1/creds/github
  credentialsTtlSecs: 60
  credentials:
    - name: access_token
      header: Authorization
      prefix: "Bearer "
policies:
  blockedPatterns: ["delete_repo"]
  requireConfirmation: ["^gh_delete_"]
  auditAll: true
retry:
  maxAttempts: 5
  baseDelayMs: 200
"#;
        let cfg = GatewayConfig::from_yaml(raw).unwrap();
        assert_eq!(cfg.display_name(), "GitHub");
        assert_eq!(cfg.tool_prefix(), "gh");
        assert_eq!(cfg.gateway_endpoint(), "/v1/creds/github");
        assert_eq!(cfg.spec_source().spec_hash_policy, HashPolicy::Fail);
        assert_eq!(cfg.compile_config().max_name_length, 40);
        assert_eq!(cfg.compile_config().on_collision, CollisionPolicy::Suffix);
        assert_eq!(cfg.outbound_policy().max_response_bytes, Some(1_048_576));
        assert!(cfg.outbound_policy().allowed_hosts.contains("api.github.com"));
        assert_eq!(cfg.auth.credentials[0].render("t0k"), "Bearer t0k");
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.max_delay_ms, 30_000);
        assert!(cfg.retry.retryable_status_codes.contains(&429));
        assert!(cfg.policies.audit_all);
    }

    #[test]
    fn empty_pattern_lists_parse_as_null() {
        let raw = format!("{MINIMAL}policies:\n  blockedPatterns:\n  requireConfirmation:\n");
        let cfg = GatewayConfig::from_yaml(&raw).unwrap();
        assert!(cfg.policies.blocked_patterns.is_empty());
        assert!(cfg.policies.require_confirmation.is_empty());
    }

    #[test]
    fn rejects_ambiguous_credential_mapping() {
        let raw = MINIMAL.replace("queryParam: token", "queryParam: token\n      header: X-Token");
        let err = GatewayConfig::from_yaml(&raw).unwrap_err();
        assert!(err.to_string().contains("exactly one"), "{err}");
    }

    #[test]
    fn rejects_duplicate_credential_names() {
        let raw = MINIMAL.replace("name: token", "name: api_key");
        let err = GatewayConfig::from_yaml(&raw).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "{err}");
    }

    #[test]
    fn rejects_bad_urls_and_patterns() {
        let raw = MINIMAL.replace("https://auth.example.com", "ftp://auth.example.com");
        assert!(GatewayConfig::from_yaml(&raw).is_err());

        let raw = format!("{MINIMAL}policies:\n  blockedPatterns: [\"(unclosed\"]\n");
        let err = GatewayConfig::from_yaml(&raw).unwrap_err();
        assert!(err.to_string().contains("blockedPatterns"), "{err}");
    }

    #[test]
    fn rejects_name_length_without_room_for_prefix() {
        let raw = MINIMAL.replace("spec: ./openapi.json", "spec: ./openapi.json\n  maxNameLength: 7");
        let err = GatewayConfig::from_yaml(&raw).unwrap_err();
        assert!(err.to_string().contains("maxNameLength"), "{err}");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = GatewayConfig::load(Path::new("/nope/service.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
