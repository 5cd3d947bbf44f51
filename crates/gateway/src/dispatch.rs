//! The facade the transport layer talks to: session management plus one generic
//! "call operation by name" entry point over the compiled registry.

use crate::config::{ConfigError, GatewayConfig};
use crate::credentials::{
    CredentialAuthority, CredentialStore, GatewayError, HttpCredentialAuthority, SessionStatus,
};
use crate::tool_policy::{PolicyAction, PolicyEngine, RiskLevel};
use apigate_http_tools::{
    Arguments, ExecutorError, ExecutorSettings, OperationExecutor, TransportKind,
};
use apigate_openapi_tools::error::OpenApiToolsError;
use apigate_openapi_tools::{HttpMethod, OperationRegistry, compile, loader};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Upstream error details are cut to this many chars.
pub const MAX_ERROR_DETAIL_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    /// Blocked by policy; no network call was made.
    #[error("Operation '{name}' is not permitted by policy")]
    NotPermitted { name: String },

    #[error("Operation '{name}' ({risk} risk) requires explicit confirmation")]
    ConfirmationRequired { name: String, risk: RiskLevel },

    #[error("Authentication error: {0}")]
    Authentication(#[from] GatewayError),

    #[error("missing required arguments: {}", .missing.join(", "))]
    InvalidArguments { missing: Vec<String> },

    #[error("{0}")]
    Validation(String),

    #[error("{}", upstream_message(.status, .detail))]
    Upstream { status: Option<u16>, detail: String },
}

fn upstream_message(status: &Option<u16>, detail: &str) -> String {
    match status {
        Some(s) => format!("API error ({s}): {detail}"),
        None => format!("API error: {detail}"),
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Failures while assembling a [`Dispatcher`] from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Spec(#[from] OpenApiToolsError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<ExecutorError> for DispatchError {
    fn from(err: ExecutorError) -> Self {
        let attempts = match &err {
            ExecutorError::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        };
        let detail = match err.last() {
            ExecutorError::InvalidArguments { missing } => {
                return Self::InvalidArguments {
                    missing: missing.clone(),
                };
            }
            ExecutorError::Status { body, .. } => body.clone(),
            ExecutorError::Transport {
                kind: TransportKind::Timeout,
                message,
            } => format!("request timed out: {message}"),
            ExecutorError::Transport { message, .. } => format!("connection failed: {message}"),
            other => other.to_string(),
        };
        let detail = match attempts {
            Some(n) => format!("{} (after {n} attempts)", truncate_chars(&detail)),
            None => truncate_chars(&detail),
        };
        Self::Upstream {
            status: err.status(),
            detail,
        }
    }
}

fn truncate_chars(s: &str) -> String {
    match s.char_indices().nth(MAX_ERROR_DETAIL_CHARS) {
        Some((cut, _)) => s[..cut].to_string(),
        None => s.to_string(),
    }
}

/// One registry entry as shown to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub method: HttpMethod,
    pub path: String,
    pub description: String,
    pub risk: RiskLevel,
    pub action: PolicyAction,
    /// False when a blocked pattern applies (and critical operations are not enabled).
    pub callable: bool,
    pub input_schema: Value,
}

/// Outcome of [`Dispatcher::clear_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutOutcome {
    pub was_authenticated: bool,
}

pub struct Dispatcher {
    registry: OperationRegistry,
    executor: OperationExecutor,
    credentials: Arc<CredentialStore>,
    policy: PolicyEngine,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: OperationRegistry,
        executor: OperationExecutor,
        credentials: Arc<CredentialStore>,
        policy: PolicyEngine,
    ) -> Self {
        Self {
            registry,
            executor,
            credentials,
            policy,
        }
    }

    /// Load the API description, compile it and wire every component from `cfg`.
    ///
    /// # Errors
    ///
    /// Returns a [`SetupError`] if the config is invalid or the description cannot be loaded.
    pub async fn from_config(cfg: &GatewayConfig) -> std::result::Result<Self, SetupError> {
        cfg.validate()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SetupError::Client(e.to_string()))?;

        let spec = loader::load_spec(&cfg.spec_source(), &client, cfg.api_timeout()).await?;
        let registry = compile(&spec, &cfg.compile_config())?;

        let settings = ExecutorSettings {
            base_url: cfg.api.base_url.clone(),
            timeout: cfg.api_timeout(),
            retry: cfg.retry.clone(),
            outbound: cfg.outbound_policy(),
            default_headers: cfg
                .api
                .default_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let executor = OperationExecutor::new(client.clone(), settings)?;

        let authority: Arc<dyn CredentialAuthority> =
            Arc::new(HttpCredentialAuthority::from_config(client, cfg));
        let credentials = Arc::new(CredentialStore::new(
            authority,
            cfg.auth.credentials.clone(),
            cfg.credentials_ttl(),
        ));
        let policy = PolicyEngine::new(&cfg.policies)?;

        tracing::info!(
            "{}: {} operations available against {}",
            cfg.display_name(),
            registry.len(),
            executor.base_url()
        );
        let blocked = policy.blocked_patterns();
        if !blocked.is_empty() {
            tracing::info!("Blocked operation patterns: {}", blocked.join(", "));
        }
        Ok(Self::new(registry, executor, credentials, policy))
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Exchange `token` for credentials and make it the active session.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Validation`] for a blank token, [`DispatchError::Authentication`] when
    /// the exchange fails.
    pub async fn set_session_token(&self, token: &str) -> Result<SessionStatus> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DispatchError::Validation(
                "Session token is empty; provide the token issued by the auth gateway".into(),
            ));
        }
        self.credentials.authenticate(token).await?;
        Ok(self.credentials.status())
    }

    pub fn clear_session(&self) -> LogoutOutcome {
        let was_authenticated = self.credentials.is_authenticated();
        self.credentials.logout();
        LogoutOutcome { was_authenticated }
    }

    #[must_use]
    pub fn session_status(&self) -> SessionStatus {
        self.credentials.status()
    }

    #[must_use]
    pub fn list_operations(&self) -> Vec<OperationSummary> {
        self.registry
            .iter()
            .map(|op| {
                let decision = self.policy.classify(op.name());
                OperationSummary {
                    name: op.name().to_string(),
                    operation_id: op.operation_id().map(str::to_string),
                    summary: op.summary().map(str::to_string),
                    method: op.method(),
                    path: op.path_template().to_string(),
                    description: op.description(),
                    risk: decision.risk,
                    action: decision.action,
                    callable: !self.policy.is_blocked(op.name()),
                    input_schema: op.input_schema(),
                }
            })
            .collect()
    }

    /// Run operation `name` with `args` (a JSON object, or `null` for none).
    ///
    /// Policy is checked before credentials, and both before any network call.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`].
    pub async fn call(&self, name: &str, args: &Value, confirmed: bool) -> Result<Value> {
        let op = self
            .registry
            .get(name)
            .ok_or_else(|| DispatchError::UnknownOperation(name.to_string()))?;

        if self.policy.is_blocked(name) {
            tracing::warn!("Refused blocked operation {name}");
            return Err(DispatchError::NotPermitted {
                name: name.to_string(),
            });
        }
        if !confirmed && self.policy.requires_confirmation(name) {
            return Err(DispatchError::ConfirmationRequired {
                name: name.to_string(),
                risk: self.policy.classify(name).risk,
            });
        }

        let args: Arguments = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Arguments::new(),
            other => {
                return Err(DispatchError::Validation(format!(
                    "arguments must be a JSON object, got {}",
                    json_type(other)
                )));
            }
        };

        let auth = self.credentials.projection()?;
        match self.executor.invoke(&op, &args, &auth).await {
            Ok(value) => {
                self.policy
                    .log_execution(name, &args, Some("success"), None);
                Ok(value)
            }
            Err(err) => {
                let err = DispatchError::from(err);
                self.policy
                    .log_execution(name, &args, None, Some(&err.to_string()));
                Err(err)
            }
        }
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
