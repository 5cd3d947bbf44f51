//! Executes compiled operations against the target API.

use crate::error::{ExecutorError, Result};
use crate::request::{Arguments, AuthProjection, RequestParts, build_request_parts, build_url};
use crate::retry::RetryPolicy;
use crate::safety::{OutboundPolicy, redact_url};
use apigate_openapi_tools::Operation;
use base64::Engine as _;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub outbound: OutboundPolicy,
    /// Sent on every request before the auth headers.
    pub default_headers: Vec<(String, String)>,
}

impl ExecutorSettings {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            outbound: OutboundPolicy::default(),
            default_headers: Vec::new(),
        }
    }
}

/// Shared, cloneable executor. Holds no per-call state.
#[derive(Clone)]
pub struct OperationExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    settings: ExecutorSettings,
}

impl OperationExecutor {
    /// # Errors
    ///
    /// Returns [`ExecutorError::Config`] if the base URL does not parse.
    pub fn new(client: Client, settings: ExecutorSettings) -> Result<Self> {
        Url::parse(&settings.base_url).map_err(|e| {
            ExecutorError::Config(format!("invalid base URL '{}': {e}", settings.base_url))
        })?;
        Ok(Self {
            inner: Arc::new(Inner { client, settings }),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.settings.base_url
    }

    /// Perform `op` with `args`, retrying transient failures.
    ///
    /// Successful responses are decoded as JSON; bodies that are not JSON come back as a string,
    /// and bodies that are not UTF-8 as a `{"encoding": "base64", ...}` object.
    ///
    /// # Errors
    ///
    /// - [`ExecutorError::InvalidArguments`] before any network call
    /// - [`ExecutorError::Status`] / [`ExecutorError::Transport`] for non-retryable failures
    /// - [`ExecutorError::RetriesExhausted`] once the attempt budget is spent
    pub async fn invoke(
        &self,
        op: &Operation,
        args: &Arguments,
        auth: &AuthProjection,
    ) -> Result<Value> {
        let settings = &self.inner.settings;
        let parts = build_request_parts(op, args, auth)?;
        let url = build_url(&settings.base_url, &parts.path, &parts.query)?;
        settings.outbound.check_url(&url).await?;

        tracing::debug!("{} {} {}", op.name(), op.method(), redact_url(&url));
        let method = op.method().as_reqwest();
        let (url, parts) = (&url, &parts);
        settings
            .retry
            .run(op.name(), move |_attempt| {
                self.send_once(method.clone(), url, parts)
            })
            .await
    }

    async fn send_once(
        &self,
        method: reqwest::Method,
        url: &Url,
        parts: &RequestParts,
    ) -> Result<Value> {
        let settings = &self.inner.settings;
        let mut request = self
            .inner
            .client
            .request(method, url.clone())
            .timeout(settings.timeout);
        for (key, value) in settings.default_headers.iter().chain(&parts.headers) {
            request = request.header(key, value);
        }
        if let Some(body) = &parts.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let bytes = read_body_limited(response, settings.outbound.max_response_bytes).await?;

        if status.is_success() {
            return Ok(decode_body(&bytes, content_type.as_deref()));
        }
        Err(ExecutorError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

async fn read_body_limited(
    mut response: reqwest::Response,
    max: Option<usize>,
) -> Result<Vec<u8>> {
    let Some(max) = max else {
        return Ok(response.bytes().await?.to_vec());
    };
    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(ExecutorError::Blocked(format!(
            "response too large: {len} bytes (limit {max})"
        )));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(ExecutorError::Blocked(format!(
                "response too large: exceeded {max} bytes"
            )));
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

fn decode_body(bytes: &[u8], content_type: Option<&str>) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        Err(_) => json!({
            "encoding": "base64",
            "mimeType": content_type,
            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        }),
    }
}
