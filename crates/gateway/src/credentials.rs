//! Session-token → backend credential exchange, with an in-memory TTL cache.
//!
//! The [`CredentialStore`] owns every cached [`CredentialSet`] (keyed by session token) plus a
//! pointer to the "active" session. Entries live only in process memory and expire a fixed TTL
//! after they were fetched; use does not extend them.

use crate::config::{CredentialMapping, GatewayConfig};
use apigate_http_tools::AuthProjection;
use apigate_http_tools::safety::sanitize_reqwest_error;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Source of "now" for expiry checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    /// Gateway answered 401.
    Unauthorized,
    /// Gateway answered 403.
    Forbidden,
    /// Gateway answered 404: no credentials registered for this user/service.
    NotConfigured,
    /// Gateway answered 5xx.
    Unavailable,
    /// Gateway answered some other non-2xx status.
    UnexpectedStatus,
    ConnectFailed,
    Timeout,
    /// Body was not an object or lacked a configured credential.
    MalformedResponse,
    /// No active, unexpired session.
    NotAuthenticated,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    #[must_use]
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn not_authenticated() -> Self {
        Self::new(
            GatewayErrorKind::NotAuthenticated,
            "Not authenticated. Set a session token first.",
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Short, non-reversible token identifier for logs.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let digest = hex::encode(Sha256::digest(token.as_bytes()));
    format!("sha256:{}", &digest[..12])
}

/// Backend credentials obtained for one session token.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    values: BTreeMap<String, String>,
    fetched_at: DateTime<Utc>,
    ttl_seconds: u64,
}

impl CredentialSet {
    #[must_use]
    pub fn new(
        values: BTreeMap<String, String>,
        fetched_at: DateTime<Utc>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            values,
            fetched_at,
            ttl_seconds,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// `fetched_at + ttl`, saturating at the maximum representable time.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| self.fetched_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Strictly after `expires_at`: a set is still valid at the exact expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Project the values through `mappings` into request query parameters and headers.
    #[must_use]
    pub fn project(&self, mappings: &[CredentialMapping]) -> AuthProjection {
        let mut projection = AuthProjection::default();
        for mapping in mappings {
            let Some(value) = self.get(&mapping.name) else {
                continue;
            };
            let rendered = mapping.render(value);
            if let Some(param) = &mapping.query_param {
                projection.query.push((param.clone(), rendered));
            } else if let Some(header) = &mapping.header {
                projection.headers.push((header.clone(), rendered));
            }
        }
        projection
    }
}

// Values are secrets.
impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("names", &self.values.keys().collect::<Vec<_>>())
            .field("fetched_at", &self.fetched_at)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

/// Exchanges a session token for the raw credential document.
#[async_trait]
pub trait CredentialAuthority: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`GatewayError`] classifying the transport or status failure.
    async fn fetch(&self, session_token: &str) -> Result<Value>;

    /// Where credentials come from (for status reporting).
    fn describe(&self) -> String;
}

/// `GET {gatewayUrl}{gatewayEndpoint}` with `Authorization: Bearer <token>` and `X-API-Key`.
pub struct HttpCredentialAuthority {
    client: reqwest::Client,
    gateway_url: String,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpCredentialAuthority {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        gateway_url: &str,
        endpoint: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let base = gateway_url.trim_end_matches('/');
        let url = if endpoint.starts_with('/') {
            format!("{base}{endpoint}")
        } else {
            format!("{base}/{endpoint}")
        };
        Self {
            client,
            gateway_url: gateway_url.to_string(),
            url,
            api_key: api_key.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(client: reqwest::Client, cfg: &GatewayConfig) -> Self {
        Self::new(
            client,
            &cfg.auth.gateway_url,
            &cfg.gateway_endpoint(),
            cfg.auth.api_key.clone(),
            cfg.auth_timeout(),
        )
    }
}

#[async_trait]
impl CredentialAuthority for HttpCredentialAuthority {
    async fn fetch(&self, session_token: &str) -> Result<Value> {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(session_token)
            .header("X-API-Key", &self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    GatewayErrorKind::Timeout
                } else {
                    GatewayErrorKind::ConnectFailed
                };
                GatewayError::new(
                    kind,
                    format!("Auth gateway request failed: {}", sanitize_reqwest_error(&e)),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let (kind, message) = match status.as_u16() {
                401 => (
                    GatewayErrorKind::Unauthorized,
                    "Session token is invalid or expired".to_string(),
                ),
                403 => (
                    GatewayErrorKind::Forbidden,
                    "Access to this service is not permitted for this session".to_string(),
                ),
                404 => (
                    GatewayErrorKind::NotConfigured,
                    "No credentials are registered for this service; configure them in the auth gateway".to_string(),
                ),
                s if status.is_server_error() => (
                    GatewayErrorKind::Unavailable,
                    format!("Auth gateway unavailable (HTTP {s})"),
                ),
                s => (
                    GatewayErrorKind::UnexpectedStatus,
                    format!("Auth gateway returned HTTP {s}"),
                ),
            };
            return Err(GatewayError::new(kind, message));
        }

        response.json::<Value>().await.map_err(|e| {
            GatewayError::new(
                if e.is_timeout() {
                    GatewayErrorKind::Timeout
                } else {
                    GatewayErrorKind::MalformedResponse
                },
                format!("Auth gateway response unreadable: {}", sanitize_reqwest_error(&e)),
            )
        })
    }

    fn describe(&self) -> String {
        self.gateway_url.clone()
    }
}

/// Extract credential values from a gateway document (`{"data": {...}}` or a bare object).
///
/// Every mapped name must be present with a scalar value; numbers and booleans are stringified.
///
/// # Errors
///
/// Returns [`GatewayErrorKind::MalformedResponse`] otherwise.
pub fn parse_credentials(
    body: &Value,
    mappings: &[CredentialMapping],
) -> Result<BTreeMap<String, String>> {
    let malformed = |msg: String| GatewayError::new(GatewayErrorKind::MalformedResponse, msg);

    let Some(outer) = body.as_object() else {
        return Err(malformed("Auth gateway response is not a JSON object".into()));
    };
    let obj = match outer.get("data") {
        Some(Value::Object(inner)) => inner,
        _ => outer,
    };

    let mut values = BTreeMap::new();
    for (name, value) in obj {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        values.insert(name.clone(), text);
    }

    let missing: Vec<&str> = mappings
        .iter()
        .map(|m| m.name.as_str())
        .filter(|name| !values.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(malformed(format!(
            "Auth gateway response is missing credentials: {}",
            missing.join(", ")
        )));
    }
    Ok(values)
}

/// Active session summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_fingerprint: Option<String>,
    pub gateway_url: String,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, CredentialSet>,
    active: Option<String>,
}

/// A caller's hold on a token's fetch gate.
///
/// The map entry is removed when the last holder drops out, including holders whose future was
/// cancelled mid-wait, so every caller that overlaps a fetch shares the same gate.
struct InflightSlot<'a> {
    store: &'a CredentialStore,
    token: &'a str,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InflightSlot<'a> {
    fn join(store: &'a CredentialStore, token: &'a str) -> Self {
        let gate = store
            .inflight
            .lock()
            .entry(token.to_string())
            .or_default()
            .clone();
        Self { store, token, gate }
    }
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        let mut inflight = self.store.inflight.lock();
        // Clones are only taken under this lock: two references means the map's and ours.
        let last = inflight
            .get(self.token)
            .is_some_and(|current| Arc::ptr_eq(current, &self.gate))
            && Arc::strong_count(&self.gate) == 2;
        if last {
            inflight.remove(self.token);
        }
    }
}

pub struct CredentialStore {
    authority: Arc<dyn CredentialAuthority>,
    mappings: Vec<CredentialMapping>,
    ttl_seconds: u64,
    clock: Clock,
    state: Mutex<StoreState>,
    // One async lock per token with a fetch in progress.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(
        authority: Arc<dyn CredentialAuthority>,
        mappings: Vec<CredentialMapping>,
        ttl: Duration,
    ) -> Self {
        Self::with_clock(authority, mappings, ttl, Arc::new(Utc::now))
    }

    #[must_use]
    pub fn with_clock(
        authority: Arc<dyn CredentialAuthority>,
        mappings: Vec<CredentialMapping>,
        ttl: Duration,
        clock: Clock,
    ) -> Self {
        Self {
            authority,
            mappings,
            ttl_seconds: ttl.as_secs(),
            clock,
            state: Mutex::new(StoreState::default()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Credentials for `session_token`, from cache when unexpired, otherwise fetched and cached.
    /// Either way the token becomes the active session.
    ///
    /// Concurrent calls for the same token perform a single fetch.
    ///
    /// # Errors
    ///
    /// Returns the fetch or parse failure; nothing is cached in that case.
    pub async fn authenticate(&self, session_token: &str) -> Result<CredentialSet> {
        if let Some(set) = self.activate_cached(session_token) {
            return Ok(set);
        }

        let slot = InflightSlot::join(self, session_token);
        let _guard = slot.gate.lock().await;
        match self.activate_cached(session_token) {
            Some(set) => Ok(set),
            None => self.fetch_and_store(session_token).await,
        }
    }

    /// Query parameters for the active session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayErrorKind::NotAuthenticated`] without an active, unexpired session.
    pub fn auth_params(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.projection()?.query.into_iter().collect())
    }

    /// Headers for the active session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayErrorKind::NotAuthenticated`] without an active, unexpired session.
    pub fn auth_headers(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.projection()?.headers.into_iter().collect())
    }

    /// Query parameters and headers for the active session, in mapping order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayErrorKind::NotAuthenticated`] without an active, unexpired session.
    pub fn projection(&self) -> Result<AuthProjection> {
        self.active_set()
            .map(|set| set.project(&self.mappings))
            .ok_or_else(GatewayError::not_authenticated)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.active_set().is_some()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let state = self.state.lock();
        let now = (self.clock)();
        let active = state.active.as_ref().and_then(|token| {
            state
                .entries
                .get(token)
                .filter(|set| !set.is_expired_at(now))
                .map(|set| (token, set))
        });
        SessionStatus {
            authenticated: active.is_some(),
            expires_at: active.map(|(_, set)| set.expires_at()),
            token_fingerprint: active.map(|(token, _)| token_fingerprint(token)),
            gateway_url: self.authority.describe(),
        }
    }

    /// Evict one token's entry, or every entry when `session_token` is `None`.
    pub fn clear(&self, session_token: Option<&str>) {
        let mut state = self.state.lock();
        match session_token {
            Some(token) => {
                state.entries.remove(token);
                if state.active.as_deref() == Some(token) {
                    state.active = None;
                }
                tracing::info!("Cleared cached credentials for {}", token_fingerprint(token));
            }
            None => {
                state.entries.clear();
                state.active = None;
                tracing::info!("Cleared all cached credentials");
            }
        }
    }

    /// Evict the active session's entry (no-op without one).
    pub fn logout(&self) {
        let active = self.state.lock().active.clone();
        if let Some(token) = active {
            self.clear(Some(&token));
        }
    }

    #[must_use]
    pub fn cached_sessions(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn active_set(&self) -> Option<CredentialSet> {
        let state = self.state.lock();
        let set = state.entries.get(state.active.as_ref()?)?;
        (!set.is_expired_at((self.clock)())).then(|| set.clone())
    }

    fn activate_cached(&self, session_token: &str) -> Option<CredentialSet> {
        let now = (self.clock)();
        let mut state = self.state.lock();
        let set = state.entries.get(session_token).cloned()?;
        if set.is_expired_at(now) {
            state.entries.remove(session_token);
            return None;
        }
        state.active = Some(session_token.to_string());
        tracing::debug!("Using cached credentials for {}", token_fingerprint(session_token));
        Some(set)
    }

    async fn fetch_and_store(&self, session_token: &str) -> Result<CredentialSet> {
        let fingerprint = token_fingerprint(session_token);
        let body = self.authority.fetch(session_token).await.inspect_err(|e| {
            tracing::warn!("Credential fetch failed for {fingerprint}: {e}");
        })?;
        let values = parse_credentials(&body, &self.mappings).inspect_err(|e| {
            tracing::warn!("Credential fetch failed for {fingerprint}: {e}");
        })?;

        let set = CredentialSet::new(values, (self.clock)(), self.ttl_seconds);
        tracing::info!(
            "Cached credentials for {fingerprint} (expires {})",
            set.expires_at().to_rfc3339()
        );
        let mut state = self.state.lock();
        state.entries.insert(session_token.to_string(), set.clone());
        state.active = Some(session_token.to_string());
        Ok(set)
    }
}
