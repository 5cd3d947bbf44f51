#![allow(dead_code)]

use anyhow::Context as _;
use apigate_gateway::{Dispatcher, GatewayConfig};
use apigate_test_support::MockServer;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

pub const GATEWAY_API_KEY: &str = "gw-key";
pub const GOOD_TOKEN: &str = "good-session-token";
pub const UNREGISTERED_TOKEN: &str = "unregistered-session-token";

pub const SPEC_YAML: &str = r#"
openapi: "3.0.0"
info:
  title: Items
  version: "1"
paths:
  /items/{id}:
    parameters:
      - name: id
        in: path
        required: true
    get:
      operationId: getItem
      summary: Fetch one item
      parameters:
        - name: verbose
          in: query
    delete:
      operationId: delete_item
  /items:
    post:
      operationId: createItem
      requestBody:
        content:
          application/json: {}
  /flaky:
    get:
      operationId: flaky
  /orgs/{org}/purge:
    post:
      operationId: purgeOrg
      parameters:
        - name: org
          in: path
          required: true
"#;

#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub api_hits: Hits,
    pub gateway_hits: Hits,
    _api: MockServer,
    _gateway: MockServer,
    _dir: TempDir,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn credentials(
    State(hits): State<Hits>,
    Path(service): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, axum::Json<Value>) {
    hits.bump();
    if service != "items" || header(&headers, "x-api-key").as_deref() != Some(GATEWAY_API_KEY) {
        return (StatusCode::FORBIDDEN, axum::Json(json!({"error": "forbidden"})));
    }
    match header(&headers, "authorization").as_deref() {
        Some(v) if v == format!("Bearer {GOOD_TOKEN}") => (
            StatusCode::OK,
            axum::Json(json!({"data": {"api_key": "k-123", "access_token": "t-456"}})),
        ),
        Some(v) if v == format!("Bearer {UNREGISTERED_TOKEN}") => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({"error": "no credentials"})),
        ),
        _ => (
            StatusCode::UNAUTHORIZED,
            axum::Json(json!({"error": "bad token"})),
        ),
    }
}

async fn get_item(
    State(hits): State<Hits>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, axum::Json<Value>) {
    hits.bump();
    if query.get("key").map(String::as_str) != Some("k-123") {
        return (StatusCode::UNAUTHORIZED, axum::Json(json!({"error": "no key"})));
    }
    (
        StatusCode::OK,
        axum::Json(json!({
            "id": id,
            "query": query,
            "authorization": header(&headers, "authorization"),
        })),
    )
}

async fn delete_item(State(hits): State<Hits>, Path(id): Path<String>) -> axum::Json<Value> {
    hits.bump();
    axum::Json(json!({"deleted": id}))
}

async fn create_item(
    State(hits): State<Hits>,
    axum::Json(body): axum::Json<Value>,
) -> (StatusCode, axum::Json<Value>) {
    hits.bump();
    (StatusCode::CREATED, axum::Json(json!({"created": body})))
}

async fn flaky(State(hits): State<Hits>) -> (StatusCode, &'static str) {
    hits.bump();
    (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
}

async fn purge(State(hits): State<Hits>) -> StatusCode {
    hits.bump();
    StatusCode::NO_CONTENT
}

/// Mock API + mock auth gateway + config on disk, wired into a [`Dispatcher`].
pub async fn harness(policies: &str) -> anyhow::Result<Harness> {
    harness_with(policies, GATEWAY_API_KEY).await
}

pub async fn harness_with(policies: &str, gateway_api_key: &str) -> anyhow::Result<Harness> {
    let api_hits = Hits::default();
    let api = Router::new()
        .route("/items/{id}", get(get_item).delete(delete_item))
        .route("/items", post(create_item))
        .route("/flaky", get(flaky))
        .route("/orgs/{org}/purge", post(purge))
        .with_state(api_hits.clone());
    let api = MockServer::start(api).await?;

    let gateway_hits = Hits::default();
    let gateway = Router::new()
        .route("/credentials/{service}", get(credentials))
        .with_state(gateway_hits.clone());
    let gateway = MockServer::start(gateway).await?;

    let dir = tempfile::tempdir().context("create temp dir")?;
    let spec_path = dir.path().join("openapi.yaml");
    std::fs::write(&spec_path, SPEC_YAML).context("write spec")?;

    let config = format!(
        r#"
service:
  name: items
  displayName: Items API
api:
  baseUrl: {api_base}
  spec: {spec}
  toolPrefix: svc
  timeoutSecs: 5
auth:
  gatewayUrl: {gateway_base}
  apiKey: {gateway_api_key}
  credentialsTtlSecs: 600
  credentials:
    - name: api_key
      queryParam: key
    - name: access_token
      header: Authorization
      prefix: "Bearer "
retry:
  maxAttempts: 3
  baseDelayMs: 1
  maxDelayMs: 5
{policies}
"#,
        api_base = api.base_url(),
        spec = spec_path.display(),
        gateway_base = gateway.base_url(),
    );
    let config_path = dir.path().join("service.yaml");
    std::fs::write(&config_path, config).context("write config")?;

    let cfg = GatewayConfig::load(&config_path)?;
    let dispatcher = Dispatcher::from_config(&cfg).await?;

    Ok(Harness {
        dispatcher,
        api_hits,
        gateway_hits,
        _api: api,
        _gateway: gateway,
        _dir: dir,
    })
}
