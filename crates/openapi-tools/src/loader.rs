//! Loading API descriptions from files or URLs.
//!
//! JSON is a subset of YAML, so every document goes through `serde_yaml` into a
//! `serde_json::Value` (document order is preserved, which keeps first-wins naming stable).

use crate::config::{HashPolicy, SpecSourceConfig};
use crate::error::{OpenApiToolsError, Result};
use crate::redact::sanitize_reqwest_error;
use reqwest::Client;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

/// Load and parse the API description named by `config.spec`.
///
/// # Errors
///
/// Returns an error if the document cannot be fetched/read, fails hash verification under
/// [`HashPolicy::Fail`], or is not valid YAML/JSON.
pub async fn load_spec(
    config: &SpecSourceConfig,
    client: &Client,
    timeout: Duration,
) -> Result<Value> {
    let content = if is_remote(&config.spec) {
        tracing::info!("Fetching OpenAPI spec from {}", config.spec);
        fetch_spec(&config.spec, client, timeout).await?
    } else {
        tracing::info!("Loading OpenAPI spec from {}", config.spec);
        std::fs::read_to_string(&config.spec).map_err(|e| {
            OpenApiToolsError::OpenApiSpecReadFile {
                path: config.spec.clone(),
                source: e,
            }
        })?
    };

    verify_hash(config, &content)?;
    parse_spec(&config.spec, &content)
}

/// Parse a YAML or JSON document.
///
/// # Errors
///
/// Returns an error if `content` is not valid YAML.
pub fn parse_spec(location: &str, content: &str) -> Result<Value> {
    serde_yaml::from_str(content).map_err(|e| OpenApiToolsError::OpenApiSpecParse {
        location: location.to_string(),
        source: e,
    })
}

/// `sha256:<hex>` digest of a document, in the format accepted by `specHash`.
#[must_use]
pub fn spec_digest(content: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content.as_bytes())))
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

async fn fetch_spec(location: &str, client: &Client, timeout: Duration) -> Result<String> {
    let url = Url::parse(location).map_err(|e| {
        OpenApiToolsError::OpenApi(format!("Invalid OpenAPI spec URL '{location}': {e}"))
    })?;

    let resp = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| OpenApiToolsError::OpenApiSpecFetch {
            url: location.to_string(),
            message: sanitize_reqwest_error(&e),
        })?;

    resp.text()
        .await
        .map_err(|e| OpenApiToolsError::OpenApiSpecReadBody {
            url: location.to_string(),
            message: sanitize_reqwest_error(&e),
        })
}

fn verify_hash(config: &SpecSourceConfig, content: &str) -> Result<()> {
    let Some(expected) = &config.spec_hash else {
        return Ok(());
    };
    let actual = spec_digest(content);
    if actual == *expected {
        return Ok(());
    }
    match config.spec_hash_policy {
        HashPolicy::Fail => Err(OpenApiToolsError::SpecHashMismatch {
            location: config.spec.clone(),
            expected: expected.clone(),
            actual,
        }),
        HashPolicy::Warn => {
            tracing::warn!(
                "Spec hash mismatch for '{}'. Expected: {}, Got: {}",
                config.spec,
                expected,
                actual
            );
            Ok(())
        }
        HashPolicy::Ignore => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SPEC_YAML: &str = r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /b:
    get:
      operationId: second
  /a:
    get:
      operationId: first
"#;

    fn source(spec: String, hash: Option<String>, policy: HashPolicy) -> SpecSourceConfig {
        SpecSourceConfig {
            spec,
            spec_hash: hash,
            spec_hash_policy: policy,
        }
    }

    #[tokio::test]
    async fn loads_yaml_file_preserving_path_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.yaml");
        fs::write(&path, SPEC_YAML).unwrap();

        let cfg = source(path.display().to_string(), None, HashPolicy::Warn);
        let spec = load_spec(&cfg, &Client::new(), Duration::from_secs(5))
            .await
            .unwrap();
        let keys: Vec<&String> = spec["paths"].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["/b", "/a"]);
    }

    #[tokio::test]
    async fn loads_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.json");
        fs::write(&path, r#"{"paths": {"/x": {"get": {"operationId": "x"}}}}"#).unwrap();

        let cfg = source(path.display().to_string(), None, HashPolicy::Warn);
        let spec = load_spec(&cfg, &Client::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(spec["paths"]["/x"]["get"]["operationId"], "x");
    }

    #[tokio::test]
    async fn hash_mismatch_fails_only_under_fail_policy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.yaml");
        fs::write(&path, SPEC_YAML).unwrap();
        let location = path.display().to_string();
        let client = Client::new();
        let wrong = Some("sha256:00".to_string());

        let err = load_spec(
            &source(location.clone(), wrong.clone(), HashPolicy::Fail),
            &client,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::SpecHashMismatch { .. }));

        load_spec(
            &source(location.clone(), wrong, HashPolicy::Warn),
            &client,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        load_spec(
            &source(location, Some(spec_digest(SPEC_YAML)), HashPolicy::Fail),
            &client,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_reported_with_path() {
        let cfg = source("/definitely/not/here.yaml".to_string(), None, HashPolicy::Ignore);
        let err = load_spec(&cfg, &Client::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
