use anyhow::Context as _;
use apigate_gateway::GatewayConfig;
use clap::Args;
use clap::builder::BoolishValueParser;
use std::path::Path;

/// Deployment-time overrides layered on top of `service.yaml`.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    #[arg(long, env = "AUTH_GATEWAY_URL", global = true)]
    pub auth_gateway_url: Option<String>,

    #[arg(long, env = "AUTH_GATEWAY_API_KEY", global = true, hide_env_values = true)]
    pub auth_gateway_api_key: Option<String>,

    #[arg(long, env = "API_BASE_URL", global = true)]
    pub api_base_url: Option<String>,

    #[arg(long, env = "OPENAPI_SPEC_PATH", global = true)]
    pub openapi_spec_path: Option<String>,

    #[arg(long, env = "TOOL_PREFIX", global = true)]
    pub tool_prefix: Option<String>,

    #[arg(
        long,
        env = "ENABLE_CRITICAL_TOOLS",
        global = true,
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub enable_critical_tools: Option<bool>,

    #[arg(
        long,
        env = "DISABLE_OPERATION_LOGGING",
        global = true,
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub disable_operation_logging: Option<bool>,
}

impl Overrides {
    pub fn apply(&self, cfg: &mut GatewayConfig) {
        if let Some(v) = &self.auth_gateway_url {
            cfg.auth.gateway_url.clone_from(v);
        }
        if let Some(v) = &self.auth_gateway_api_key {
            cfg.auth.api_key.clone_from(v);
        }
        if let Some(v) = &self.api_base_url {
            cfg.api.base_url.clone_from(v);
        }
        if let Some(v) = &self.openapi_spec_path {
            cfg.api.spec.clone_from(v);
        }
        if let Some(v) = &self.tool_prefix {
            cfg.api.tool_prefix = Some(v.clone());
        }
        if let Some(v) = self.enable_critical_tools {
            cfg.policies.enable_critical_tools = v;
        }
        if let Some(v) = self.disable_operation_logging {
            cfg.policies.disable_operation_logging = v;
        }
    }
}

/// Read `path`, apply `overrides` and validate the result.
pub fn load_config(path: &Path, overrides: &Overrides) -> anyhow::Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let mut cfg =
        GatewayConfig::parse(&raw).with_context(|| format!("parse {}", path.display()))?;
    overrides.apply(&mut cfg);
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
service:
  name: boards
api:
  baseUrl: https://api.example.com
  spec: ./openapi.yaml
auth:
  gatewayUrl: https://auth.example.com
  apiKey: from-file
  credentials:
    - name: api_key
      queryParam: key
"#;

    fn write_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("service.yaml");
        std::fs::write(&path, CONFIG).unwrap();
        path
    }

    #[test]
    fn overrides_replace_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = Overrides {
            auth_gateway_api_key: Some("from-env".into()),
            api_base_url: Some("https://staging.example.com".into()),
            tool_prefix: Some("b".into()),
            enable_critical_tools: Some(true),
            ..Overrides::default()
        };
        let cfg = load_config(&write_config(&dir), &overrides).unwrap();
        assert_eq!(cfg.auth.api_key, "from-env");
        assert_eq!(cfg.auth.gateway_url, "https://auth.example.com");
        assert_eq!(cfg.api.base_url, "https://staging.example.com");
        assert_eq!(cfg.tool_prefix(), "b");
        assert!(cfg.policies.enable_critical_tools);
        assert!(!cfg.policies.disable_operation_logging);
    }

    #[test]
    fn overridden_values_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = Overrides {
            auth_gateway_url: Some("ftp://auth.example.com".into()),
            ..Overrides::default()
        };
        let err = load_config(&write_config(&dir), &overrides).unwrap_err();
        assert!(format!("{err:#}").contains("gatewayUrl"), "{err:#}");
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_config(Path::new("/nonexistent/service.yaml"), &Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/service.yaml"));
    }
}
