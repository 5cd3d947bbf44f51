use serde::{Deserialize, Serialize};

/// Default upper bound for a generated operation name (prefix included).
pub const DEFAULT_MAX_NAME_LENGTH: usize = 64;

/// Where to load an API description from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecSourceConfig {
    /// `OpenAPI` spec location (URL or file path).
    pub spec: String,

    /// Optional spec hash (`sha256:<hex>`) for version pinning.
    #[serde(default)]
    pub spec_hash: Option<String>,

    /// Hash policy: warn, fail, or ignore.
    #[serde(default)]
    pub spec_hash_policy: HashPolicy,
}

/// Hash verification policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log warning if hash doesn't match.
    #[default]
    Warn,
    /// Fail loading if hash doesn't match.
    Fail,
    /// Ignore hash verification.
    Ignore,
}

/// What to do when two operations sanitize to the same name.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Keep the first registration and drop the later one (logged and recorded).
    #[default]
    Skip,
    /// Register the later one under `<name>_2`, `<name>_3`, ...
    Suffix,
}

/// Naming rules applied while compiling operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileConfig {
    /// Prefix joined to every generated name with `_` (empty = no prefix).
    #[serde(default)]
    pub name_prefix: String,

    /// Maximum length of a full operation name, prefix included.
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,

    #[serde(default)]
    pub on_collision: CollisionPolicy,
}

fn default_max_name_length() -> usize {
    DEFAULT_MAX_NAME_LENGTH
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            name_prefix: String::new(),
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            on_collision: CollisionPolicy::Skip,
        }
    }
}

impl CompileConfig {
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: prefix.into(),
            ..Self::default()
        }
    }
}
