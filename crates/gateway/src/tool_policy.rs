//! Risk classification for generated operations.
//!
//! Rules are evaluated top to bottom and the first match wins:
//! 1. `blockedPatterns` → `(Critical, Block)`
//! 2. `requireConfirmation` → `(High, RequireConfirmation)`
//! 3. name shape: `get_…` / `…_get_…` → `(Low, Allow)`; `delete_…` / `…_delete_…` →
//!    `(Medium, AllowWithLogging)`
//! 4. otherwise `(Low, AllowWithLogging)`
//!
//! Patterns are case-insensitive regexes matched anywhere in the name.

use crate::config::{ConfigError, PolicyConfig};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Allow,
    AllowWithLogging,
    RequireConfirmation,
    Block,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl PolicyAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::AllowWithLogging => "log",
            Self::RequireConfirmation => "confirm",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub risk: RiskLevel,
    pub action: PolicyAction,
}

impl PolicyDecision {
    const fn new(risk: RiskLevel, action: PolicyAction) -> Self {
        Self { risk, action }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    blocked: Vec<Regex>,
    confirm: Vec<Regex>,
    audit_all: bool,
    critical_enabled: bool,
    logging_disabled: bool,
}

impl PolicyEngine {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a pattern is not a valid regex.
    pub fn new(config: &PolicyConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            blocked: compile_patterns("policies.blockedPatterns", &config.blocked_patterns)?,
            confirm: compile_patterns(
                "policies.requireConfirmation",
                &config.require_confirmation,
            )?,
            audit_all: config.audit_all,
            critical_enabled: config.enable_critical_tools,
            logging_disabled: config.disable_operation_logging,
        })
    }

    /// Deterministic decision for `name`.
    ///
    /// A blocked pattern still classifies as `(Critical, Block)` when critical operations are
    /// enabled; [`PolicyEngine::is_blocked`] is what honors the override.
    #[must_use]
    pub fn classify(&self, name: &str) -> PolicyDecision {
        if matches_any(&self.blocked, name) {
            return PolicyDecision::new(RiskLevel::Critical, PolicyAction::Block);
        }
        if matches_any(&self.confirm, name) {
            return PolicyDecision::new(RiskLevel::High, PolicyAction::RequireConfirmation);
        }
        if name.contains("_get_") || name.starts_with("get_") {
            return PolicyDecision::new(RiskLevel::Low, PolicyAction::Allow);
        }
        if name.contains("_delete_") || name.starts_with("delete_") {
            return PolicyDecision::new(RiskLevel::Medium, PolicyAction::AllowWithLogging);
        }
        PolicyDecision::new(RiskLevel::Low, PolicyAction::AllowWithLogging)
    }

    #[must_use]
    pub fn is_blocked(&self, name: &str) -> bool {
        !self.critical_enabled && matches_any(&self.blocked, name)
    }

    #[must_use]
    pub fn requires_confirmation(&self, name: &str) -> bool {
        matches_any(&self.confirm, name)
            || self.classify(name).action == PolicyAction::RequireConfirmation
    }

    #[must_use]
    pub fn should_log(&self, name: &str) -> bool {
        if self.logging_disabled {
            return false;
        }
        if self.audit_all {
            return true;
        }
        matches!(
            self.classify(name).action,
            PolicyAction::AllowWithLogging | PolicyAction::RequireConfirmation
        )
    }

    /// Blocked patterns currently in force (empty when critical operations are enabled).
    #[must_use]
    pub fn blocked_patterns(&self) -> Vec<&str> {
        if self.critical_enabled {
            return Vec::new();
        }
        self.blocked.iter().map(Regex::as_str).collect()
    }
}

fn compile_patterns(field: &str, patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| ConfigError::Invalid(format!("{field}: invalid pattern '{p}': {e}")))
        })
        .collect()
}

fn matches_any(patterns: &[Regex], name: &str) -> bool {
    patterns.iter().any(|re| re.is_match(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(blocked: &[&str], confirm: &[&str]) -> PolicyEngine {
        PolicyEngine::new(&PolicyConfig {
            blocked_patterns: blocked.iter().map(ToString::to_string).collect(),
            require_confirmation: confirm.iter().map(ToString::to_string).collect(),
            ..PolicyConfig::default()
        })
        .unwrap()
    }

    fn decision(risk: RiskLevel, action: PolicyAction) -> PolicyDecision {
        PolicyDecision { risk, action }
    }

    #[test]
    fn name_shape_heuristics() {
        let e = engine(&[], &[]);
        assert_eq!(
            e.classify("delete_item"),
            decision(RiskLevel::Medium, PolicyAction::AllowWithLogging)
        );
        assert_eq!(
            e.classify("svc_delete_board"),
            decision(RiskLevel::Medium, PolicyAction::AllowWithLogging)
        );
        assert_eq!(e.classify("get_item"), decision(RiskLevel::Low, PolicyAction::Allow));
        assert_eq!(e.classify("svc_get_board"), decision(RiskLevel::Low, PolicyAction::Allow));
        assert_eq!(
            e.classify("svc_getitem"),
            decision(RiskLevel::Low, PolicyAction::AllowWithLogging)
        );
        assert_eq!(
            e.classify("svc_update_card"),
            decision(RiskLevel::Low, PolicyAction::AllowWithLogging)
        );
    }

    #[test]
    fn patterns_take_precedence_in_order() {
        let e = engine(&["delete_org"], &["^svc_delete_", "archive"]);
        assert_eq!(
            e.classify("svc_delete_organization"),
            decision(RiskLevel::Critical, PolicyAction::Block)
        );
        assert_eq!(
            e.classify("svc_delete_card"),
            decision(RiskLevel::High, PolicyAction::RequireConfirmation)
        );
        assert_eq!(
            e.classify("svc_get_ARCHIVED"),
            decision(RiskLevel::High, PolicyAction::RequireConfirmation)
        );
        assert!(e.is_blocked("SVC_DELETE_ORGANIZATION"));
        assert!(e.requires_confirmation("svc_delete_card"));
        assert!(!e.requires_confirmation("svc_get_card"));
    }

    #[test]
    fn classification_is_deterministic() {
        let e = engine(&["drop"], &["remove"]);
        for name in ["svc_drop_table", "svc_remove", "get_x", "delete_y", "other"] {
            assert_eq!(e.classify(name), e.classify(name));
        }
    }

    #[test]
    fn critical_override_unblocks_but_keeps_classification() {
        let e = PolicyEngine::new(&PolicyConfig {
            blocked_patterns: vec!["delete_org".into()],
            enable_critical_tools: true,
            ..PolicyConfig::default()
        })
        .unwrap();
        assert!(!e.is_blocked("svc_delete_org"));
        assert_eq!(
            e.classify("svc_delete_org"),
            decision(RiskLevel::Critical, PolicyAction::Block)
        );
        assert!(e.blocked_patterns().is_empty());
    }

    #[test]
    fn should_log_rules() {
        let e = engine(&[], &["danger"]);
        assert!(!e.should_log("get_item"));
        assert!(e.should_log("delete_item"));
        assert!(e.should_log("svc_danger_zone"));
        assert!(e.should_log("svc_update"));

        let all = PolicyEngine::new(&PolicyConfig {
            audit_all: true,
            ..PolicyConfig::default()
        })
        .unwrap();
        assert!(all.should_log("get_item"));

        let off = PolicyEngine::new(&PolicyConfig {
            audit_all: true,
            disable_operation_logging: true,
            ..PolicyConfig::default()
        })
        .unwrap();
        assert!(!off.should_log("delete_item"));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = PolicyEngine::new(&PolicyConfig {
            require_confirmation: vec!["[".into()],
            ..PolicyConfig::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("requireConfirmation"));
    }
}
