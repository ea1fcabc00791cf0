//! Risk classification table.
//!
//! A `RiskPolicy` holds an ordered list of `RiskRule`s. Rules are evaluated
//! in declaration order and the first matching rule wins. If no rule
//! matches, the tool is classified `medium`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use steward_contracts::{
    approval::{MatchKind, RiskLevel, RiskRule},
    error::{StewardError, StewardResult},
};

/// Risk assigned when no rule matches.
pub const UNMATCHED_RISK: RiskLevel = RiskLevel::Medium;

/// The top-level structure deserialized from a standalone TOML risk file.
///
/// Example:
/// ```toml
/// [[rules]]
/// pattern = "fs.delete"
/// match = "exact"
/// risk = "critical"
/// description = "Deleting files cannot be undone"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskTable {
    /// Ordered list of rules. First match wins.
    pub rules: Vec<RiskRule>,
}

#[derive(Debug, Clone)]
pub struct RiskPolicy {
    rules: Vec<RiskRule>,
}

impl RiskPolicy {
    /// Build a policy from `rules`. An empty list selects the built-in table.
    pub fn new(rules: Vec<RiskRule>) -> Self {
        if rules.is_empty() {
            Self::default()
        } else {
            Self { rules }
        }
    }

    /// Parse `s` as a TOML `RiskTable`.
    ///
    /// Returns `StewardError::Config` if the TOML is malformed or does not
    /// match the expected schema.
    pub fn from_toml_str(s: &str) -> StewardResult<Self> {
        let table: RiskTable = toml::from_str(s).map_err(|e| StewardError::Config {
            reason: format!("failed to parse risk table TOML: {}", e),
        })?;
        Ok(Self::new(table.rules))
    }

    pub fn from_file(path: &Path) -> StewardResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| StewardError::Config {
            reason: format!("failed to read risk table '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// The built-in table: destructive verbs are high, mutating verbs are
    /// medium, read-only verbs are low, anything else is medium.
    pub fn default_rules() -> Vec<RiskRule> {
        let contains = |pattern: &str, risk| RiskRule::new(pattern, MatchKind::Contains, risk);
        vec![
            contains("delete", RiskLevel::High),
            contains("kill", RiskLevel::High),
            contains("write", RiskLevel::Medium),
            contains("exec", RiskLevel::Medium),
            contains("read", RiskLevel::Low),
            contains("list", RiskLevel::Low),
            contains("get", RiskLevel::Low),
            contains("search", RiskLevel::Low),
            RiskRule::new("*", MatchKind::Exact, UNMATCHED_RISK),
        ]
    }

    /// Classify `tool` by the first matching rule.
    pub fn classify(&self, tool: &str) -> RiskLevel {
        match self.rules.iter().find(|rule| rule.matches(tool)) {
            Some(rule) => {
                debug!(tool = %tool, pattern = %rule.pattern, risk = %rule.risk, "risk rule matched");
                rule.risk
            }
            None => UNMATCHED_RISK,
        }
    }

    pub fn rules(&self) -> &[RiskRule] {
        &self.rules
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self { rules: Self::default_rules() }
    }
}
