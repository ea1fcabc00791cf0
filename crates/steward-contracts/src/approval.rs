//! Risk levels and the approval request/result pair.
//!
//! The approval gate turns an intended tool call into an `ApprovalRequest`
//! and records exactly one `ApprovalResult` for it. Any status other than
//! `Approved` means the tool call is never issued.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StewardError;

/// Coarse classification of how dangerous a tool call is.
///
/// Variants are declared in ascending order so the derived `Ord` gives
/// `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(StewardError::Config {
                reason: format!("unknown risk level '{other}'"),
            }),
        }
    }
}

/// How a `RiskRule` pattern is compared with a tool name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Prefix,
    #[default]
    Contains,
}

/// One row of the risk classification table.
///
/// Example in TOML:
/// ```toml
/// [[security.risk_rules]]
/// pattern = "shell."
/// match = "prefix"
/// risk = "high"
/// ```
///
/// A pattern of `"*"` matches every tool regardless of `match`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRule {
    pub pattern: String,
    #[serde(default, rename = "match")]
    pub match_kind: MatchKind,
    pub risk: RiskLevel,
    #[serde(default)]
    pub description: String,
}

impl RiskRule {
    pub fn new(pattern: impl Into<String>, match_kind: MatchKind, risk: RiskLevel) -> Self {
        Self {
            pattern: pattern.into(),
            match_kind,
            risk,
            description: String::new(),
        }
    }

    pub fn matches(&self, tool: &str) -> bool {
        if self.pattern == "*" {
            return true;
        }
        match self.match_kind {
            MatchKind::Exact => tool == self.pattern,
            MatchKind::Prefix => tool.starts_with(&self.pattern),
            MatchKind::Contains => tool.contains(&self.pattern),
        }
    }
}

/// A pending request for a human decision on one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tool_name: String,
    /// `local` for built-in tool families, `mcp` for everything else.
    pub tool_type: String,
    pub params: Value,
    pub risk_level: RiskLevel,
    pub description: String,
    pub impact: String,
    /// Who or what is asking, e.g. `agent:file-organizer`.
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub timeout_secs: u64,
}

impl ApprovalRequest {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    pub fn new(
        tool_name: impl Into<String>,
        params: Value,
        risk_level: RiskLevel,
        description: impl Into<String>,
        source: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let tool_name = tool_name.into();
        Self {
            id: Uuid::new_v4(),
            tool_type: tool_type(&tool_name).to_string(),
            tool_name,
            params,
            risk_level,
            description: description.into(),
            impact: impact_of(risk_level).to_string(),
            source: source.into(),
            created_at: Utc::now(),
            timeout_secs,
        }
    }
}

/// Families of tools implemented in-process.
pub const LOCAL_TOOL_PREFIXES: [&str; 4] = ["fs.", "shell.", "process.", "net."];

/// `local` for the built-in tool families, `mcp` for everything else.
pub fn tool_type(tool: &str) -> &'static str {
    if LOCAL_TOOL_PREFIXES.iter().any(|p| tool.starts_with(p)) {
        "local"
    } else {
        "mcp"
    }
}

fn impact_of(risk: RiskLevel) -> &'static str {
    match risk {
        RiskLevel::Low => "read-only; no lasting effect expected",
        RiskLevel::Medium => "may modify files or start programs",
        RiskLevel::High => "may delete data or terminate processes",
        RiskLevel::Critical => "may cause irreversible system-wide changes",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

/// How far an approval extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    /// This call only.
    Once,
    /// This call and every later call to the same tool.
    Always,
}

/// The decision recorded on a `JobStep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Below the threshold; no human was asked.
    Auto,
    Once,
    Always,
    Rejected,
    Timeout,
}

/// The single, immutable outcome of an `ApprovalRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub request_id: Uuid,
    pub status: ApprovalStatus,
    /// Set for `Approved` results produced by a human decision.
    #[serde(default)]
    pub scope: Option<ApprovalScope>,
    pub approved_by: Option<String>,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalResult {
    /// Identity recorded on results the gate synthesizes without asking.
    pub const AUTO_APPROVER: &'static str = "auto";

    pub fn auto_approved(request_id: Uuid) -> Self {
        Self {
            request_id,
            status: ApprovalStatus::Approved,
            scope: None,
            approved_by: Some(Self::AUTO_APPROVER.to_string()),
            reason: Some("risk below confirmation threshold".to_string()),
            decided_at: Utc::now(),
        }
    }

    pub fn approved(request_id: Uuid, scope: ApprovalScope, approver: impl Into<String>) -> Self {
        Self {
            request_id,
            status: ApprovalStatus::Approved,
            scope: Some(scope),
            approved_by: Some(approver.into()),
            reason: None,
            decided_at: Utc::now(),
        }
    }

    pub fn rejected(request_id: Uuid, approver: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            status: ApprovalStatus::Rejected,
            scope: None,
            approved_by: approver,
            reason: Some(reason.into()),
            decided_at: Utc::now(),
        }
    }

    pub fn timed_out(request_id: Uuid, timeout_secs: u64) -> Self {
        Self {
            request_id,
            status: ApprovalStatus::Timeout,
            scope: None,
            approved_by: None,
            reason: Some(format!("no decision within {timeout_secs}s")),
            decided_at: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }

    /// Collapse status and scope into the value stored on the job step.
    /// `Pending` has no decision yet.
    pub fn decision(&self) -> Option<ApprovalDecision> {
        match (self.status, self.scope) {
            (ApprovalStatus::Approved, Some(ApprovalScope::Always)) => Some(ApprovalDecision::Always),
            (ApprovalStatus::Approved, Some(ApprovalScope::Once)) => Some(ApprovalDecision::Once),
            (ApprovalStatus::Approved, None) => Some(ApprovalDecision::Auto),
            (ApprovalStatus::Rejected, _) => Some(ApprovalDecision::Rejected),
            (ApprovalStatus::Timeout, _) => Some(ApprovalDecision::Timeout),
            (ApprovalStatus::Pending, _) => None,
        }
    }
}
