//! Threshold-based approval gate.
//!
//! `ThresholdGate` implements the `ApprovalGate` trait from steward-core.
//!
//! Decision algorithm for one `ApprovalRequest`:
//!
//! 1. Risk below the confirmation threshold → auto-approved, nobody asked.
//! 2. Tool previously approved with scope `always` → auto-approved with
//!    scope `always`.
//! 3. No decision source registered → rejected.
//! 4. Otherwise ask the decision source and wait at most
//!    `request.timeout_secs`. Elapsed → `timeout`; a failed or dropped
//!    source → rejected.
//!
//! Every request/result pair is appended to the history and, unless
//! `auto_audit` is off, written to the audit sink before the result is
//! returned. Both keep a redacted copy of the request. If the audit write
//! fails, an approval is downgraded to a rejection.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use steward_contracts::{
    approval::{ApprovalRequest, ApprovalResult, ApprovalScope, ApprovalStatus, RiskLevel},
    config::SecurityConfig,
};
use steward_core::traits::{ApprovalAudit, ApprovalGate, DecisionSource};

use crate::redact::Redactor;
use crate::rule::RiskPolicy;

/// One entry of the gate's decision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub request: ApprovalRequest,
    pub result: ApprovalResult,
}

/// Counts over the decision history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStats {
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
    pub timeout: usize,
    /// `approved / total`, or 0 when nothing has been decided.
    pub approval_rate: f64,
}

#[derive(Default)]
struct GateState {
    always_approved: HashSet<String>,
    history: Vec<ApprovalRecord>,
}

pub struct ThresholdGate {
    policy: RiskPolicy,
    threshold: RiskLevel,
    timeout_secs: u64,
    source: Option<Arc<dyn DecisionSource>>,
    audit: Option<Arc<dyn ApprovalAudit>>,
    auto_audit: bool,
    redactor: Redactor,
    state: Mutex<GateState>,
}

impl ThresholdGate {
    pub fn new(policy: RiskPolicy, threshold: RiskLevel) -> Self {
        Self {
            policy,
            threshold,
            timeout_secs: ApprovalRequest::DEFAULT_TIMEOUT_SECS,
            source: None,
            audit: None,
            auto_audit: true,
            redactor: Redactor::default(),
            state: Mutex::new(GateState::default()),
        }
    }

    /// Build from the `[security]` section. An empty `risk_rules` list
    /// selects the built-in table.
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(RiskPolicy::new(config.risk_rules.clone()), config.confirm_threshold)
            .with_timeout_secs(config.approval_timeout_secs)
            .with_auto_audit(config.auto_audit)
            .with_redactor(Redactor::from_config(&config.redact))
    }

    /// When off, decisions are kept in the history only.
    pub fn with_auto_audit(mut self, enabled: bool) -> Self {
        self.auto_audit = enabled;
        self
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_decision_source(mut self, source: Arc<dyn DecisionSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn ApprovalAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn threshold(&self) -> RiskLevel {
        self.threshold
    }

    /// Snapshot of every recorded request/result pair, oldest first.
    pub fn history(&self) -> Vec<ApprovalRecord> {
        self.lock().history.clone()
    }

    pub fn is_always_approved(&self, tool: &str) -> bool {
        self.lock().always_approved.contains(tool)
    }

    /// Forget every approve-always grant.
    pub fn clear_always_approved(&self) {
        self.lock().always_approved.clear();
    }

    pub fn stats(&self) -> ApprovalStats {
        let state = self.lock();
        let mut stats = ApprovalStats { total: state.history.len(), ..ApprovalStats::default() };
        for record in &state.history {
            match record.result.status {
                ApprovalStatus::Approved => stats.approved += 1,
                ApprovalStatus::Rejected => stats.rejected += 1,
                ApprovalStatus::Timeout => stats.timeout += 1,
                ApprovalStatus::Pending => {}
            }
        }
        if stats.total > 0 {
            stats.approval_rate = stats.approved as f64 / stats.total as f64;
        }
        stats
    }

    /// The gate's state stays consistent under poisoning: every mutation is
    /// a single push or insert.
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn resolve(&self, request: &ApprovalRequest) -> ApprovalResult {
        // ── Step 1: Below threshold ──────────────────────────────────────────
        if !self.needs_approval(request.risk_level) {
            debug!(request_id = %request.id, tool = %request.tool_name, risk = %request.risk_level, "auto-approved");
            return ApprovalResult::auto_approved(request.id);
        }

        // ── Step 2: Remembered approve-always ────────────────────────────────
        if self.is_always_approved(&request.tool_name) {
            debug!(request_id = %request.id, tool = %request.tool_name, "tool approved always");
            let mut result =
                ApprovalResult::approved(request.id, ApprovalScope::Always, ApprovalResult::AUTO_APPROVER);
            result.reason = Some("tool previously approved always".to_string());
            return result;
        }

        // ── Step 3: Nobody to ask ────────────────────────────────────────────
        let Some(source) = &self.source else {
            warn!(request_id = %request.id, tool = %request.tool_name, "no decision source registered, rejecting");
            return ApprovalResult::rejected(request.id, None, "no approval handler registered");
        };

        // ── Step 4: Ask and wait ─────────────────────────────────────────────
        info!(
            request_id = %request.id,
            tool = %request.tool_name,
            risk = %request.risk_level,
            timeout_secs = request.timeout_secs,
            "awaiting approval decision"
        );
        let wait = Duration::from_secs(request.timeout_secs);
        match tokio::time::timeout(wait, source.decide(request)).await {
            Ok(Ok(mut result)) => {
                result.request_id = request.id;
                if result.status == ApprovalStatus::Pending {
                    warn!(request_id = %request.id, "decision source answered pending, rejecting");
                    return ApprovalResult::rejected(request.id, result.approved_by, "no decision returned");
                }
                if result.is_approved() && result.scope == Some(ApprovalScope::Always) {
                    self.lock().always_approved.insert(request.tool_name.clone());
                }
                result
            }
            Ok(Err(e)) => {
                warn!(request_id = %request.id, error = %e, "decision source failed, rejecting");
                ApprovalResult::rejected(request.id, None, format!("decision source failed: {}", e))
            }
            Err(_) => {
                warn!(request_id = %request.id, timeout_secs = request.timeout_secs, "approval timed out");
                ApprovalResult::timed_out(request.id, request.timeout_secs)
            }
        }
    }

    /// Append to history and the audit sink. Returns the result that must be
    /// acted on.
    fn record(&self, request: ApprovalRequest, mut result: ApprovalResult) -> ApprovalResult {
        let request = self.redactor.redact_request(&request);
        if let Some(audit) = self.audit.as_ref().filter(|_| self.auto_audit) {
            if let Err(e) = audit.record(&request, &result) {
                error!(request_id = %request.id, error = %e, "approval audit write failed");
                if result.is_approved() {
                    result = ApprovalResult::rejected(request.id, None, format!("approval could not be audited: {}", e));
                }
            }
        }
        self.lock().history.push(ApprovalRecord { request, result: result.clone() });
        result
    }
}

#[async_trait]
impl ApprovalGate for ThresholdGate {
    fn evaluate(&self, tool: &str, _params: &Value) -> RiskLevel {
        self.policy.classify(tool)
    }

    fn needs_approval(&self, risk: RiskLevel) -> bool {
        risk >= self.threshold
    }

    fn approval_timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalResult {
        let result = self.resolve(&request).await;
        info!(
            request_id = %request.id,
            tool = %request.tool_name,
            status = ?result.status,
            "approval decided"
        );
        self.record(request, result)
    }
}
