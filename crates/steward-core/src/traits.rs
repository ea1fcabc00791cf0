//! Core trait definitions for the Steward pipeline.
//!
//! These traits are the seams between the runner and everything it drives:
//!
//! - `ChatRouter`    : routes chat requests to a backend (with failover)
//! - `ToolExecutor`  : performs tool side effects; never called unapproved
//! - `ApprovalGate`  : classifies risk and obtains a decision per tool call
//! - `DecisionSource`: the human (or stand-in) the gate asks
//! - `ApprovalAudit` : append-only sink for every request/result pair
//! - `AgentStore`, `JobStore`, `TaskStore`: persistence
//! - `AgentInvoker`  : what the scheduler calls to run an agent
//!
//! Store traits are synchronous: every call is a short, self-contained
//! operation and implementations must not hold locks across calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use steward_contracts::{
    agent::{AgentConfig, AgentId},
    approval::{ApprovalRequest, ApprovalResult, RiskLevel},
    chat::{RouteRequest, RoutedResponse},
    error::StewardResult,
    job::{JobResult, JobRun, JobStatus, JobStep},
    task::AutomationTask,
};

/// Routes a chat request to a backend and reports which one answered.
#[async_trait]
pub trait ChatRouter: Send + Sync {
    async fn call(&self, request: RouteRequest) -> StewardResult<RoutedResponse>;
}

/// What a tool executor reports back for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(payload: Value) -> Self {
        Self { success: true, payload, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, payload: Value::Null, error: Some(error.into()) }
    }
}

/// Performs tool side effects.
///
/// The runner guarantees `execute` is only called after the approval gate
/// returned an approved result for this exact call.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool: &str, params: &Value) -> StewardResult<ToolOutcome>;
}

/// Whoever decides on approval requests the gate cannot auto-approve.
///
/// Implementations may take arbitrarily long; the gate bounds the wait with
/// the request's timeout.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    async fn decide(&self, request: &ApprovalRequest) -> StewardResult<ApprovalResult>;
}

/// Risk classification plus the human-in-the-loop decision.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Classify one intended tool call.
    fn evaluate(&self, tool: &str, params: &Value) -> RiskLevel;

    /// True when `risk` is at or above the confirmation threshold.
    fn needs_approval(&self, risk: RiskLevel) -> bool;

    /// Timeout stamped on requests built by callers.
    fn approval_timeout_secs(&self) -> u64;

    /// Obtain exactly one result for `request`.
    ///
    /// Never fails: a missing decider, a dropped channel, or an elapsed
    /// timeout all produce a non-approved result.
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalResult;
}

/// Append-only record of approval decisions.
pub trait ApprovalAudit: Send + Sync {
    fn record(&self, request: &ApprovalRequest, result: &ApprovalResult) -> StewardResult<()>;
}

pub trait AgentStore: Send + Sync {
    fn get_agent(&self, id: &AgentId) -> StewardResult<Option<AgentConfig>>;

    /// Bump `usage_count` and stamp `last_used_at`.
    fn record_usage(&self, id: &AgentId) -> StewardResult<()>;

    fn upsert_agent(&self, agent: AgentConfig) -> StewardResult<()>;
}

pub trait JobStore: Send + Sync {
    fn create_job(&self, run: &JobRun) -> StewardResult<()>;

    fn update_job(&self, run: &JobRun) -> StewardResult<()>;

    fn create_step(&self, step: &JobStep) -> StewardResult<()>;

    fn update_step(&self, step: &JobStep) -> StewardResult<()>;

    fn get_job(&self, id: Uuid) -> StewardResult<Option<JobRun>>;

    /// Steps of one job ordered by `step_index`.
    fn steps_for_job(&self, job_id: Uuid) -> StewardResult<Vec<JobStep>>;

    /// The most recent job for `agent` created strictly after `after`.
    fn latest_job_for_agent(&self, agent: &AgentId, after: DateTime<Utc>) -> StewardResult<Option<JobRun>>;
}

pub trait TaskStore: Send + Sync {
    fn get_task(&self, id: &str) -> StewardResult<Option<AutomationTask>>;

    fn list_enabled_tasks(&self) -> StewardResult<Vec<AutomationTask>>;

    fn upsert_task(&self, task: AutomationTask) -> StewardResult<()>;

    /// Returns `TaskNotFound` for unknown ids.
    fn set_task_enabled(&self, id: &str, enabled: bool) -> StewardResult<()>;

    /// Stamp `last_run_at` and increment `run_count`.
    fn record_run_start(&self, id: &str, at: DateTime<Utc>) -> StewardResult<()>;

    fn record_run_status(&self, id: &str, status: JobStatus) -> StewardResult<()>;
}

/// Runs one agent against one goal.
///
/// Only configuration problems that occur before a job record exists
/// (`AgentNotFound`, `AgentDisabled`, store failures) are returned as `Err`.
/// Everything after that is reported through the returned `JobResult`.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn run_agent(&self, agent_id: &AgentId, goal: &str, context: Option<&str>) -> StewardResult<JobResult>;
}
