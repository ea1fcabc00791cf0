//! Job and step execution records.
//!
//! `JobRun` is the durable record of one agent invocation; `JobStep` is the
//! record of one executed plan step. Both are written through the job store
//! in short, non-overlapping operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    agent::AgentId,
    approval::ApprovalDecision,
    error::{StewardError, StewardResult},
    plan::{Plan, Step, StepKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Legal transitions of the job state machine.
    ///
    /// pending → running | failed | cancelled
    /// running → success | failed | cancelled
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Success)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Failed | StepStatus::Skipped)
    }
}

/// Where a job summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    /// Written by the model.
    Model,
    /// The templated fallback used when the summary call failed.
    Template,
}

/// The durable record of one agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub goal: String,
    pub status: JobStatus,
    pub plan: Option<Plan>,
    pub summary: Option<String>,
    pub summary_source: Option<SummarySource>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobRun {
    pub fn new(agent_id: AgentId, goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            goal: goal.into(),
            status: JobStatus::Pending,
            plan: None,
            summary: None,
            summary_source: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Move to `next`, stamping `started_at` / `ended_at` as appropriate.
    ///
    /// Returns `InvalidTransition` for any edge the state machine does not
    /// have, which includes every transition out of a terminal status.
    pub fn transition(&mut self, next: JobStatus) -> StewardResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(StewardError::InvalidTransition {
                job_id: self.id.to_string(),
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        let now = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        self.status = next;
        Ok(())
    }
}

/// The durable record of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStep {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_index: usize,
    pub kind: StepKind,
    pub name: String,
    pub request: Value,
    pub response: Option<Value>,
    pub status: StepStatus,
    pub approval: Option<ApprovalDecision>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobStep {
    /// A step record in `Running`, created immediately before execution.
    pub fn start(job_id: Uuid, step_index: usize, step: &Step) -> Self {
        let name = if step.name.trim().is_empty() {
            format!("Step {step_index}")
        } else {
            step.name.clone()
        };
        Self {
            id: Uuid::new_v4(),
            job_id,
            step_index,
            kind: step.kind(),
            name,
            request: serde_json::to_value(step).unwrap_or(Value::Null),
            response: None,
            status: StepStatus::Running,
            approval: None,
            error: None,
            duration_ms: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    fn finish(&mut self, status: StepStatus) {
        let now = Utc::now();
        let elapsed = now.signed_duration_since(self.started_at).num_milliseconds();
        self.duration_ms = Some(elapsed.max(0) as u64);
        self.ended_at = Some(now);
        self.status = status;
    }

    pub fn succeed(&mut self, response: Value) {
        self.response = Some(response);
        self.finish(StepStatus::Success);
    }

    pub fn fail(&mut self, error: impl Into<String>, response: Option<Value>) {
        self.error = Some(error.into());
        self.response = response;
        self.finish(StepStatus::Failed);
    }
}

/// What `run_agent` hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub plan: Option<Plan>,
    pub steps: Vec<JobStep>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl JobResult {
    pub fn from_run(run: &JobRun, steps: Vec<JobStep>) -> Self {
        Self {
            job_id: run.id,
            status: run.status,
            plan: run.plan.clone(),
            steps,
            summary: run.summary.clone(),
            error: run.error.clone(),
        }
    }

    pub fn succeeded_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.status == StepStatus::Success).count()
    }
}
