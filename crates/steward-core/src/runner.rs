//! The agent runner: plan once, then execute steps one at a time.
//!
//! The runner enforces the Steward execution model:
//!
//!   Agent → JobRun → Plan → [Step → (Allow-list → Approval → Tool | Model)]* → Summary
//!
//! The approval invariant is absolute: `ToolExecutor::execute()` is NEVER
//! called for a step unless the approval gate returned an approved result for
//! that step, and that result is written onto the step record first. The code
//! path to `execute()` is only reachable after both have happened.
//!
//! Errors raised after the `JobRun` exists are never propagated; they are
//! written into the job and reported through the returned `JobResult`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use steward_contracts::{
    agent::{AgentConfig, AgentId},
    approval::{ApprovalRequest, ApprovalStatus},
    chat::{ChatMessage, RouteRequest},
    error::{StewardError, StewardResult},
    job::{JobResult, JobRun, JobStatus, JobStep, StepStatus},
    plan::{Step, StepAction},
};

use crate::{
    planner::PlanGenerator,
    traits::{AgentInvoker, AgentStore, ApprovalGate, ChatRouter, JobStore, ToolExecutor},
};

/// Drives agent runs. One runner serves any number of concurrent runs; it
/// holds no per-run state.
pub struct AgentRunner {
    agents: Arc<dyn AgentStore>,
    jobs: Arc<dyn JobStore>,
    router: Arc<dyn ChatRouter>,
    planner: PlanGenerator,
    gate: Arc<dyn ApprovalGate>,
    tools: Arc<dyn ToolExecutor>,
}

impl AgentRunner {
    pub fn new(
        agents: Arc<dyn AgentStore>,
        jobs: Arc<dyn JobStore>,
        router: Arc<dyn ChatRouter>,
        gate: Arc<dyn ApprovalGate>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        let planner = PlanGenerator::new(router.clone());
        Self { agents, jobs, router, planner, gate, tools }
    }

    /// Run `agent_id` against `goal` to completion.
    ///
    /// # Pipeline
    ///
    /// 1. Load the agent; `AgentNotFound` / `AgentDisabled` are returned
    ///    before any job record exists. Record usage.
    /// 2. Create the `JobRun` in `pending`.
    /// 3. Generate the plan; a router failure fails the job from `pending`.
    /// 4. Move to `running` with the plan snapshot.
    /// 5. Execute steps in order, each recorded before and after it runs.
    ///    Stop after a failed step unless it is `continue_on_error`, or when
    ///    the agent's step budget is spent.
    /// 6. Summarize, then `success` iff every executed step succeeded.
    pub async fn run_agent(&self, agent_id: &AgentId, goal: &str, context: Option<&str>) -> StewardResult<JobResult> {
        // ── Step 1: Load the agent ───────────────────────────────────────────
        let agent = self
            .agents
            .get_agent(agent_id)?
            .ok_or_else(|| StewardError::AgentNotFound { agent_id: agent_id.to_string() })?;
        if !agent.enabled {
            warn!(agent_id = %agent_id, "refusing to run disabled agent");
            return Err(StewardError::AgentDisabled { agent_id: agent_id.to_string() });
        }
        self.agents.record_usage(agent_id)?;

        // ── Step 2: Create the job record ────────────────────────────────────
        let mut run = JobRun::new(agent.id.clone(), goal);
        self.jobs.create_job(&run)?;
        info!(job_id = %run.id, agent_id = %agent.id, "job created");

        let mut steps = Vec::new();
        if let Err(e) = self.drive(&agent, &mut run, &mut steps, context).await {
            self.fail_job(&mut run, e.to_string());
        }

        info!(
            job_id = %run.id,
            status = run.status.as_str(),
            steps = steps.len(),
            "job finished"
        );
        Ok(JobResult::from_run(&run, steps))
    }

    /// Steps 3–6. Any `Err` leaves the job for `fail_job` to close.
    async fn drive(
        &self,
        agent: &AgentConfig,
        run: &mut JobRun,
        steps: &mut Vec<JobStep>,
        context: Option<&str>,
    ) -> StewardResult<()> {
        // ── Step 3: Plan ─────────────────────────────────────────────────────
        let plan = self.planner.generate(agent, &run.goal, context).await?;
        debug!(job_id = %run.id, steps = plan.steps.len(), kinds = ?plan.kinds(), "plan ready");

        // ── Step 4: Start running ────────────────────────────────────────────
        run.plan = Some(plan.clone());
        run.transition(JobStatus::Running)?;
        self.jobs.update_job(run)?;

        // ── Step 5: Execute steps sequentially ───────────────────────────────
        let budget = agent.step_budget();
        for step in &plan.steps {
            if steps.len() >= budget {
                info!(job_id = %run.id, budget, "step budget reached, stopping");
                break;
            }

            let mut record = JobStep::start(run.id, steps.len(), step);
            self.jobs.create_step(&record)?;
            debug!(job_id = %run.id, step = record.step_index, kind = %record.kind, "step starting");

            match self.execute_step(agent, step, &mut record).await {
                Ok(response) => record.succeed(response),
                Err(e) => {
                    warn!(job_id = %run.id, step = record.step_index, error = %e, "step failed");
                    let response = record.response.take();
                    record.fail(e.to_string(), response);
                }
            }
            self.jobs.update_step(&record)?;

            let stop = record.status == StepStatus::Failed && !step.continue_on_error;
            steps.push(record);
            if stop {
                break;
            }
        }

        // ── Step 6: Summarize and close ──────────────────────────────────────
        let summary = self.planner.summarize(agent, &run.goal, &plan, steps).await;
        run.summary = Some(summary.text);
        run.summary_source = Some(summary.source);

        match steps.iter().find(|s| s.status != StepStatus::Success) {
            None => run.transition(JobStatus::Success)?,
            Some(failed) => {
                run.error = Some(format!(
                    "step {} ({}) failed: {}",
                    failed.step_index,
                    failed.name,
                    failed.error.as_deref().unwrap_or("unknown error")
                ));
                run.transition(JobStatus::Failed)?;
            }
        }
        self.jobs.update_job(run)?;
        Ok(())
    }

    /// Dispatch one step. Tool failures that carry a payload leave it on
    /// `record.response`.
    async fn execute_step(&self, agent: &AgentConfig, step: &Step, record: &mut JobStep) -> StewardResult<Value> {
        match &step.action {
            StepAction::Tool { tool, params } => self.run_tool(agent, step, tool, params, record).await,
            StepAction::Model { .. } | StepAction::Analysis { .. } => self.run_model(agent, step).await,
            StepAction::Unsupported { step_type } => Err(StewardError::UnsupportedStep {
                step_type: step_type.clone(),
            }),
        }
    }

    async fn run_tool(
        &self,
        agent: &AgentConfig,
        step: &Step,
        tool: &str,
        params: &Value,
        record: &mut JobStep,
    ) -> StewardResult<Value> {
        if !agent.allows_tool(tool) {
            return Err(StewardError::ToolNotAllowed { tool: tool.to_string() });
        }

        let risk = self.gate.evaluate(tool, params);
        let timeout_secs = self.gate.approval_timeout_secs();
        let description = if step.description.trim().is_empty() {
            format!("agent '{}' wants to call {}", agent.name, tool)
        } else {
            format!("agent '{}' wants to call {}: {}", agent.name, tool, step.description)
        };
        let request = ApprovalRequest::new(
            tool,
            params.clone(),
            risk,
            description,
            format!("agent:{}", agent.id),
            timeout_secs,
        );
        let request_id = request.id;

        let result = self.gate.request_approval(request).await;
        record.approval = result.decision();
        self.jobs.update_step(record)?;

        match result.status {
            ApprovalStatus::Approved => {
                debug!(request_id = %request_id, tool = %tool, risk = %risk, "tool call approved");
            }
            ApprovalStatus::Timeout => {
                return Err(StewardError::ApprovalTimeout { tool: tool.to_string(), timeout_secs });
            }
            ApprovalStatus::Rejected | ApprovalStatus::Pending => {
                return Err(StewardError::ApprovalRejected {
                    tool: tool.to_string(),
                    reason: result.reason.unwrap_or_else(|| "rejected".to_string()),
                });
            }
        }

        // Only reachable with an approved result recorded on the step.
        let outcome = self.tools.execute(tool, params).await?;
        if outcome.success {
            Ok(outcome.payload)
        } else {
            if !outcome.payload.is_null() {
                record.response = Some(outcome.payload);
            }
            Err(StewardError::ToolExecution {
                tool: tool.to_string(),
                reason: outcome.error.unwrap_or_else(|| "tool reported failure".to_string()),
            })
        }
    }

    async fn run_model(&self, agent: &AgentConfig, step: &Step) -> StewardResult<Value> {
        let request = RouteRequest::new(vec![
            ChatMessage::system(agent.system_prompt.clone()),
            ChatMessage::user(step.prompt_text()),
        ])
        .backend(agent.default_provider.clone())
        .model(agent.default_model.clone())
        .task_type(agent.task_type.clone());

        let response = self.router.call(request).await?;
        Ok(json!({
            "content": response.content,
            "served_by": response.served_by,
            "model": response.model,
        }))
    }

    /// Close a job that hit an error outside a step. Store failures here can
    /// only be logged.
    fn fail_job(&self, run: &mut JobRun, reason: String) {
        error!(job_id = %run.id, error = %reason, "job failed");
        if run.status.is_terminal() {
            return;
        }
        run.error = Some(reason);
        if let Err(e) = run.transition(JobStatus::Failed) {
            error!(job_id = %run.id, error = %e, "could not mark job failed");
            return;
        }
        if let Err(e) = self.jobs.update_job(run) {
            error!(job_id = %run.id, error = %e, "could not persist failed job");
        }
    }
}

#[async_trait]
impl AgentInvoker for AgentRunner {
    async fn run_agent(&self, agent_id: &AgentId, goal: &str, context: Option<&str>) -> StewardResult<JobResult> {
        AgentRunner::run_agent(self, agent_id, goal, context).await
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
