//! Plan generation and run summaries.
//!
//! The planner asks the model for a JSON plan once per run. Model output is
//! untrusted: `parse_or_fallback` never fails, and anything that does not
//! parse into a usable plan degrades to `Plan::fallback(goal)`.
//!
//! Router failures are not parse failures. If no backend answers, the error
//! propagates and the runner fails the job.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use steward_contracts::{
    agent::AgentConfig,
    chat::{ChatMessage, RouteRequest},
    error::{StewardError, StewardResult},
    job::{JobStep, StepStatus, SummarySource},
    plan::{Plan, StepAction, StepKind},
};

use crate::traits::ChatRouter;

/// Sampling temperature for plan generation.
pub const PLAN_TEMPERATURE: f32 = 0.3;
/// Sampling temperature for run summaries.
pub const SUMMARY_TEMPERATURE: f32 = 0.5;

const SUMMARY_SYSTEM_PROMPT: &str =
    "You summarize task runs. Be brief: say what succeeded and what went wrong.";

/// A run summary and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    pub source: SummarySource,
}

pub struct PlanGenerator {
    router: Arc<dyn ChatRouter>,
}

impl PlanGenerator {
    pub fn new(router: Arc<dyn ChatRouter>) -> Self {
        Self { router }
    }

    /// Ask the agent's backend for a plan that accomplishes `goal`.
    ///
    /// # Errors
    ///
    /// Only router errors (`BackendNotFound`, `AllBackendsUnavailable`).
    /// Unparseable output yields the fallback plan.
    pub async fn generate(&self, agent: &AgentConfig, goal: &str, context: Option<&str>) -> StewardResult<Plan> {
        let request = RouteRequest::new(vec![
            ChatMessage::system(agent.system_prompt.clone()),
            ChatMessage::user(planning_prompt(agent, goal, context)),
        ])
        .backend(agent.default_provider.clone())
        .model(agent.default_model.clone())
        .task_type(agent.task_type.clone())
        .temperature(PLAN_TEMPERATURE);

        let response = self.router.call(request).await?;
        debug!(
            agent_id = %agent.id,
            backend = %response.served_by,
            model = %response.model,
            "plan response received"
        );
        Ok(parse_or_fallback(&response.content, goal))
    }

    /// Summarize a finished run. Never fails: if the router call fails the
    /// summary is a templated count of succeeded steps.
    pub async fn summarize(&self, agent: &AgentConfig, goal: &str, plan: &Plan, steps: &[JobStep]) -> Summary {
        let request = RouteRequest::new(vec![
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(summary_prompt(goal, plan, steps)),
        ])
        .backend(agent.default_provider.clone())
        .model(agent.default_model.clone())
        .task_type(agent.task_type.clone())
        .temperature(SUMMARY_TEMPERATURE);

        match self.router.call(request).await {
            Ok(response) if !response.content.trim().is_empty() => Summary {
                text: response.content.trim().to_string(),
                source: SummarySource::Model,
            },
            Ok(_) => template_summary(steps),
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "summary call failed, using template");
                template_summary(steps)
            }
        }
    }
}

/// "N of M steps succeeded."
pub fn template_summary(steps: &[JobStep]) -> Summary {
    let succeeded = steps.iter().filter(|s| s.status == StepStatus::Success).count();
    Summary {
        text: format!("{} of {} steps succeeded.", succeeded, steps.len()),
        source: SummarySource::Template,
    }
}

fn planning_prompt(agent: &AgentConfig, goal: &str, context: Option<&str>) -> String {
    let tools = if agent.allowed_tools.is_empty() {
        "(none)".to_string()
    } else {
        agent.allowed_tools.iter().cloned().collect::<Vec<_>>().join(", ")
    };

    let mut prompt = format!(
        "You are a task planner. Break the goal into concrete, executable steps.\n\n\
         Agent: {}\n\
         Description: {}\n\
         Available tools: {}\n",
        agent.name, agent.description, tools
    );
    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("\nContext:\n{}\n", context));
    }
    prompt.push_str(&format!("\nGoal:\n{}\n", goal));
    prompt.push_str(
        "\nRules:\n\
         1. Every step either calls one of the available tools (type \"tool\"),\n   \
            asks the model something (type \"model\"), or reasons about results (type \"analysis\").\n\
         2. Tool steps must name the tool and give its params.\n\
         3. Set continue_on_error only for steps whose failure does not matter.\n\
         \nReply with JSON only, in this shape:\n\
         {\n  \"goal\": \"...\",\n  \"steps\": [\n    {\n      \"index\": 0,\n      \"type\": \"tool\",\n      \
         \"name\": \"...\",\n      \"description\": \"...\",\n      \"tool\": \"fs.list\",\n      \
         \"params\": {},\n      \"continue_on_error\": false\n    }\n  ]\n}\n",
    );
    prompt
}

fn summary_prompt(goal: &str, plan: &Plan, steps: &[JobStep]) -> String {
    let mut prompt = format!(
        "Summarize this task run.\n\nGoal: {}\nPlanned steps: {}\n\nResults:\n",
        goal,
        plan.steps.len()
    );
    for step in steps {
        prompt.push_str(&format!("{}. {} [{}]", step.step_index + 1, step.name, step.status.as_str()));
        if let Some(error) = &step.error {
            prompt.push_str(&format!(" - error: {}", error));
        }
        prompt.push('\n');
    }
    prompt
}

/// Strip a surrounding fenced code block (```` ```json ```` or bare ```` ``` ````)
/// if present; otherwise return the trimmed input.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    // Skip the info string (`json`, `JSON`, ...) up to the end of the line.
    let body = match after.find('\n') {
        Some(nl) if after[..nl].chars().all(|c| c.is_ascii_alphanumeric()) => &after[nl + 1..],
        _ => after,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Parse model output into a validated plan.
///
/// Steps are re-indexed 0, 1, 2, … in list order whatever the model wrote.
/// `null` tool params become `{}`.
///
/// # Errors
///
/// `PlanParse` when the text is not a JSON plan, the plan has no steps, or a
/// tool step has a blank tool name.
pub fn extract_plan(raw: &str, goal: &str) -> StewardResult<Plan> {
    let body = strip_code_fence(raw);
    let mut value: Value = serde_json::from_str(body).map_err(|e| StewardError::PlanParse {
        reason: format!("invalid plan JSON: {}", e),
    })?;
    mark_unsupported_steps(&mut value);
    let mut plan: Plan = serde_json::from_value(value).map_err(|e| StewardError::PlanParse {
        reason: format!("invalid plan JSON: {}", e),
    })?;

    if plan.steps.is_empty() {
        return Err(StewardError::PlanParse {
            reason: "plan has no steps".to_string(),
        });
    }

    for (idx, step) in plan.steps.iter_mut().enumerate() {
        if let StepAction::Tool { tool, params } = &mut step.action {
            if tool.trim().is_empty() {
                return Err(StewardError::PlanParse {
                    reason: format!("tool step {} has no tool name", idx),
                });
            }
            if params.is_null() {
                *params = Value::Object(Default::default());
            }
        }
    }

    if plan.goal.trim().is_empty() {
        plan.goal = goal.to_string();
    }
    plan.reindex();
    Ok(plan)
}

/// Retag steps whose `"type"` is a string the runner cannot execute as
/// `unsupported`, keeping the original tag in `step_type`. Steps already
/// tagged `unsupported` are left alone.
fn mark_unsupported_steps(value: &mut Value) {
    let Some(steps) = value.get_mut("steps").and_then(Value::as_array_mut) else {
        return;
    };
    for step in steps.iter_mut().filter_map(Value::as_object_mut) {
        let unknown = match step.get("type").and_then(Value::as_str) {
            Some(tag) if tag != StepKind::Unsupported.as_str() && !StepAction::RUNNABLE_TYPES.contains(&tag) => {
                tag.to_string()
            }
            _ => continue,
        };
        debug!(step_type = %unknown, "plan step has an unsupported type");
        step.insert("type".to_string(), Value::String(StepKind::Unsupported.as_str().to_string()));
        step.insert("step_type".to_string(), Value::String(unknown));
    }
}

/// `extract_plan`, degrading to `Plan::fallback(goal)` on any parse error.
pub fn parse_or_fallback(raw: &str, goal: &str) -> Plan {
    match extract_plan(raw, goal) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(error = %e, "falling back to single-step analysis plan");
            Plan::fallback(goal)
        }
    }
}
