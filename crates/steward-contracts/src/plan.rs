//! Plan and step descriptors.
//!
//! A `Plan` is produced once per run by the plan generator and is immutable
//! afterwards. Steps are a tagged union over the three kinds of work the
//! runner knows how to execute; the JSON form uses a `"type"` discriminator
//! so a model-authored plan deserializes directly. A step whose type is none
//! of the three is kept as `Unsupported` and fails on its own when run.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The discriminant of a step, recorded on every `JobStep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Tool,
    Model,
    Analysis,
    Unsupported,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Tool => "tool",
            StepKind::Model => "model",
            StepKind::Analysis => "analysis",
            StepKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a step actually does.
///
/// Example JSON:
/// ```json
/// { "type": "tool", "tool": "fs.read", "params": { "path": "notes.md" } }
/// { "type": "model", "prompt": "Summarize the notes" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Call an external tool through the tool executor.
    Tool {
        tool: String,
        #[serde(default)]
        params: Value,
    },
    /// Ask the model something and record the answer.
    Model {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
    /// Pure reasoning over the goal; executed as a model call.
    Analysis {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
    /// A step type the runner does not know. `step_type` is the original tag.
    Unsupported {
        #[serde(default)]
        step_type: String,
    },
}

impl StepAction {
    /// Tags that deserialize to a runnable action.
    pub const RUNNABLE_TYPES: [&'static str; 3] = ["tool", "model", "analysis"];

    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::Tool { .. } => StepKind::Tool,
            StepAction::Model { .. } => StepKind::Model,
            StepAction::Analysis { .. } => StepKind::Analysis,
            StepAction::Unsupported { .. } => StepKind::Unsupported,
        }
    }
}

/// One unit of planned work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 0-based position in the plan. Rewritten to be contiguous after parsing.
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// When true, a failure of this step does not stop the run.
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(flatten)]
    pub action: StepAction,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    /// The text sent to the model for model/analysis steps: the explicit
    /// prompt if the planner gave one, the description otherwise.
    pub fn prompt_text(&self) -> &str {
        match &self.action {
            StepAction::Model { prompt: Some(p) } | StepAction::Analysis { prompt: Some(p) }
                if !p.trim().is_empty() =>
            {
                p
            }
            _ => &self.description,
        }
    }
}

/// A goal and the ordered steps that accomplish it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    /// The degraded plan used whenever model output cannot be parsed: a
    /// single analysis step whose description is the raw goal.
    pub fn fallback(goal: &str) -> Self {
        Self {
            goal: goal.to_string(),
            steps: vec![Step {
                index: 0,
                name: "Analyze goal".to_string(),
                description: goal.to_string(),
                continue_on_error: false,
                action: StepAction::Analysis { prompt: None },
            }],
        }
    }

    /// Rewrite step indices to 0, 1, 2, … in list order.
    pub fn reindex(&mut self) {
        for (idx, step) in self.steps.iter_mut().enumerate() {
            step.index = idx;
        }
    }

    pub fn kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(Step::kind).collect()
    }
}
