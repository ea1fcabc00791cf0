//! Automation task definitions driven by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{agent::AgentId, job::JobStatus};

/// When a task fires.
///
/// Example in TOML:
/// ```toml
/// trigger = { kind = "interval", seconds = 3600 }
/// trigger = { kind = "cron", expr = "0 9 * * 1-5" }
/// trigger = { kind = "once" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Interval { seconds: u64 },
    Cron { expr: String },
    Once,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Interval { .. } => "interval",
            Trigger::Cron { .. } => "cron",
            Trigger::Once => "once",
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationTask {
    pub id: String,
    pub name: String,
    pub agent_id: AgentId,
    pub goal: String,
    pub trigger: Trigger,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub last_status: Option<JobStatus>,
}
