//! Agent identity and configuration types.
//!
//! An agent is a named persona: a system prompt, the set of tools it may
//! call, the backend/model it talks to, and a step budget. The runner loads
//! one `AgentConfig` per run and treats it as immutable apart from the usage
//! counters.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable, human-readable identifier for an agent.
///
/// Used by automation tasks, job records, and log fields.
/// Example: AgentId("file-organizer")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn default_max_steps() -> u32 {
    10
}

fn default_enabled() -> bool {
    true
}

/// Everything the runner needs to know about an agent.
///
/// Deserialized from the `[[agents]]` tables of the engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    /// Tool names this agent may invoke. Tool steps naming anything else fail
    /// with `ToolNotAllowed` before the approval gate is consulted.
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
    /// Backend to route calls to. `None` resolves to the router's default.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Model to request. `None` resolves to the backend's default model.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Task type looked up in `[app.model_route]` when no provider is set.
    #[serde(default)]
    pub task_type: Option<String>,
    /// Maximum number of plan steps executed per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl AgentConfig {
    /// Return true if `tool` is in this agent's allow-list.
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools.contains(tool)
    }

    /// The effective step budget. A configured budget of zero still executes
    /// the first step.
    pub fn step_budget(&self) -> usize {
        self.max_steps.max(1) as usize
    }
}
