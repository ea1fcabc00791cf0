//! Engine configuration schema.
//!
//! One TOML document configures the whole engine:
//!
//! ```toml
//! [app]
//! default_provider = "bailian"
//!
//! [providers.bailian]
//! kind = "openai"
//! api_key_env = "DASHSCOPE_API_KEY"
//! fallbacks = ["ollama"]
//!
//! [providers.ollama]
//! kind = "ollama"
//!
//! [security]
//! confirm_threshold = "medium"
//! approval_timeout_secs = 60
//!
//! [[agents]]
//! id = "file-organizer"
//! name = "File organizer"
//! system_prompt = "You keep directories tidy."
//! allowed_tools = ["fs.list", "fs.move"]
//!
//! [[tasks]]
//! id = "nightly-tidy"
//! name = "Nightly tidy"
//! agent_id = "file-organizer"
//! goal = "Tidy ~/Downloads"
//! trigger = { kind = "cron", expr = "0 2 * * *" }
//! ```
//!
//! Provider sections named after a built-in provider (`bailian`, `ollama`)
//! inherit its endpoint, timeout, default model, and model catalog for any
//! field they leave out.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    agent::AgentConfig,
    approval::{ApprovalRequest, RiskLevel, RiskRule},
    error::{StewardError, StewardResult},
    task::AutomationTask,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend used when a request names none. Falls back to the first
    /// provider section by name.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Task type to `"backend:model"`, e.g. `coding = "ollama:qwen2.5-coder"`.
    /// Requests carrying a task type with no entry use the default backend.
    #[serde(default)]
    pub model_route: BTreeMap<String, String>,
}

/// One parsed `[app.model_route]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRoute {
    pub backend: String,
    pub model: String,
}

impl ModelRoute {
    /// Parse `"backend:model"`. Only the first `:` separates, so model tags
    /// such as `qwen2.5:7b` survive.
    pub fn parse(entry: &str) -> Option<Self> {
        let (backend, model) = entry.split_once(':')?;
        let (backend, model) = (backend.trim(), model.trim());
        if backend.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self { backend: backend.to_string(), model: model.to_string() })
    }
}

/// Wire dialect spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// `/chat/completions` + `/models`, bearer auth.
    #[serde(rename = "openai")]
    OpenAi,
    /// `/api/chat` + `/api/tags`.
    Ollama,
}

/// One entry of a provider's static model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl ModelInfo {
    fn builtin(code: &str, name: &str, tags: &[&str], description: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_base: String,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Ordered failover chain. `None` means every other registered backend.
    #[serde(default)]
    pub fallbacks: Option<Vec<String>>,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

impl ProviderConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(Self::DEFAULT_TIMEOUT_SECS)
    }

    /// Fill unset fields from the built-in entry for `name`, if there is one.
    fn apply_builtin(&mut self, name: &str) {
        let Some(builtin) = builtin_provider(name) else {
            return;
        };
        if self.api_base.is_empty() {
            self.api_base = builtin.api_base;
        }
        if self.default_model.is_empty() {
            self.default_model = builtin.default_model;
        }
        if self.timeout_secs.is_none() {
            self.timeout_secs = builtin.timeout_secs;
        }
        if self.models.is_empty() {
            self.models = builtin.models;
        }
    }
}

/// Built-in provider defaults, keyed by provider section name.
pub fn builtin_provider(name: &str) -> Option<ProviderConfig> {
    match name {
        "bailian" => Some(ProviderConfig {
            kind: ProviderKind::OpenAi,
            api_base: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key_env: Some("DASHSCOPE_API_KEY".to_string()),
            default_model: "qwen-plus".to_string(),
            timeout_secs: Some(60),
            fallbacks: None,
            models: vec![
                ModelInfo::builtin("qwen-plus", "General chat", &["general", "zh"], "Assistant, Q&A and summaries"),
                ModelInfo::builtin("qwen-turbo", "Writing", &["writing"], "Copy and long-form generation"),
                ModelInfo::builtin(
                    "qwen-max-longcontext",
                    "Long context",
                    &["analysis", "long-form"],
                    "Analysis over long inputs",
                ),
            ],
        }),
        "ollama" => Some(ProviderConfig {
            kind: ProviderKind::Ollama,
            api_base: "http://127.0.0.1:11434".to_string(),
            api_key_env: None,
            default_model: "qwen2.5-coder".to_string(),
            timeout_secs: Some(120),
            fallbacks: None,
            models: vec![
                ModelInfo::builtin("qwen2.5-coder", "Local coder", &["coding", "zh"], "Offline code help"),
                ModelInfo::builtin("qwen2.5-mini", "Quick answers", &["quick", "general"], "Small, fast model"),
            ],
        }),
        _ => None,
    }
}

fn default_threshold() -> RiskLevel {
    RiskLevel::Medium
}

fn default_approval_timeout() -> u64 {
    ApprovalRequest::DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Tool calls at or above this risk need a human decision.
    #[serde(default = "default_threshold")]
    pub confirm_threshold: RiskLevel,
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
    /// Replaces the built-in risk table when non-empty.
    #[serde(default)]
    pub risk_rules: Vec<RiskRule>,
    /// Write every approval decision to the audit sink.
    #[serde(default = "default_auto_audit")]
    pub auto_audit: bool,
    #[serde(default)]
    pub redact: RedactConfig,
}

fn default_auto_audit() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            confirm_threshold: default_threshold(),
            approval_timeout_secs: default_approval_timeout(),
            risk_rules: Vec::new(),
            auto_audit: default_auto_audit(),
            redact: RedactConfig::default(),
        }
    }
}

/// Text masked out of audited and displayed approval requests.
///
/// ```toml
/// [security.redact]
/// paths = ["/home/alice"]
/// envs = ["DASHSCOPE_API_KEY"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactConfig {
    /// Path prefixes replaced wherever they occur.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Environment variable names. The name and, when set, its value are
    /// both masked.
    #[serde(default)]
    pub envs: Vec<String>,
}

fn default_backoff() -> u64 {
    60
}

fn default_cron_tick() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Sleep after a failed firing before the loop tries again.
    #[serde(default = "default_backoff")]
    pub error_backoff_secs: u64,
    /// How often cron loops compare the wall clock with their expression.
    #[serde(default = "default_cron_tick")]
    pub cron_tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            error_backoff_secs: default_backoff(),
            cron_tick_secs: default_cron_tick(),
        }
    }
}

/// The root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub tasks: Vec<AutomationTask>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Parse `s` as TOML, apply built-in provider defaults, and validate
    /// cross references.
    ///
    /// Returns `StewardError::Config` if the TOML is malformed or refers to
    /// providers or agents that are not defined.
    pub fn from_toml_str(s: &str) -> StewardResult<Self> {
        let mut config: EngineConfig = toml::from_str(s).map_err(|e| StewardError::Config {
            reason: format!("failed to parse engine TOML: {}", e),
        })?;
        for (name, provider) in config.providers.iter_mut() {
            provider.apply_builtin(name);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> StewardResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| StewardError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// The backend requests go to when they name none.
    pub fn default_provider(&self) -> Option<&str> {
        self.app
            .default_provider
            .as_deref()
            .or_else(|| self.providers.keys().next().map(String::as_str))
    }

    /// Parsed `[app.model_route]` entries. Entries that do not parse are
    /// rejected by validation, so none are dropped here after loading.
    pub fn model_routes(&self) -> BTreeMap<String, ModelRoute> {
        self.app
            .model_route
            .iter()
            .filter_map(|(task_type, entry)| ModelRoute::parse(entry).map(|r| (task_type.clone(), r)))
            .collect()
    }

    /// Provider names with the default provider first, then the rest by name.
    /// This is the registration order, and so the default failover order.
    pub fn provider_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.providers.len());
        if let Some(default) = self.default_provider() {
            order.push(default.to_string());
        }
        for name in self.providers.keys() {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    }

    fn validate(&self) -> StewardResult<()> {
        fn err(reason: String) -> StewardResult<()> {
            Err(StewardError::Config { reason })
        }

        if let Some(default) = &self.app.default_provider {
            if !self.providers.contains_key(default) {
                return err(format!("default_provider '{default}' has no [providers.{default}] section"));
            }
        }

        for (task_type, entry) in &self.app.model_route {
            let Some(route) = ModelRoute::parse(entry) else {
                return err(format!("model_route '{task_type}' must look like \"backend:model\", got '{entry}'"));
            };
            if !self.providers.contains_key(&route.backend) {
                return err(format!("model_route '{task_type}' uses unknown provider '{}'", route.backend));
            }
        }

        for (name, provider) in &self.providers {
            if provider.api_base.is_empty() {
                return err(format!("provider '{name}' has no api_base"));
            }
            if provider.default_model.is_empty() {
                return err(format!("provider '{name}' has no default_model"));
            }
            for fallback in provider.fallbacks.iter().flatten() {
                if !self.providers.contains_key(fallback) {
                    return err(format!("provider '{name}' lists unknown fallback '{fallback}'"));
                }
            }
        }

        let mut agent_ids = BTreeSet::new();
        for agent in &self.agents {
            if !agent_ids.insert(agent.id.as_str()) {
                return err(format!("agent '{}' is defined more than once", agent.id));
            }
            if let Some(provider) = &agent.default_provider {
                if !self.providers.contains_key(provider) {
                    return err(format!("agent '{}' uses unknown provider '{provider}'", agent.id));
                }
            }
        }

        let mut task_ids = BTreeSet::new();
        for task in &self.tasks {
            if !task_ids.insert(task.id.as_str()) {
                return err(format!("task '{}' is defined more than once", task.id));
            }
            if !agent_ids.contains(task.agent_id.as_str()) {
                return err(format!("task '{}' refers to unknown agent '{}'", task.id, task.agent_id));
            }
        }

        Ok(())
    }
}
