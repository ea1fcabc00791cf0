//! `Engine`: every component wired from one `EngineConfig`.
//!
//! ```text
//! Scheduler ──▶ AgentRunner ──▶ PlanGenerator ──▶ ProviderRouter
//!                   │
//!                   ├──▶ ThresholdGate ──▶ DecisionSource
//!                   │         └──▶ InMemoryApprovalLog
//!                   ├──▶ ToolExecutor
//!                   └──▶ InMemoryStore
//! ```
//!
//! Reloading configuration means building a new `Engine`; nothing here is
//! global.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use steward_contracts::{
    agent::AgentId,
    chat::ProviderSnapshot,
    config::EngineConfig,
    error::{StewardError, StewardResult},
    job::{JobResult, JobRun},
};
use steward_core::{
    traits::{DecisionSource, JobStore, ToolExecutor},
    AgentRunner,
};
use steward_audit::InMemoryApprovalLog;
use steward_policy::{ApprovalStats, ThresholdGate};
use steward_providers::{router_from_config, BackendOptions, ChatBackend, ProviderRouter};
use steward_scheduler::Scheduler;
use steward_store::InMemoryStore;

/// Collects the pieces configuration cannot describe.
pub struct EngineBuilder {
    config: EngineConfig,
    backends: Vec<(Arc<dyn ChatBackend>, BackendOptions)>,
    tools: Option<Arc<dyn ToolExecutor>>,
    decision_source: Option<Arc<dyn DecisionSource>>,
    audit_journal: Option<PathBuf>,
}

impl EngineBuilder {
    /// Register a backend explicitly. When any are registered, the HTTP
    /// backends described by `[providers]` are not built.
    pub fn backend(mut self, backend: Arc<dyn ChatBackend>, options: BackendOptions) -> Self {
        self.backends.push((backend, options));
        self
    }

    pub fn tool_executor(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Without a decision source every approval above the threshold is
    /// rejected.
    pub fn decision_source(mut self, source: Arc<dyn DecisionSource>) -> Self {
        self.decision_source = Some(source);
        self
    }

    /// Persist the approval audit trail to a JSONL file.
    pub fn audit_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_journal = Some(path.into());
        self
    }

    /// # Errors
    ///
    /// `Config` if no tool executor was supplied or a backend is registered
    /// twice; `Store` if the audit journal cannot be opened or fails
    /// verification.
    pub fn build(self) -> StewardResult<Engine> {
        // ── Step 1: Router ───────────────────────────────────────────────────
        let router = if self.backends.is_empty() {
            router_from_config(&self.config)?
        } else {
            let mut router = ProviderRouter::new();
            for (backend, options) in self.backends {
                router.register(backend, options)?;
            }
            if let Some(default) = self.config.default_provider() {
                if router.backend_names().iter().any(|n| n == default) {
                    router.set_default(default);
                }
            }
            for (task_type, route) in self.config.model_routes() {
                router.set_route(task_type, route);
            }
            router
        };
        let router = Arc::new(router);

        // ── Step 2: Audit trail and gate ─────────────────────────────────────
        let audit = match &self.audit_journal {
            Some(path) => InMemoryApprovalLog::with_journal(path)?,
            None => InMemoryApprovalLog::new(),
        };
        let mut gate = ThresholdGate::from_config(&self.config.security).with_audit(Arc::new(audit.clone()));
        if let Some(source) = self.decision_source {
            gate = gate.with_decision_source(source);
        }
        let gate = Arc::new(gate);

        // ── Step 3: Store, runner, scheduler ─────────────────────────────────
        let tools = self.tools.ok_or_else(|| StewardError::Config {
            reason: "no tool executor configured".to_string(),
        })?;
        let store = InMemoryStore::from_config(&self.config)?;
        let runner = Arc::new(AgentRunner::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            router.clone(),
            gate.clone(),
            tools,
        ));
        let scheduler = Scheduler::new(Arc::new(store.clone()), runner.clone(), self.config.scheduler.clone());

        info!(
            backends = ?router.backend_names(),
            agents = self.config.agents.len(),
            tasks = self.config.tasks.len(),
            threshold = %gate.threshold(),
            "engine built"
        );

        Ok(Engine { config: self.config, router, store, gate, audit, runner, scheduler })
    }
}

pub struct Engine {
    config: EngineConfig,
    router: Arc<ProviderRouter>,
    store: InMemoryStore,
    gate: Arc<ThresholdGate>,
    audit: InMemoryApprovalLog,
    runner: Arc<AgentRunner>,
    scheduler: Scheduler,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            backends: Vec::new(),
            tools: None,
            decision_source: None,
            audit_journal: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn gate(&self) -> &ThresholdGate {
        &self.gate
    }

    pub fn audit_log(&self) -> &InMemoryApprovalLog {
        &self.audit
    }

    /// Run one agent against one goal to completion.
    pub async fn run_agent(&self, agent_id: &str, goal: &str, context: Option<&str>) -> StewardResult<JobResult> {
        self.runner.run_agent(&AgentId::new(agent_id), goal, context).await
    }

    pub async fn trigger_task_manually(&self, task_id: &str) -> StewardResult<JobResult> {
        self.scheduler.trigger_task_manually(task_id).await
    }

    pub async fn check_health(&self) -> BTreeMap<String, bool> {
        self.router.check_health().await
    }

    pub async fn list_models(&self, backend: &str) -> StewardResult<Vec<String>> {
        self.router.list_models(backend).await
    }

    /// Start one loop per enabled task. Returns how many were spawned.
    pub fn start_scheduler(&self) -> StewardResult<usize> {
        self.scheduler.start()
    }

    pub fn enable_task(&self, task_id: &str) -> StewardResult<()> {
        self.scheduler.enable_task(task_id)
    }

    pub fn disable_task(&self, task_id: &str) -> StewardResult<()> {
        self.scheduler.disable_task(task_id)
    }

    /// Cancel every scheduler loop. Runs in progress finish.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    pub fn provider_snapshot(&self) -> Vec<ProviderSnapshot> {
        self.router.snapshot()
    }

    pub fn approval_stats(&self) -> ApprovalStats {
        self.gate.stats()
    }

    /// The newest job for `agent_id` created after `since`.
    pub fn latest_job(&self, agent_id: &str, since: DateTime<Utc>) -> StewardResult<Option<JobRun>> {
        self.store.latest_job_for_agent(&AgentId::new(agent_id), since)
    }
}
