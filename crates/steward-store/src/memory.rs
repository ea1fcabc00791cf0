//! `InMemoryStore`: one `Mutex`-guarded state shared by every clone.
//!
//! Each trait method takes the lock, does its work, and releases it before
//! returning. Nothing here ever awaits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use steward_contracts::{
    agent::{AgentConfig, AgentId},
    config::EngineConfig,
    error::{StewardError, StewardResult},
    job::{JobRun, JobStatus, JobStep},
    task::AutomationTask,
};
use steward_core::traits::{AgentStore, JobStore, TaskStore};

#[derive(Default)]
struct StoreState {
    agents: HashMap<AgentId, AgentConfig>,
    jobs: HashMap<Uuid, JobRun>,
    /// Keyed by job id, each list in insertion order.
    steps: HashMap<Uuid, Vec<JobStep>>,
    tasks: HashMap<String, AutomationTask>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-loaded with the agents and tasks declared in `config`.
    pub fn from_config(config: &EngineConfig) -> StewardResult<Self> {
        let store = Self::new();
        for agent in &config.agents {
            store.upsert_agent(agent.clone())?;
        }
        for task in &config.tasks {
            store.upsert_task(task.clone())?;
        }
        debug!(agents = config.agents.len(), tasks = config.tasks.len(), "store seeded from config");
        Ok(store)
    }

    pub fn list_agents(&self) -> StewardResult<Vec<AgentConfig>> {
        let mut agents: Vec<_> = self.lock()?.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(agents)
    }

    pub fn list_tasks(&self) -> StewardResult<Vec<AutomationTask>> {
        let mut tasks: Vec<_> = self.lock()?.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    fn lock(&self) -> StewardResult<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|e| StewardError::Store {
            reason: format!("store lock poisoned: {}", e),
        })
    }
}

// ── AgentStore ────────────────────────────────────────────────────────────────

impl AgentStore for InMemoryStore {
    fn get_agent(&self, id: &AgentId) -> StewardResult<Option<AgentConfig>> {
        Ok(self.lock()?.agents.get(id).cloned())
    }

    fn record_usage(&self, id: &AgentId) -> StewardResult<()> {
        let mut state = self.lock()?;
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| StewardError::AgentNotFound { agent_id: id.to_string() })?;
        agent.usage_count += 1;
        agent.last_used_at = Some(Utc::now());
        Ok(())
    }

    fn upsert_agent(&self, agent: AgentConfig) -> StewardResult<()> {
        self.lock()?.agents.insert(agent.id.clone(), agent);
        Ok(())
    }
}

// ── JobStore ──────────────────────────────────────────────────────────────────

impl JobStore for InMemoryStore {
    fn create_job(&self, run: &JobRun) -> StewardResult<()> {
        let mut state = self.lock()?;
        if state.jobs.contains_key(&run.id) {
            return Err(StewardError::Store { reason: format!("job {} already exists", run.id) });
        }
        state.jobs.insert(run.id, run.clone());
        Ok(())
    }

    fn update_job(&self, run: &JobRun) -> StewardResult<()> {
        let mut state = self.lock()?;
        match state.jobs.get_mut(&run.id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => Err(StewardError::JobNotFound { job_id: run.id.to_string() }),
        }
    }

    fn create_step(&self, step: &JobStep) -> StewardResult<()> {
        let mut state = self.lock()?;
        if !state.jobs.contains_key(&step.job_id) {
            return Err(StewardError::JobNotFound { job_id: step.job_id.to_string() });
        }
        state.steps.entry(step.job_id).or_default().push(step.clone());
        Ok(())
    }

    fn update_step(&self, step: &JobStep) -> StewardResult<()> {
        let mut state = self.lock()?;
        let existing = state
            .steps
            .get_mut(&step.job_id)
            .and_then(|steps| steps.iter_mut().find(|s| s.id == step.id))
            .ok_or_else(|| StewardError::Store { reason: format!("step {} not found", step.id) })?;
        *existing = step.clone();
        Ok(())
    }

    fn get_job(&self, id: Uuid) -> StewardResult<Option<JobRun>> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    fn steps_for_job(&self, job_id: Uuid) -> StewardResult<Vec<JobStep>> {
        let mut steps = self.lock()?.steps.get(&job_id).cloned().unwrap_or_default();
        steps.sort_by_key(|s| s.step_index);
        Ok(steps)
    }

    fn latest_job_for_agent(&self, agent: &AgentId, after: DateTime<Utc>) -> StewardResult<Option<JobRun>> {
        Ok(self
            .lock()?
            .jobs
            .values()
            .filter(|run| &run.agent_id == agent && run.created_at > after)
            .max_by_key(|run| run.created_at)
            .cloned())
    }
}

// ── TaskStore ─────────────────────────────────────────────────────────────────

impl TaskStore for InMemoryStore {
    fn get_task(&self, id: &str) -> StewardResult<Option<AutomationTask>> {
        Ok(self.lock()?.tasks.get(id).cloned())
    }

    fn list_enabled_tasks(&self) -> StewardResult<Vec<AutomationTask>> {
        let mut tasks: Vec<_> = self.lock()?.tasks.values().filter(|t| t.enabled).cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    fn upsert_task(&self, task: AutomationTask) -> StewardResult<()> {
        self.lock()?.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    fn set_task_enabled(&self, id: &str, enabled: bool) -> StewardResult<()> {
        self.with_task(id, |task| task.enabled = enabled)
    }

    fn record_run_start(&self, id: &str, at: DateTime<Utc>) -> StewardResult<()> {
        self.with_task(id, |task| {
            task.last_run_at = Some(at);
            task.run_count += 1;
        })
    }

    fn record_run_status(&self, id: &str, status: JobStatus) -> StewardResult<()> {
        self.with_task(id, |task| task.last_status = Some(status))
    }
}

impl InMemoryStore {
    fn with_task(&self, id: &str, f: impl FnOnce(&mut AutomationTask)) -> StewardResult<()> {
        let mut state = self.lock()?;
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| StewardError::TaskNotFound { task_id: id.to_string() })?;
        f(task);
        Ok(())
    }
}
