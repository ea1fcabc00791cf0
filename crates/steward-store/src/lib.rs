//! # steward-store
//!
//! Persistence for agents, job runs, job steps, and automation tasks.
//!
//! `InMemoryStore` implements all three store traits from `steward-core`
//! over a single shared state, so one value (cloned freely) can be handed
//! to the runner, the scheduler, and the engine.

pub mod memory;

pub use memory::InMemoryStore;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use steward_contracts::{
        agent::{AgentConfig, AgentId},
        config::EngineConfig,
        error::StewardError,
        job::{JobRun, JobStatus, JobStep},
        plan::Step,
        task::{AutomationTask, Trigger},
    };
    use steward_core::traits::{AgentStore, JobStore, TaskStore};

    use super::InMemoryStore;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn make_agent(id: &str) -> AgentConfig {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "system_prompt": "You tidy things.",
        }))
        .unwrap()
    }

    fn make_task(id: &str, enabled: bool) -> AutomationTask {
        AutomationTask {
            id: id.to_string(),
            name: id.to_string(),
            agent_id: AgentId::new("tidy"),
            goal: "tidy downloads".to_string(),
            trigger: Trigger::Interval { seconds: 60 },
            enabled,
            last_run_at: None,
            run_count: 0,
            last_status: None,
        }
    }

    fn make_step(index: usize) -> Step {
        serde_json::from_value(json!({ "type": "model", "name": format!("s{}", index), "prompt": "go" })).unwrap()
    }

    // ── Agents ────────────────────────────────────────────────────────────────

    /// `record_usage` bumps the counter and stamps the time.
    #[test]
    fn test_record_usage() {
        let store = InMemoryStore::new();
        store.upsert_agent(make_agent("tidy")).unwrap();

        store.record_usage(&AgentId::new("tidy")).unwrap();
        store.record_usage(&AgentId::new("tidy")).unwrap();

        let agent = store.get_agent(&AgentId::new("tidy")).unwrap().unwrap();
        assert_eq!(agent.usage_count, 2);
        assert!(agent.last_used_at.is_some());
    }

    #[test]
    fn test_record_usage_unknown_agent() {
        let store = InMemoryStore::new();
        match store.record_usage(&AgentId::new("ghost")) {
            Err(StewardError::AgentNotFound { agent_id }) => assert_eq!(agent_id, "ghost"),
            other => panic!("expected AgentNotFound, got {:?}", other),
        }
    }

    /// Clones share state: a write through one is visible through another.
    #[test]
    fn test_clones_share_state() {
        let store = InMemoryStore::new();
        let other = store.clone();
        other.upsert_agent(make_agent("tidy")).unwrap();
        assert!(store.get_agent(&AgentId::new("tidy")).unwrap().is_some());
    }

    // ── Jobs and steps ────────────────────────────────────────────────────────

    /// Steps come back ordered by index regardless of insertion order.
    #[test]
    fn test_steps_ordered_by_index() {
        let store = InMemoryStore::new();
        let run = JobRun::new(AgentId::new("tidy"), "goal");
        store.create_job(&run).unwrap();

        for index in [2, 0, 1] {
            store.create_step(&JobStep::start(run.id, index, &make_step(index))).unwrap();
        }

        let indices: Vec<_> = store.steps_for_job(run.id).unwrap().iter().map(|s| s.step_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    /// `update_step` replaces the stored record.
    #[test]
    fn test_update_step() {
        let store = InMemoryStore::new();
        let run = JobRun::new(AgentId::new("tidy"), "goal");
        store.create_job(&run).unwrap();

        let mut step = JobStep::start(run.id, 0, &make_step(0));
        store.create_step(&step).unwrap();
        step.succeed(json!({ "content": "done" }));
        store.update_step(&step).unwrap();

        let stored = store.steps_for_job(run.id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], step);
    }

    #[test]
    fn test_step_for_unknown_job_rejected() {
        let store = InMemoryStore::new();
        let step = JobStep::start(uuid::Uuid::new_v4(), 0, &make_step(0));
        match store.create_step(&step) {
            Err(StewardError::JobNotFound { .. }) => {}
            other => panic!("expected JobNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_update_job_persists_status() {
        let store = InMemoryStore::new();
        let mut run = JobRun::new(AgentId::new("tidy"), "goal");
        store.create_job(&run).unwrap();

        run.transition(JobStatus::Running).unwrap();
        store.update_job(&run).unwrap();

        assert_eq!(store.get_job(run.id).unwrap().unwrap().status, JobStatus::Running);
    }

    /// Only jobs for the agent created strictly after the cut-off count, and
    /// the newest wins.
    #[test]
    fn test_latest_job_for_agent() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let mut old = JobRun::new(AgentId::new("tidy"), "old");
        old.created_at = now - Duration::minutes(10);
        let mut newer = JobRun::new(AgentId::new("tidy"), "newer");
        newer.created_at = now - Duration::minutes(1);
        let mut other_agent = JobRun::new(AgentId::new("other"), "other");
        other_agent.created_at = now;

        for run in [&old, &newer, &other_agent] {
            store.create_job(run).unwrap();
        }

        let since = now - Duration::minutes(5);
        let latest = store.latest_job_for_agent(&AgentId::new("tidy"), since).unwrap().unwrap();
        assert_eq!(latest.goal, "newer");

        assert!(store.latest_job_for_agent(&AgentId::new("tidy"), now).unwrap().is_none());
    }

    // ── Tasks ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_list_enabled_tasks() {
        let store = InMemoryStore::new();
        store.upsert_task(make_task("b", true)).unwrap();
        store.upsert_task(make_task("a", true)).unwrap();
        store.upsert_task(make_task("c", false)).unwrap();

        let ids: Vec<_> = store.list_enabled_tasks().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        store.set_task_enabled("c", true).unwrap();
        assert_eq!(store.list_enabled_tasks().unwrap().len(), 3);
    }

    #[test]
    fn test_run_bookkeeping() {
        let store = InMemoryStore::new();
        store.upsert_task(make_task("nightly", true)).unwrap();

        let at = Utc::now();
        store.record_run_start("nightly", at).unwrap();
        store.record_run_status("nightly", JobStatus::Failed).unwrap();
        store.record_run_start("nightly", at).unwrap();

        let task = store.get_task("nightly").unwrap().unwrap();
        assert_eq!(task.run_count, 2);
        assert_eq!(task.last_run_at, Some(at));
        assert_eq!(task.last_status, Some(JobStatus::Failed));
    }

    #[test]
    fn test_unknown_task() {
        let store = InMemoryStore::new();
        match store.set_task_enabled("ghost", false) {
            Err(StewardError::TaskNotFound { task_id }) => assert_eq!(task_id, "ghost"),
            other => panic!("expected TaskNotFound, got {:?}", other),
        }
    }

    // ── Seeding ───────────────────────────────────────────────────────────────

    #[test]
    fn test_from_config_seeds_agents_and_tasks() {
        let config = EngineConfig::from_toml_str(
            r#"
[providers.ollama]
kind = "ollama"

[[agents]]
id = "tidy"
name = "Tidy"
system_prompt = "You tidy things."

[[tasks]]
id = "nightly"
name = "Nightly tidy"
agent_id = "tidy"
goal = "tidy downloads"
trigger = { kind = "cron", expr = "0 2 * * *" }
"#,
        )
        .unwrap();

        let store = InMemoryStore::from_config(&config).unwrap();
        assert_eq!(store.list_agents().unwrap().len(), 1);
        assert_eq!(store.list_tasks().unwrap()[0].trigger.as_str(), "cron");
    }
}
