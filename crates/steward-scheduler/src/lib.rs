//! # steward-scheduler
//!
//! Drives agents from automation tasks: fixed intervals, 5-field cron
//! expressions, and one-shot tasks.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let scheduler = Scheduler::new(store, runner, config.scheduler.clone());
//! scheduler.start()?;
//! // ...
//! scheduler.shutdown().await;
//! ```

pub mod cron;
pub mod scheduler;

pub use cron::{matches_minute, parse_cron, secs_until_next_minute, CronGate};
pub use scheduler::Scheduler;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone, Utc};

    use steward_contracts::{
        agent::AgentId,
        config::SchedulerConfig,
        error::{StewardError, StewardResult},
        job::{JobResult, JobRun, JobStatus},
        task::{AutomationTask, Trigger},
    };
    use steward_core::traits::{AgentInvoker, TaskStore};
    use steward_store::InMemoryStore;

    use super::*;

    // ── Mocks ─────────────────────────────────────────────────────────────────

    /// Records every goal it is asked to run. The first `failures` calls
    /// fail before a job exists.
    struct MockInvoker {
        calls: Arc<Mutex<Vec<String>>>,
        failures: AtomicUsize,
    }

    impl MockInvoker {
        fn new(failures: usize) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(vec![]));
            (Arc::new(Self { calls: calls.clone(), failures: AtomicUsize::new(failures) }), calls)
        }
    }

    #[async_trait]
    impl AgentInvoker for MockInvoker {
        async fn run_agent(&self, agent_id: &AgentId, goal: &str, _context: Option<&str>) -> StewardResult<JobResult> {
            self.calls.lock().unwrap().push(goal.to_string());
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StewardError::AgentNotFound { agent_id: agent_id.to_string() });
            }
            let mut run = JobRun::new(agent_id.clone(), goal);
            run.transition(JobStatus::Running)?;
            run.transition(JobStatus::Success)?;
            Ok(JobResult::from_run(&run, vec![]))
        }
    }

    fn make_task(id: &str, trigger: Trigger) -> AutomationTask {
        AutomationTask {
            id: id.to_string(),
            name: id.to_string(),
            agent_id: AgentId::new("tidy"),
            goal: format!("goal of {}", id),
            trigger,
            enabled: true,
            last_run_at: None,
            run_count: 0,
            last_status: None,
        }
    }

    fn setup(tasks: Vec<AutomationTask>, failures: usize) -> (Scheduler, InMemoryStore, Arc<Mutex<Vec<String>>>) {
        let store = InMemoryStore::new();
        for task in tasks {
            store.upsert_task(task).unwrap();
        }
        let (invoker, calls) = MockInvoker::new(failures);
        let config = SchedulerConfig { error_backoff_secs: 60, cron_tick_secs: 60 };
        (Scheduler::new(Arc::new(store.clone()), invoker, config), store, calls)
    }

    fn call_count(calls: &Arc<Mutex<Vec<String>>>) -> usize {
        calls.lock().unwrap().len()
    }

    // ── Interval loops ────────────────────────────────────────────────────────

    /// An interval task fires immediately, then once per interval.
    #[tokio::test(start_paused = true)]
    async fn test_interval_fires_every_period() {
        let (scheduler, store, calls) = setup(vec![make_task("t", Trigger::Interval { seconds: 10 })], 0);

        assert_eq!(scheduler.start().unwrap(), 1);
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(call_count(&calls), 3, "fires at t=0, 10, 20");
        let task = store.get_task("t").unwrap().unwrap();
        assert_eq!(task.run_count, 3);
        assert_eq!(task.last_status, Some(JobStatus::Success));
        scheduler.shutdown().await;
    }

    /// Disabling a task stops its loop before the next firing.
    #[tokio::test(start_paused = true)]
    async fn test_disable_stops_interval_loop() {
        let (scheduler, _store, calls) = setup(vec![make_task("t", Trigger::Interval { seconds: 10 })], 0);

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.disable_task("t").unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(call_count(&calls), 1);
        assert!(scheduler.running_tasks().is_empty());
    }

    /// Re-enabling a disabled task spawns a fresh loop.
    #[tokio::test(start_paused = true)]
    async fn test_enable_restarts_loop() {
        let (scheduler, store, calls) = setup(vec![make_task("t", Trigger::Interval { seconds: 10 })], 0);
        store.set_task_enabled("t", false).unwrap();

        assert_eq!(scheduler.start().unwrap(), 0);
        scheduler.enable_task("t").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(call_count(&calls), 1);
        assert_eq!(scheduler.running_tasks(), vec!["t"]);
        scheduler.shutdown().await;
    }

    /// `stop()` halts every loop; `shutdown()` joins them.
    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_all_loops() {
        let (scheduler, _store, calls) = setup(
            vec![
                make_task("a", Trigger::Interval { seconds: 10 }),
                make_task("b", Trigger::Interval { seconds: 10 }),
            ],
            0,
        );

        assert_eq!(scheduler.start().unwrap(), 2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.stop();
        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(call_count(&calls), 2);
        assert!(scheduler.running_tasks().is_empty());
    }

    /// A firing error waits the backoff and then retries.
    #[tokio::test(start_paused = true)]
    async fn test_firing_error_backs_off_then_retries() {
        let (scheduler, store, calls) = setup(vec![make_task("t", Trigger::Interval { seconds: 1000 })], 1);

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(call_count(&calls), 1);
        assert_eq!(store.get_task("t").unwrap().unwrap().last_status, Some(JobStatus::Failed));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(call_count(&calls), 2);
        assert_eq!(store.get_task("t").unwrap().unwrap().last_status, Some(JobStatus::Success));
        scheduler.shutdown().await;
    }

    // ── One-shot ──────────────────────────────────────────────────────────────

    /// A one-shot task fires exactly once and is then disabled.
    #[tokio::test(start_paused = true)]
    async fn test_once_fires_once_and_disables() {
        let (scheduler, store, calls) = setup(vec![make_task("t", Trigger::Once)], 0);

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(call_count(&calls), 1);
        let task = store.get_task("t").unwrap().unwrap();
        assert!(!task.enabled);
        assert_eq!(task.run_count, 1);

        assert_eq!(scheduler.start().unwrap(), 0, "disabled task is not rescheduled");
    }

    // ── Manual trigger ────────────────────────────────────────────────────────

    /// A manual trigger runs the agent and updates the task's counters.
    #[tokio::test]
    async fn test_manual_trigger_updates_task() {
        let (scheduler, store, calls) = setup(vec![make_task("t", Trigger::Cron { expr: "0 9 * * *".into() })], 0);

        let result = scheduler.trigger_task_manually("t").await.unwrap();

        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(*calls.lock().unwrap(), vec!["goal of t"]);
        let task = store.get_task("t").unwrap().unwrap();
        assert_eq!(task.run_count, 1);
        assert!(task.last_run_at.is_some());
        assert_eq!(task.last_status, Some(JobStatus::Success));
    }

    #[tokio::test]
    async fn test_manual_trigger_error_is_scheduler_trigger() {
        let (scheduler, store, _calls) = setup(vec![make_task("t", Trigger::Once)], 1);

        match scheduler.trigger_task_manually("t").await {
            Err(StewardError::SchedulerTrigger { task_id, reason }) => {
                assert_eq!(task_id, "t");
                assert!(reason.contains("tidy"), "reason: {}", reason);
            }
            other => panic!("expected SchedulerTrigger, got {:?}", other),
        }
        assert_eq!(store.get_task("t").unwrap().unwrap().last_status, Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_manual_trigger_unknown_task() {
        let (scheduler, _store, _calls) = setup(vec![], 0);
        match scheduler.trigger_task_manually("ghost").await {
            Err(StewardError::TaskNotFound { task_id }) => assert_eq!(task_id, "ghost"),
            other => panic!("expected TaskNotFound, got {:?}", other),
        }
    }

    // ── Cron ──────────────────────────────────────────────────────────────────

    /// Matching is per minute: seconds within the minute do not matter.
    #[test]
    fn test_cron_matches_minute() {
        let cron = parse_cron("t", "0 9 * * 1-5").unwrap();
        // 2026-10-12 is a Monday.
        let monday_nine = Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 37).unwrap();
        let monday_nine_one = Utc.with_ymd_and_hms(2026, 10, 12, 9, 1, 0).unwrap();
        let saturday_nine = Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap();

        assert!(matches_minute(&cron, &monday_nine));
        assert!(!matches_minute(&cron, &monday_nine_one));
        assert!(!matches_minute(&cron, &saturday_nine));
    }

    /// The gate fires once per matching minute, however often it is asked.
    #[test]
    fn test_cron_gate_fires_once_per_minute() {
        let mut gate = CronGate::new(parse_cron("t", "*/5 * * * *").unwrap());
        let first = Utc.with_ymd_and_hms(2026, 10, 12, 9, 5, 1).unwrap();
        let same_minute = Utc.with_ymd_and_hms(2026, 10, 12, 9, 5, 50).unwrap();
        let next_match = Utc.with_ymd_and_hms(2026, 10, 12, 9, 10, 0).unwrap();

        assert!(gate.should_fire(&first));
        assert!(!gate.should_fire(&same_minute));
        assert!(gate.should_fire(&next_match));
    }

    /// Checks that drift past a minute boundary still fire for the minute
    /// they stepped over, exactly once.
    #[test]
    fn test_cron_gate_catches_up_skipped_minute() {
        let mut gate = CronGate::new(parse_cron("t", "50 9 * * *").unwrap());
        let start = Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 59).unwrap();

        let mut fired_at = Vec::new();
        for k in 0..120 {
            let now = start + TimeDelta::milliseconds(60_020 * k);
            if gate.should_fire(&now) {
                fired_at.push(now);
            }
        }

        // The 09:50 minute is never observed directly: checks land at
        // 09:49:59.98 and then 09:51:00.00.
        assert_eq!(fired_at, vec![start + TimeDelta::milliseconds(60_020 * 50)]);
    }

    /// Every minute of a long gap is covered up to the catch-up limit.
    #[test]
    fn test_cron_gate_catch_up_is_bounded() {
        let mut gate = CronGate::new(parse_cron("t", "0 * * * *").unwrap());
        let first = Utc.with_ymd_and_hms(2026, 10, 12, 9, 30, 0).unwrap();
        let three_hours_later = Utc.with_ymd_and_hms(2026, 10, 12, 12, 30, 0).unwrap();
        let half_hour_more = Utc.with_ymd_and_hms(2026, 10, 12, 12, 59, 0).unwrap();

        assert!(!gate.should_fire(&first));
        assert!(gate.should_fire(&three_hours_later), "12:00 is inside the window");
        assert!(!gate.should_fire(&half_hour_more));
    }

    /// Checks exactly one minute apart fire for every minute.
    #[test]
    fn test_every_minute_gate_fires_each_minute() {
        let mut gate = CronGate::new(parse_cron("t", "* * * * *").unwrap());
        let start = Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 0).unwrap();
        let fired = (0..120)
            .filter(|k| gate.should_fire(&(start + TimeDelta::seconds(60 * *k))))
            .count();
        assert_eq!(fired, 120);
    }

    #[test]
    fn test_secs_until_next_minute() {
        let on_the_minute = Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 59).unwrap() + TimeDelta::milliseconds(900);
        assert_eq!(secs_until_next_minute(&on_the_minute), 60);
        assert_eq!(secs_until_next_minute(&late), 1);
    }

    #[test]
    fn test_invalid_cron_rejected() {
        match parse_cron("t", "every tuesday").err() {
            Some(StewardError::SchedulerTrigger { task_id, .. }) => assert_eq!(task_id, "t"),
            other => panic!("expected SchedulerTrigger, got {:?}", other),
        }
    }

    /// A task with a bad expression is skipped; the others still start.
    #[tokio::test(start_paused = true)]
    async fn test_start_skips_invalid_cron() {
        let (scheduler, _store, _calls) = setup(
            vec![
                make_task("bad", Trigger::Cron { expr: "not cron".into() }),
                make_task("good", Trigger::Interval { seconds: 60 }),
            ],
            0,
        );

        assert_eq!(scheduler.start().unwrap(), 1);
        assert_eq!(scheduler.running_tasks(), vec!["good"]);
        scheduler.shutdown().await;
    }
}
