//! The automation scheduler: one tokio task per enabled automation task.
//!
//! Every loop owns a child of the scheduler's root `CancellationToken`.
//! Cancellation is only observed while a loop sleeps, never during a
//! firing, so a job that has started always runs to its terminal status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use steward_contracts::{
    config::SchedulerConfig,
    error::{StewardError, StewardResult},
    job::{JobResult, JobStatus},
    task::{AutomationTask, Trigger},
};
use steward_core::traits::{AgentInvoker, TaskStore};

use crate::cron::{parse_cron, secs_until_next_minute, CronGate};

struct LoopHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// A cancelled loop may still be finishing a firing, but it will not
    /// fire again.
    fn is_live(&self) -> bool {
        !self.join.is_finished() && !self.token.is_cancelled()
    }
}

/// State shared between the scheduler and its loops.
struct Shared {
    tasks: Arc<dyn TaskStore>,
    invoker: Arc<dyn AgentInvoker>,
    config: SchedulerConfig,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    root: CancellationToken,
    loops: Mutex<HashMap<String, LoopHandle>>,
}

impl Scheduler {
    pub fn new(tasks: Arc<dyn TaskStore>, invoker: Arc<dyn AgentInvoker>, config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared { tasks, invoker, config }),
            root: CancellationToken::new(),
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a loop for every enabled task that does not already have one.
    /// Returns the number of loops spawned.
    ///
    /// Tasks with an unparseable cron expression are logged and skipped.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> StewardResult<usize> {
        let mut spawned = 0;
        for task in self.shared.tasks.list_enabled_tasks()? {
            match self.spawn_loop(&task) {
                Ok(true) => spawned += 1,
                Ok(false) => {}
                Err(e) => error!(task_id = %task.id, error = %e, "task not scheduled"),
            }
        }
        info!(spawned, "scheduler started");
        Ok(spawned)
    }

    /// Ids of tasks whose loop is still alive.
    pub fn running_tasks(&self) -> Vec<String> {
        let mut ids: Vec<_> = match self.lock_loops() {
            Ok(loops) => loops.iter().filter(|(_, h)| h.is_live()).map(|(id, _)| id.clone()).collect(),
            Err(_) => Vec::new(),
        };
        ids.sort();
        ids
    }

    /// Enable `task_id` and start its loop if the scheduler is running and no
    /// loop exists for it.
    pub fn enable_task(&self, task_id: &str) -> StewardResult<()> {
        self.shared.tasks.set_task_enabled(task_id, true)?;
        info!(task_id = %task_id, "task enabled");
        if self.root.is_cancelled() {
            return Ok(());
        }
        let task = self
            .shared
            .tasks
            .get_task(task_id)?
            .ok_or_else(|| StewardError::TaskNotFound { task_id: task_id.to_string() })?;
        self.spawn_loop(&task)?;
        Ok(())
    }

    /// Disable `task_id`. Its loop exits at its next sleep; a firing already
    /// in progress completes.
    pub fn disable_task(&self, task_id: &str) -> StewardResult<()> {
        self.shared.tasks.set_task_enabled(task_id, false)?;
        if let Some(handle) = self.lock_loops()?.get(task_id) {
            handle.token.cancel();
        }
        info!(task_id = %task_id, "task disabled");
        Ok(())
    }

    /// Fire `task_id` now, regardless of its trigger or enabled flag.
    pub async fn trigger_task_manually(&self, task_id: &str) -> StewardResult<JobResult> {
        info!(task_id = %task_id, "manual trigger");
        self.shared.fire(task_id).await
    }

    /// Cancel every loop. Callable from any thread, sync or async.
    pub fn stop(&self) {
        self.root.cancel();
        info!("scheduler stopping");
    }

    /// `stop()`, then wait for every loop to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handles: Vec<_> = match self.lock_loops() {
            Ok(mut loops) => loops.drain().map(|(_, h)| h.join).collect(),
            Err(_) => Vec::new(),
        };
        for join in handles {
            if let Err(e) = join.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }
        info!("scheduler stopped");
    }

    /// Returns false when a live loop already exists for the task.
    fn spawn_loop(&self, task: &AutomationTask) -> StewardResult<bool> {
        let mut loops = self.lock_loops()?;
        if loops.get(&task.id).is_some_and(LoopHandle::is_live) {
            return Ok(false);
        }

        let token = self.root.child_token();
        let shared = self.shared.clone();
        let task_id = task.id.clone();
        let join = match &task.trigger {
            Trigger::Interval { seconds } => {
                let every = (*seconds).max(1);
                tokio::spawn(interval_loop(shared, task_id, every, token.clone()))
            }
            Trigger::Once => tokio::spawn(once_loop(shared, task_id, token.clone())),
            Trigger::Cron { expr } => {
                let cron = parse_cron(&task.id, expr)?;
                tokio::spawn(cron_loop(shared, task_id, CronGate::new(cron), token.clone()))
            }
        };

        debug!(task_id = %task.id, trigger = task.trigger.as_str(), "task loop spawned");
        loops.insert(task.id.clone(), LoopHandle { token, join });
        Ok(true)
    }

    fn lock_loops(&self) -> StewardResult<MutexGuard<'_, HashMap<String, LoopHandle>>> {
        self.loops.lock().map_err(|e| StewardError::Store {
            reason: format!("scheduler lock poisoned: {}", e),
        })
    }
}

impl Shared {
    /// One firing: stamp the run, invoke the agent, store the outcome.
    async fn fire(&self, task_id: &str) -> StewardResult<JobResult> {
        let task = self
            .tasks
            .get_task(task_id)?
            .ok_or_else(|| StewardError::TaskNotFound { task_id: task_id.to_string() })?;

        self.tasks.record_run_start(task_id, Utc::now())?;
        match self.invoker.run_agent(&task.agent_id, &task.goal, None).await {
            Ok(result) => {
                self.tasks.record_run_status(task_id, result.status)?;
                info!(task_id = %task_id, job_id = %result.job_id, status = result.status.as_str(), "task fired");
                Ok(result)
            }
            Err(e) => {
                self.tasks.record_run_status(task_id, JobStatus::Failed)?;
                Err(StewardError::SchedulerTrigger {
                    task_id: task_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Fire, logging a firing error. Returns whether the firing succeeded and
    /// the seconds to sleep next: `normal`, or the backoff after an error.
    async fn fire_logged(&self, task_id: &str, normal: u64) -> (bool, u64) {
        match self.fire(task_id).await {
            Ok(_) => (true, normal),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, backoff_secs = self.config.error_backoff_secs, "task firing failed");
                (false, self.config.error_backoff_secs)
            }
        }
    }

    fn still_enabled(&self, task_id: &str) -> bool {
        match self.tasks.get_task(task_id) {
            Ok(Some(task)) => task.enabled,
            Ok(None) => false,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "could not read task, stopping its loop");
                false
            }
        }
    }
}

/// Sleep for `secs`, or return false as soon as `token` is cancelled.
async fn sleep_or_cancel(token: &CancellationToken, secs: u64) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(Duration::from_secs(secs)) => true,
    }
}

// ── Loops ─────────────────────────────────────────────────────────────────────

async fn interval_loop(shared: Arc<Shared>, task_id: String, every: u64, token: CancellationToken) {
    while !token.is_cancelled() && shared.still_enabled(&task_id) {
        let (_, pause) = shared.fire_logged(&task_id, every).await;
        if !sleep_or_cancel(&token, pause).await {
            break;
        }
    }
    debug!(task_id = %task_id, "interval loop exited");
}

/// Fires until one firing succeeds, then disables the task so it does not
/// fire again on the next start.
async fn once_loop(shared: Arc<Shared>, task_id: String, token: CancellationToken) {
    while !token.is_cancelled() && shared.still_enabled(&task_id) {
        let (fired, pause) = shared.fire_logged(&task_id, 0).await;
        if fired {
            if let Err(e) = shared.tasks.set_task_enabled(&task_id, false) {
                warn!(task_id = %task_id, error = %e, "could not disable one-shot task");
            }
            break;
        }
        if !sleep_or_cancel(&token, pause).await {
            break;
        }
    }
    debug!(task_id = %task_id, "one-shot loop exited");
}

/// Wakes at the next minute boundary or after one tick, whichever is
/// sooner. The gate replays any minute a slow firing stepped over.
async fn cron_loop(shared: Arc<Shared>, task_id: String, mut gate: CronGate<Local>, token: CancellationToken) {
    let tick = shared.config.cron_tick_secs.max(1);
    while !token.is_cancelled() && shared.still_enabled(&task_id) {
        let outcome = if gate.should_fire(&Local::now()) {
            shared.fire_logged(&task_id, tick).await
        } else {
            (true, tick)
        };
        let pause = match outcome {
            (true, next) => next.min(secs_until_next_minute(&Local::now())),
            (false, backoff) => backoff,
        };
        if !sleep_or_cancel(&token, pause).await {
            break;
        }
    }
    debug!(task_id = %task_id, "cron loop exited");
}
