//! Per-minute cron matching.
//!
//! Expressions are standard 5-field cron parsed with `croner`. A cron loop
//! wakes every tick and asks `CronGate::should_fire` whether a minute it has
//! not yet seen matches. The gate covers every minute between two checks, so
//! a late wake-up never skips a matching minute, and it never looks at the
//! same minute twice.

use chrono::{DateTime, DurationRound, TimeDelta, TimeZone, Timelike};
use croner::Cron;

use steward_contracts::error::{StewardError, StewardResult};

/// Longest gap, in minutes, the gate replays after a late check.
pub const MAX_CATCH_UP_MINUTES: i64 = 60;

/// Parse a 5-field cron expression.
pub fn parse_cron(task_id: &str, expr: &str) -> StewardResult<Cron> {
    Cron::new(expr).parse().map_err(|e| StewardError::SchedulerTrigger {
        task_id: task_id.to_string(),
        reason: format!("invalid cron expression '{}': {}", expr, e),
    })
}

/// Start of the minute containing `at`.
fn minute_of<Tz: TimeZone>(at: &DateTime<Tz>) -> DateTime<Tz> {
    at.clone().duration_trunc(TimeDelta::minutes(1)).unwrap_or_else(|_| at.clone())
}

/// True when `cron` matches the minute containing `at`. Seconds are ignored.
pub fn matches_minute<Tz: TimeZone>(cron: &Cron, at: &DateTime<Tz>) -> bool {
    cron.is_time_matching(&minute_of(at)).unwrap_or(false)
}

/// Whole seconds from `now` to the start of the next minute, at least 1.
pub fn secs_until_next_minute<Tz: TimeZone>(now: &DateTime<Tz>) -> u64 {
    60 - u64::from(now.second().min(59))
}

/// Fires at most once per check, and at most once per matching minute.
pub struct CronGate<Tz: TimeZone> {
    cron: Cron,
    last_checked: Option<DateTime<Tz>>,
}

impl<Tz: TimeZone> CronGate<Tz> {
    pub fn new(cron: Cron) -> Self {
        Self { cron, last_checked: None }
    }

    /// True when any minute after the previous check, up to and including
    /// the minute of `now`, matches. The first check only looks at `now`.
    pub fn should_fire(&mut self, now: &DateTime<Tz>) -> bool {
        let minute = minute_of(now);
        let first = match &self.last_checked {
            Some(last) if *last >= minute => return false,
            Some(last) => {
                let floor = minute
                    .clone()
                    .checked_sub_signed(TimeDelta::minutes(MAX_CATCH_UP_MINUTES - 1))
                    .unwrap_or_else(|| minute.clone());
                match last.clone().checked_add_signed(TimeDelta::minutes(1)) {
                    Some(next) if next > floor => next,
                    _ => floor,
                }
            }
            None => minute.clone(),
        };
        self.last_checked = Some(minute.clone());

        let mut at = first;
        while at <= minute {
            if matches_minute(&self.cron, &at) {
                return true;
            }
            match at.checked_add_signed(TimeDelta::minutes(1)) {
                Some(next) => at = next,
                None => break,
            }
        }
        false
    }
}
