//! Error types for the Steward engine.
//!
//! All fallible engine operations return `StewardResult<T>`. Backend-level
//! failures are classified separately as `BackendError` so the router can
//! report *why* each backend in a failover chain was skipped.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single backend call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Connection refused, DNS failure, reset.
    Connection,
    /// The backend took too long.
    Timeout,
    /// 401/403: bad credentials or permissions.
    Auth,
    /// 429.
    RateLimit,
    /// 404 or an unknown model.
    NotFound,
    Other,
}

impl BackendErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendErrorKind::Connection => "connection",
            BackendErrorKind::Timeout => "timeout",
            BackendErrorKind::Auth => "auth",
            BackendErrorKind::RateLimit => "rate_limit",
            BackendErrorKind::NotFound => "not_found",
            BackendErrorKind::Other => "other",
        }
    }
}

/// A classified failure of one backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Classify an HTTP error status. The body is truncated so a verbose
    /// error page does not flood the logs.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => BackendErrorKind::Auth,
            404 => BackendErrorKind::NotFound,
            408 | 504 => BackendErrorKind::Timeout,
            429 => BackendErrorKind::RateLimit,
            502 | 503 => BackendErrorKind::Connection,
            _ => BackendErrorKind::Other,
        };
        Self {
            kind,
            message: format!("HTTP {status}: {}", truncate(body, 300)),
        }
    }

    /// Operator-facing hint for the log line emitted on failover.
    pub fn diagnostic(&self) -> &'static str {
        match self.kind {
            BackendErrorKind::Connection => "backend unreachable; check that the service is running",
            BackendErrorKind::Timeout => "backend timed out; consider raising timeout_secs",
            BackendErrorKind::Auth => "authentication failed; check the configured API key",
            BackendErrorKind::RateLimit => "rate limited by backend",
            BackendErrorKind::NotFound => "endpoint or model not found; check the model name",
            BackendErrorKind::Other => "backend call failed",
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// One failed attempt inside a failover chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFailure {
    pub backend: String,
    pub error: BackendError,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.backend, self.error)
    }
}

fn join_failures(attempts: &[BackendFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The unified error type for the engine.
#[derive(Debug, Error)]
pub enum StewardError {
    /// The requested backend is not registered with the router.
    #[error("backend '{name}' not found (available: {})", available.join(", "))]
    BackendNotFound { name: String, available: Vec<String> },

    /// The primary backend and every fallback failed.
    #[error("all backends unavailable: {}", join_failures(attempts))]
    AllBackendsUnavailable { attempts: Vec<BackendFailure> },

    /// Model output could not be parsed as a plan. Always recovered locally.
    #[error("plan parse error: {reason}")]
    PlanParse { reason: String },

    #[error("agent '{agent_id}' not found")]
    AgentNotFound { agent_id: String },

    #[error("agent '{agent_id}' is disabled")]
    AgentDisabled { agent_id: String },

    #[error("tool '{tool}' is not in the agent's allowed tools")]
    ToolNotAllowed { tool: String },

    #[error("approval rejected for tool '{tool}': {reason}")]
    ApprovalRejected { tool: String, reason: String },

    #[error("approval for tool '{tool}' timed out after {timeout_secs}s")]
    ApprovalTimeout { tool: String, timeout_secs: u64 },

    /// The tool executor reported a failure. `reason` is its own error text.
    #[error("tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// The plan contained a step type the runner cannot execute.
    #[error("unknown step type: {step_type}")]
    UnsupportedStep { step_type: String },

    /// A scheduler firing failed. Transient; the loop retries after a backoff.
    #[error("automation task '{task_id}' trigger failed: {reason}")]
    SchedulerTrigger { task_id: String, reason: String },

    #[error("automation task '{task_id}' not found")]
    TaskNotFound { task_id: String },

    #[error("job '{job_id}' not found")]
    JobNotFound { job_id: String },

    /// The job state machine was asked for an edge it does not have.
    #[error("job '{job_id}' cannot move from {from} to {to}")]
    InvalidTransition { job_id: String, from: String, to: String },

    #[error("store error: {reason}")]
    Store { reason: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },
}

/// Convenience alias used throughout the Steward crates.
pub type StewardResult<T> = Result<T, StewardError>;
