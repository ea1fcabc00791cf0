//! # steward-core
//!
//! The orchestration core of the Steward engine.
//!
//! This crate provides:
//! - The seam traits (`ChatRouter`, `ToolExecutor`, `ApprovalGate`,
//!   `DecisionSource`, `ApprovalAudit`, the stores, `AgentInvoker`)
//! - The `PlanGenerator` that turns a goal into a `Plan`
//! - The `AgentRunner` that executes a plan step by step behind the
//!   approval gate
//!
//! ## Usage
//!
//! ```rust,ignore
//! use steward_core::{AgentRunner, traits::{ChatRouter, ApprovalGate, ToolExecutor}};
//! ```

pub mod planner;
pub mod runner;
pub mod traits;

pub use planner::PlanGenerator;
pub use runner::AgentRunner;
