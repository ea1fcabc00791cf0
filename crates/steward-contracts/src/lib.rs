//! # steward-contracts
//!
//! Shared types, configuration schema, and the error taxonomy for the
//! Steward engine.
//!
//! All crates in the workspace import from here. No orchestration logic
//! lives in this crate, only data definitions, their small invariants
//! (job status transitions, risk ordering), and error types.

pub mod agent;
pub mod approval;
pub mod chat;
pub mod config;
pub mod error;
pub mod job;
pub mod plan;
pub mod task;
