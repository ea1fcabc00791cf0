//! # steward-audit
//!
//! Append-only, SHA-256 hash-chained record of every approval decision the
//! gate makes.
//!
//! ## Overview
//!
//! Each request/result pair the gate resolves is wrapped in an
//! `ApprovalEntry` that links to the previous entry via its SHA-256 hash.
//! Editing any stored entry breaks the chain and is detected by
//! `verify_chain`. An optional JSONL journal makes the trail survive
//! restarts.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use steward_audit::InMemoryApprovalLog;
//! use steward_core::traits::ApprovalAudit;
//!
//! let log = InMemoryApprovalLog::with_journal("approvals.jsonl")?;
//! log.record(&request, &result)?;
//!
//! assert!(log.verify_integrity());
//! let snapshot = log.export_log()?;
//! ```

pub mod chain;
pub mod event;
pub mod memory;

pub use chain::{hash_entry, verify_chain};
pub use event::{ApprovalEntry, ApprovalLog};
pub use memory::{load_journal, InMemoryApprovalLog};

// ── Tests ─────────────────────────────────────────────────────────────────────
