//! Approval audit entry and log types.
//!
//! `ApprovalEntry` is a single link in the hash chain: one approval request,
//! its result, and the SHA-256 hashes that make tampering detectable.
//! `ApprovalLog` is the exported snapshot of the whole chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use steward_contracts::approval::{ApprovalRequest, ApprovalResult};

/// A single entry in the approval hash chain.
///
/// Modifying any field, including those of the embedded request or result,
/// invalidates `this_hash` and every later `prev_hash`, which
/// `verify_chain` detects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalEntry {
    /// Position in the chain, starting at 0.
    pub sequence: u64,

    pub request: ApprovalRequest,

    pub result: ApprovalResult,

    /// SHA-256 hash (hex) of the previous entry, or `GENESIS_HASH` for the
    /// first entry.
    pub prev_hash: String,

    /// Computed by `hash_entry()` over (sequence, prev_hash, canonical JSON
    /// of request and result).
    pub this_hash: String,
}

impl ApprovalEntry {
    /// The sentinel `prev_hash` of the first entry: 64 hex zeros.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// An exported snapshot of the approval chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalLog {
    /// All entries in chain order (sequence 0 first).
    pub entries: Vec<ApprovalEntry>,

    pub exported_at: DateTime<Utc>,

    /// The `this_hash` of the last entry. Empty string if the log is empty.
    pub terminal_hash: String,
}
