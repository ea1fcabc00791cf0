//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. sequence as 8-byte little-endian
//!   2. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   3. canonical JSON of the request (serde_json, no pretty-printing)
//!   4. canonical JSON of the result

use serde::Serialize;
use sha2::{Digest, Sha256};

use steward_contracts::{
    approval::{ApprovalRequest, ApprovalResult},
    error::{StewardError, StewardResult},
};

use crate::event::ApprovalEntry;

/// Compute the SHA-256 hash for one chain entry.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_entry(
    sequence: u64,
    prev_hash: &str,
    request: &ApprovalRequest,
    result: &ApprovalResult,
) -> StewardResult<String> {
    let request_json = canonical_json(request)?;
    let result_json = canonical_json(result)?;

    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&request_json);
    hasher.update(&result_json);

    Ok(hex::encode(hasher.finalize()))
}

fn canonical_json<T: Serialize>(value: &T) -> StewardResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StewardError::Store {
        reason: format!("approval entry is not serializable: {}", e),
    })
}

/// Verify the integrity of a hash chain.
///
/// Returns `true` when, for every entry:
///
/// 1. **Sequence**: `sequence` equals its position.
/// 2. **Prev-hash linkage**: `prev_hash` equals the preceding entry's
///    `this_hash` (or `GENESIS_HASH` for entry 0).
/// 3. **Hash correctness**: `this_hash` matches the value recomputed from
///    the entry's own fields.
///
/// An empty chain is valid.
pub fn verify_chain(entries: &[ApprovalEntry]) -> bool {
    let mut expected_prev = ApprovalEntry::GENESIS_HASH.to_string();

    for (position, entry) in entries.iter().enumerate() {
        if entry.sequence != position as u64 || entry.prev_hash != expected_prev {
            return false;
        }

        match hash_entry(entry.sequence, &entry.prev_hash, &entry.request, &entry.result) {
            Ok(recomputed) if recomputed == entry.this_hash => {}
            _ => return false,
        }

        expected_prev = entry.this_hash.clone();
    }

    true
}
