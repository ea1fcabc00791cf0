//! In-memory implementation of `ApprovalAudit`, with an optional JSONL
//! journal.
//!
//! `InMemoryApprovalLog` keeps every entry in a `Vec` protected by a
//! `Mutex`, so the gate may call `record()` from any task. When opened with
//! a journal path, each entry is also appended to the file as one JSON line
//! and flushed before `record()` returns; reopening the same path resumes
//! the chain where it left off. A failed append is cut back to the previous
//! end of file so the journal never keeps half a line.
//!
//! Use `export_log()` to obtain a snapshot and `verify_integrity()` at any
//! time to confirm the chain has not been tampered with in memory.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};

use steward_contracts::{
    approval::{ApprovalRequest, ApprovalResult},
    error::{StewardError, StewardResult},
};
use steward_core::traits::ApprovalAudit;

use crate::{
    chain::{hash_entry, verify_chain},
    event::{ApprovalEntry, ApprovalLog},
};

// ── Internal mutable state ────────────────────────────────────────────────────

pub(crate) struct LogState {
    /// All entries written so far, in append order.
    pub(crate) entries: Vec<ApprovalEntry>,

    /// The `this_hash` of the last entry, or `GENESIS_HASH` before any entry
    /// has been written.
    pub(crate) last_hash: String,

    journal: Option<File>,
}

// ── Public log ────────────────────────────────────────────────────────────────

/// An append-only approval audit trail backed by a SHA-256 hash chain.
#[derive(Clone)]
pub struct InMemoryApprovalLog {
    pub(crate) state: Arc<Mutex<LogState>>,
    journal_path: Option<PathBuf>,
}

impl InMemoryApprovalLog {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState {
                entries: Vec::new(),
                last_hash: ApprovalEntry::GENESIS_HASH.to_string(),
                journal: None,
            })),
            journal_path: None,
        }
    }

    /// Open (or create) a JSONL journal at `path` and resume its chain.
    ///
    /// Returns `StewardError::Store` if the file cannot be opened, a line is
    /// not a valid entry, or the existing chain fails verification.
    pub fn with_journal(path: impl AsRef<Path>) -> StewardResult<Self> {
        let path = path.as_ref();
        let entries = if path.exists() { load_journal(path)? } else { Vec::new() };
        if !verify_chain(&entries) {
            return Err(StewardError::Store {
                reason: format!("approval journal '{}' failed integrity verification", path.display()),
            });
        }

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StewardError::Store {
                reason: format!("failed to open approval journal '{}': {}", path.display(), e),
            })?;

        let last_hash = entries
            .last()
            .map(|e| e.this_hash.clone())
            .unwrap_or_else(|| ApprovalEntry::GENESIS_HASH.to_string());
        info!(path = %path.display(), entries = entries.len(), "approval journal opened");

        Ok(Self {
            state: Arc::new(Mutex::new(LogState { entries, last_hash, journal: Some(journal) })),
            journal_path: Some(path.to_path_buf()),
        })
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export a snapshot containing all entries written so far.
    pub fn export_log(&self) -> StewardResult<ApprovalLog> {
        let state = self.lock()?;
        Ok(ApprovalLog {
            entries: state.entries.clone(),
            exported_at: Utc::now(),
            terminal_hash: state.entries.last().map(|e| e.this_hash.clone()).unwrap_or_default(),
        })
    }

    /// Verify that the in-memory chain has not been tampered with.
    pub fn verify_integrity(&self) -> bool {
        match self.lock() {
            Ok(state) => verify_chain(&state.entries),
            Err(_) => false,
        }
    }

    fn lock(&self) -> StewardResult<MutexGuard<'_, LogState>> {
        self.state.lock().map_err(|e| StewardError::Store {
            reason: format!("approval log lock poisoned: {}", e),
        })
    }
}

impl Default for InMemoryApprovalLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Read every entry of a JSONL journal, in file order. Blank lines are
/// skipped.
pub fn load_journal(path: &Path) -> StewardResult<Vec<ApprovalEntry>> {
    let file = File::open(path).map_err(|e| StewardError::Store {
        reason: format!("failed to read approval journal '{}': {}", path.display(), e),
    })?;

    let mut entries = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| StewardError::Store {
            reason: format!("failed to read approval journal '{}': {}", path.display(), e),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: ApprovalEntry = serde_json::from_str(&line).map_err(|e| StewardError::Store {
            reason: format!("approval journal '{}' line {}: {}", path.display(), number + 1, e),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

// ── Journal appends ───────────────────────────────────────────────────────────

/// What `append_line` needs from the journal besides `Write`.
pub(crate) trait JournalFile: Write {
    fn end_offset(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, offset: u64) -> io::Result<()>;
}

impl JournalFile for File {
    fn end_offset(&mut self) -> io::Result<u64> {
        self.metadata().map(|m| m.len())
    }

    /// The journal is opened in append mode, so the next write lands at the
    /// new end without a seek.
    fn truncate_to(&mut self, offset: u64) -> io::Result<()> {
        self.set_len(offset)
    }
}

/// Write `line` and a newline, then flush. On failure the journal is
/// truncated back to its length before the call.
pub(crate) fn append_line<J: JournalFile>(journal: &mut J, line: &str) -> io::Result<()> {
    let offset = journal.end_offset()?;
    let written = journal
        .write_all(format!("{}\n", line).as_bytes())
        .and_then(|_| journal.flush());
    if let Err(e) = written {
        if let Err(rollback) = journal.truncate_to(offset) {
            warn!(offset, error = %rollback, "could not cut back partial journal line");
        }
        return Err(e);
    }
    Ok(())
}

// ── ApprovalAudit impl ────────────────────────────────────────────────────────

impl ApprovalAudit for InMemoryApprovalLog {
    /// Append one request/result pair to the hash chain.
    ///
    /// The journal line is written and flushed before the entry becomes
    /// visible in memory, so a failed write leaves both unchanged.
    fn record(&self, request: &ApprovalRequest, result: &ApprovalResult) -> StewardResult<()> {
        let mut state = self.lock()?;

        let sequence = state.entries.len() as u64;
        let prev_hash = state.last_hash.clone();
        let this_hash = hash_entry(sequence, &prev_hash, request, result)?;

        let entry = ApprovalEntry {
            sequence,
            request: request.clone(),
            result: result.clone(),
            prev_hash,
            this_hash: this_hash.clone(),
        };

        if let Some(journal) = state.journal.as_mut() {
            let line = serde_json::to_string(&entry).map_err(|e| StewardError::Store {
                reason: format!("approval entry is not serializable: {}", e),
            })?;
            append_line(journal, &line).map_err(|e| StewardError::Store {
                reason: format!("failed to append to approval journal: {}", e),
            })?;
        }

        debug!(request_id = %request.id, sequence, hash = %this_hash, "approval recorded");
        state.entries.push(entry);
        state.last_hash = this_hash;
        Ok(())
    }
}
