//! # steward-policy
//!
//! Risk classification and the human-in-the-loop approval gate.
//!
//! ## Overview
//!
//! - [`RiskPolicy`] classifies tool names with an ordered, first-match-wins
//!   rule table (built-in, or loaded from TOML).
//! - [`ThresholdGate`] implements the
//!   [`ApprovalGate`](steward_core::traits::ApprovalGate) trait: anything at
//!   or above the confirmation threshold waits for a decision source, bounded
//!   by the request timeout.
//! - [`Redactor`] masks configured paths and environment variables in the
//!   requests the gate audits and the CLI displays.
//! - [`approval_channel`] connects the gate to a human through an mpsc
//!   channel of [`PendingApproval`]s, each answered over its own oneshot.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use steward_policy::{approval_channel, RiskPolicy, ThresholdGate};
//!
//! let (source, mut inbox) = approval_channel(16);
//! let gate = ThresholdGate::new(RiskPolicy::default(), RiskLevel::Medium)
//!     .with_decision_source(Arc::new(source));
//! // Elsewhere: while let Some(pending) = inbox.recv().await { pending.approve_once("me"); }
//! ```

pub mod gate;
pub mod inbox;
pub mod redact;
pub mod rule;

pub use gate::{ApprovalRecord, ApprovalStats, ThresholdGate};
pub use inbox::{approval_channel, ApprovalInbox, ChannelDecisionSource, PendingApproval, StaticDecisionSource};
pub use redact::Redactor;
pub use rule::{RiskPolicy, RiskTable};

// ── Tests ─────────────────────────────────────────────────────────────────────
