//! Decision sources: the bridge between the gate and whoever decides.
//!
//! `approval_channel` returns a connected pair. The gate side
//! (`ChannelDecisionSource`) sends each request as a `PendingApproval` over
//! an mpsc channel and awaits a oneshot reply. The decider side
//! (`ApprovalInbox`) receives pending approvals on any thread, async or
//! blocking, and answers each exactly once by consuming it.
//!
//! Nothing is shared between the two sides except the channels, so a slow
//! human never blocks anything other than the one awaiting step.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use steward_contracts::{
    approval::{ApprovalRequest, ApprovalResult, ApprovalScope},
    error::StewardResult,
};
use steward_core::traits::DecisionSource;

/// Default number of undecided requests the channel buffers.
pub const DEFAULT_INBOX_CAPACITY: usize = 32;

/// One request waiting for a human decision.
///
/// Every answer method consumes the value, so a request is answered at most
/// once. Dropping it unanswered counts as a rejection on the gate side.
#[derive(Debug)]
pub struct PendingApproval {
    request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalResult>,
}

impl PendingApproval {
    pub fn request(&self) -> &ApprovalRequest {
        &self.request
    }

    /// Approve this call only. Returns false if the requester stopped
    /// waiting (timed out or shut down) before the answer arrived.
    pub fn approve_once(self, approver: impl Into<String>) -> bool {
        let result = ApprovalResult::approved(self.request.id, ApprovalScope::Once, approver);
        self.respond(result)
    }

    /// Approve this call and every later call to the same tool.
    pub fn approve_always(self, approver: impl Into<String>) -> bool {
        let result = ApprovalResult::approved(self.request.id, ApprovalScope::Always, approver);
        self.respond(result)
    }

    pub fn reject(self, approver: impl Into<String>, reason: impl Into<String>) -> bool {
        let result = ApprovalResult::rejected(self.request.id, Some(approver.into()), reason);
        self.respond(result)
    }

    fn respond(self, result: ApprovalResult) -> bool {
        self.responder.send(result).is_ok()
    }
}

/// The decider's end of the bridge.
#[derive(Debug)]
pub struct ApprovalInbox {
    rx: mpsc::Receiver<PendingApproval>,
}

impl ApprovalInbox {
    /// Wait for the next request. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<PendingApproval> {
        self.rx.recv().await
    }

    /// Blocking variant for a dedicated OS thread (e.g. a terminal prompt).
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime context.
    pub fn blocking_recv(&mut self) -> Option<PendingApproval> {
        self.rx.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Option<PendingApproval> {
        self.rx.try_recv().ok()
    }
}

/// The gate's end of the bridge.
#[derive(Debug, Clone)]
pub struct ChannelDecisionSource {
    tx: mpsc::Sender<PendingApproval>,
}

/// Create a connected decision source and inbox.
pub fn approval_channel(capacity: usize) -> (ChannelDecisionSource, ApprovalInbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelDecisionSource { tx }, ApprovalInbox { rx })
}

#[async_trait]
impl DecisionSource for ChannelDecisionSource {
    async fn decide(&self, request: &ApprovalRequest) -> StewardResult<ApprovalResult> {
        let (responder, response) = oneshot::channel();
        let pending = PendingApproval { request: request.clone(), responder };

        if self.tx.send(pending).await.is_err() {
            warn!(request_id = %request.id, "approval inbox closed, rejecting");
            return Ok(ApprovalResult::rejected(request.id, None, "approval inbox closed"));
        }

        match response.await {
            Ok(result) => Ok(result),
            Err(_) => {
                warn!(request_id = %request.id, "approval dropped without a decision");
                Ok(ApprovalResult::rejected(request.id, None, "approval dropped without a decision"))
            }
        }
    }
}

/// Answers every request the same way. For unattended runs and tests.
#[derive(Debug, Clone)]
pub struct StaticDecisionSource {
    approve: bool,
    approver: String,
}

impl StaticDecisionSource {
    pub fn approve_all(approver: impl Into<String>) -> Self {
        Self { approve: true, approver: approver.into() }
    }

    pub fn reject_all(approver: impl Into<String>) -> Self {
        Self { approve: false, approver: approver.into() }
    }
}

#[async_trait]
impl DecisionSource for StaticDecisionSource {
    async fn decide(&self, request: &ApprovalRequest) -> StewardResult<ApprovalResult> {
        Ok(if self.approve {
            ApprovalResult::approved(request.id, ApprovalScope::Once, self.approver.clone())
        } else {
            ApprovalResult::rejected(request.id, Some(self.approver.clone()), "rejected by static policy")
        })
    }
}
