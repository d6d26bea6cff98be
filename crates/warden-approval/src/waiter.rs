//! Waiting for a decision on a pending request.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{ApprovalError, ApprovalResult};
use crate::queue::ApprovalQueue;
use crate::request::{ApprovalRequest, ApprovalStatus, RequestId};

/// Resolves once a request leaves `pending` or its deadline passes,
/// whichever comes first. Never waits past the deadline.
pub struct DecisionWaiter {
    queue: Arc<ApprovalQueue>,
    request_id: RequestId,
    deadline: DateTime<Utc>,
    receiver: watch::Receiver<ApprovalStatus>,
}

impl std::fmt::Debug for DecisionWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionWaiter")
            .field("request_id", &self.request_id)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl DecisionWaiter {
    /// Wait on `request`, which must belong to `queue`.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::NotFound`] if the queue does not hold the request.
    pub fn new(queue: Arc<ApprovalQueue>, request: &ApprovalRequest) -> ApprovalResult<Self> {
        let receiver = queue.watch(request.id)?;
        Ok(Self {
            queue,
            request_id: request.id,
            deadline: request.expires_at,
            receiver,
        })
    }

    /// The request being waited on.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// When waiting gives up and the request is expired.
    #[must_use]
    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Wait for the outcome.
    ///
    /// Returns the resolved request for approvals and denials alike; callers
    /// inspect [`ApprovalRequest::status`]. When the deadline passes first the
    /// request is expired in the queue.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::Expired`] if the request expired
    /// - [`ApprovalError::NotFound`] if it was evicted while waiting
    pub async fn wait(self) -> ApprovalResult<ApprovalRequest> {
        let Self {
            queue,
            request_id,
            deadline,
            mut receiver,
        } = self;

        loop {
            let remaining = remaining_until(deadline, queue.now());
            let outcome = tokio::time::timeout(
                remaining,
                receiver.wait_for(|status| status.is_terminal()),
            )
            .await
            .map(|changed| changed.is_ok());

            match outcome {
                Ok(true) => break,
                Ok(false) => {
                    // The queue was replaced underneath us; pick up the new channel.
                    debug!(request_id = %request_id, "Decision channel closed, re-subscribing");
                    receiver = queue.watch(request_id)?;
                },
                Err(_) => {
                    match queue.expire(request_id) {
                        Ok(_) => info!(request_id = %request_id, "Approval request timed out"),
                        Err(ApprovalError::InvalidState { .. }) => {},
                        Err(e) => return Err(e),
                    }
                    break;
                },
            }
        }

        let request = queue.get(request_id)?;
        if request.status == ApprovalStatus::Expired {
            return Err(ApprovalError::Expired(request_id));
        }
        Ok(request)
    }
}

fn remaining_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    deadline
        .signed_duration_since(now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
