//! Warden Approval - the human-in-the-loop stage of the trust boundary.
//!
//! Anything the policy engine escalates lands here:
//!
//! - [`ApprovalQueue`] owns every [`ApprovalRequest`] and its audit trail. A
//!   request leaves `pending` exactly once, to `approved`, `denied`,
//!   `auto_approved` or `expired`.
//! - [`AutoApproveRuleEngine`] holds learned and authored rules that let
//!   routine requests skip review.
//! - [`ApprovalManager`] ties them together: create, try the rules (unless the
//!   request falls under the always-review floor), otherwise hand the caller a
//!   [`DecisionWaiter`] bounded by the request's deadline.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_approval::prelude::*;
//!
//! # async fn example() -> Result<(), ApprovalError> {
//! let manager = ApprovalManager::builder().build();
//!
//! let params = ApprovalParams::new(ApprovalCategory::ShellCommand, "cargo publish")
//!     .with_risk_level(warden_core::RiskLevel::High)
//!     .with_session("session-1");
//!
//! match manager.request_approval(params)? {
//!     ApprovalOutcome::AutoApproved { request, .. } => println!("approved {}", request.id),
//!     ApprovalOutcome::Pending { waiter, .. } => {
//!         let resolved = waiter.wait().await?;
//!         println!("{} is {}", resolved.id, resolved.status);
//!     },
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod audit;
mod error;
mod manager;
mod queue;
mod request;
mod rules;
mod snapshot;
mod stats;
mod waiter;

pub use audit::{ApprovalAuditEntry, AuditAction, AuditPage, AuditQuery};
pub use error::{ApprovalError, ApprovalResult};
pub use manager::{
    ApprovalManager, ApprovalManagerBuilder, ApprovalOutcome, ApproveOptions, DenyOptions,
    ManagerConfig, SweeperHandle,
};
pub use queue::{ApprovalQueue, QueueConfig, QueueSnapshot, Resolution, SweepReport};
pub use request::{
    ApprovalCategory, ApprovalDecision, ApprovalParams, ApprovalRequest, ApprovalStatus,
    DecisionStatus, RememberScope, RequestId,
};
pub use rules::{AutoApproveRule, AutoApproveRuleEngine, RuleUpdate};
pub use snapshot::{
    JsonFileSnapshotStore, MemorySnapshotStore, PersistedState, SNAPSHOT_VERSION, SnapshotStore,
};
pub use stats::{QueueStats, StatusCounts};
pub use waiter::DecisionWaiter;
