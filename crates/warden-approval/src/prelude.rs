//! Convenience re-exports for approval consumers.

pub use crate::{
    ApprovalCategory, ApprovalDecision, ApprovalError, ApprovalManager, ApprovalOutcome,
    ApprovalParams, ApprovalQueue, ApprovalRequest, ApprovalResult, ApprovalStatus,
    ApproveOptions, AutoApproveRule, AutoApproveRuleEngine, DecisionWaiter, DenyOptions,
    RememberScope, RequestId,
};
