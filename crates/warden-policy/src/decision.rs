//! Policy decisions.

use serde::{Deserialize, Serialize};
use warden_core::RiskLevel;

/// Outcome of a policy check.
///
/// Three shapes occur in practice:
/// - allowed: `allowed = true`, `requires_approval = false`
/// - escalated: `allowed = false`, `requires_approval = true`
/// - hard deny: `allowed = false`, `requires_approval = false`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistDecision {
    /// Whether the operation may proceed without further review.
    pub allowed: bool,
    /// Human-readable explanation.
    pub reason: String,
    /// Whether a human (or rule) may still authorize it.
    pub requires_approval: bool,
    /// Assessed risk.
    pub risk_level: RiskLevel,
}

impl AllowlistDecision {
    /// Allow without review.
    #[must_use]
    pub fn allow(reason: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            requires_approval: false,
            risk_level,
        }
    }

    /// Escalate for approval.
    #[must_use]
    pub fn escalate(reason: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            requires_approval: true,
            risk_level,
        }
    }

    /// Deny with no recourse.
    #[must_use]
    pub fn deny(reason: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            requires_approval: false,
            risk_level,
        }
    }

    /// Denied and not eligible for approval.
    #[must_use]
    pub fn is_hard_deny(&self) -> bool {
        !self.allowed && !self.requires_approval
    }
}
