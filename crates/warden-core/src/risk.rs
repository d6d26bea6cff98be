//! Risk classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of an operation, used to gate auto-approval and to tell a
/// reviewer what is at stake.
///
/// The ordering is total: `Low < Medium < High < Critical`. Policy tables
/// written with the `safe`/`moderate`/`dangerous` vocabulary deserialize into
/// the same variants, so there is exactly one scale to compare against.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only or otherwise harmless.
    #[default]
    #[serde(alias = "safe")]
    Low,
    /// Known operation used in an unrecognized way.
    #[serde(alias = "moderate")]
    Medium,
    /// Mutating or destructive.
    #[serde(alias = "dangerous")]
    High,
    /// Privilege escalation or system control.
    Critical,
}

impl RiskLevel {
    /// All levels in ascending order.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Name on the `low`..`critical` scale.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Name on the policy-table scale (`safe`, `moderate`, `dangerous`, `critical`).
    #[must_use]
    pub fn policy_label(self) -> &'static str {
        match self {
            Self::Low => "safe",
            Self::Medium => "moderate",
            Self::High => "dangerous",
            Self::Critical => "critical",
        }
    }

    /// Whether operations at this level are destructive enough to be
    /// classed as dangerous commands.
    #[must_use]
    pub fn is_dangerous(self) -> bool {
        self >= Self::High
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not a known risk level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown risk level '{0}'")]
pub struct ParseRiskLevelError(pub String);

impl FromStr for RiskLevel {
    type Err = ParseRiskLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "safe" => Ok(Self::Low),
            "medium" | "moderate" => Ok(Self::Medium),
            "high" | "dangerous" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ParseRiskLevelError(s.to_owned())),
        }
    }
}
