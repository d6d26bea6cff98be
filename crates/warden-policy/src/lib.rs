//! Warden Policy - the deterministic first stage of the trust boundary.
//!
//! [`PolicyEngine`] maps a command invocation or a filesystem access to an
//! [`AllowlistDecision`]. Nothing is allowed unless a table says so:
//!
//! 1. Blocklisted executables (privilege escalation, service control, raw
//!    network listeners, code-evaluating built-ins) are denied outright.
//! 2. Shell metacharacter injection anywhere in the invocation is denied outright.
//! 3. Safe-table commands are allowed when their arguments fit the entry's
//!    patterns, and escalated for approval when they do not.
//! 4. Dangerous-table commands require approval unless the exact invocation
//!    was pre-approved.
//! 5. Everything else requires approval at [`RiskLevel::High`](warden_core::RiskLevel::High).
//!
//! # Example
//!
//! ```rust
//! use warden_policy::{AllowlistConfig, PolicyEngine};
//!
//! # fn main() -> Result<(), warden_policy::PolicyError> {
//! let engine = PolicyEngine::new(AllowlistConfig::new("/home/user/project"))?;
//!
//! let decision = engine.check_command("ls", &["./project"]);
//! assert!(decision.allowed);
//!
//! let decision = engine.check_command("rm", &["-rf", "/etc"]);
//! assert!(!decision.allowed && decision.requires_approval);
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

mod config;
mod decision;
mod engine;
mod error;
mod hash;
mod injection;
mod path;
mod tokenize;

pub use config::{
    AllowlistConfig, CommandDefinition, DefaultPolicy, DirectoryPermission, PathOperation,
};
pub use decision::AllowlistDecision;
pub use engine::{BLOCKLISTED_COMMANDS, PolicyEngine};
pub use error::{PolicyError, PolicyResult};
pub use hash::operation_hash;
pub use injection::detect_injection;
pub use tokenize::{TokenizeError, tokenize};
