//! Warden Gate - the pipeline every agent action passes through.
//!
//! ```text
//! command ──► PolicyEngine ──allowed──────────────────────────► SandboxExecutor
//!                  │                                                   ▲
//!                  ├──hard deny──► GateOutcome::Denied                 │
//!                  │                                                   │
//!                  └──escalate──► ApprovalManager ──rule / human yes───┘
//!                                        │
//!                                        └──no / expired──► GateOutcome::Rejected
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden_approval::ApprovalManager;
//! use warden_gate::{Gate, GateContext, GateOutcome};
//! use warden_policy::PolicyEngine;
//! use warden_sandbox::{SandboxConfig, SandboxExecutor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = Gate::new(
//!     Arc::new(PolicyEngine::with_defaults("/home/user/project")?),
//!     Arc::new(ApprovalManager::builder().build()),
//!     Arc::new(SandboxExecutor::with_docker(SandboxConfig::new("/home/user/project"))?),
//! );
//!
//! let ctx = GateContext::new("session-1").with_purpose("run the test suite");
//! if let GateOutcome::Executed { result, .. } = gate.run_command(&ctx, "cargo", &["test"]).await? {
//!     println!("exit {}", result.exit_code);
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

mod context;
mod error;
mod gate;

pub use context::GateContext;
pub use error::{GateError, GateResult};
pub use gate::{Authorization, Gate, GateOutcome, Verdict};
