//! Warden Sandbox - the isolation stage of the trust boundary.
//!
//! Whatever the policy engine and the approval workflow let through still runs
//! inside a throwaway container with hard ceilings:
//!
//! - memory capped with no swap, CPU capped, process count capped
//! - read-only root filesystem; only the workspace and a per-run scratch
//!   directory are writable
//! - every capability dropped, `no-new-privileges`, a seccomp deny-list
//! - no network unless an egress allowlist is configured
//! - a non-root user and private IPC
//!
//! These hold regardless of how the execution was authorized.
//!
//! [`SandboxExecutor`] talks to the container engine through the
//! [`ContainerRuntime`] trait. [`DockerCliRuntime`] implements it on top of the
//! `docker` client.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use warden_sandbox::prelude::*;
//!
//! # async fn example() -> SandboxResult<()> {
//! let executor = SandboxExecutor::with_docker(SandboxConfig::new("/home/user/project"))?;
//!
//! let request = SandboxExecutionRequest::new("cargo", ["test"])
//!     .with_timeout(Duration::from_secs(120));
//! let result = executor.execute(request).await?;
//! if result.timed_out {
//!     println!("timed out after {} ms", result.duration_ms);
//! } else {
//!     println!("exit {}: {}", result.exit_code, result.stdout);
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

pub mod frame;
pub mod prelude;
pub mod seccomp;

mod config;
mod docker;
mod error;
mod executor;
mod runtime;
mod spec;
mod types;

pub use config::{CONTAINER_WORKSPACE, DEFAULT_IMAGE, NetworkPolicy, SandboxConfig};
pub use docker::{DockerCliRuntime, parse_mem_usage};
pub use error::{SandboxError, SandboxResult};
pub use executor::SandboxExecutor;
pub use runtime::{ContainerRuntime, OutputStream};
pub use spec::{BindMount, ContainerSpec, HostConfig, MANAGED_LABEL, NETWORK_ALLOWLIST_LABEL};
pub use types::{
    ActiveContainer, SandboxExecutionRequest, SandboxExecutionResult, TIMEOUT_EXIT_CODE,
};
