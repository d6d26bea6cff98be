//! Warden Test - Shared test utilities for Warden crates.
//!
//! Add as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! warden-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden_test::{MockExecution, MockRuntime, test_sandbox_config};
//!
//! #[tokio::test]
//! async fn test_runs_in_sandbox() {
//!     let runtime = MockRuntime::new().with_default_execution(MockExecution::exit(0).stdout("ok"));
//!     let dir = tempfile::tempdir().unwrap();
//!     let executor = SandboxExecutor::new(test_sandbox_config(dir.path()), Arc::new(runtime.clone())).unwrap();
//!     let result = executor.exec("true", [] as [&str; 0]).await.unwrap();
//!     assert_eq!(result.stdout, "ok");
//!     assert!(runtime.live_containers().is_empty());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod logging;
pub mod mocks;

pub use fixtures::*;
pub use logging::init_test_logging;
pub use mocks::{MockCall, MockExecution, MockRuntime};
