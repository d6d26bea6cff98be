//! Logging setup and request correlation for Warden.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_telemetry::{LogConfig, LogFormat, RequestContext, setup_logging};
//!
//! # fn main() -> Result<(), warden_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("warden_sandbox=debug");
//! setup_logging(&config)?;
//!
//! let ctx = RequestContext::new("cli")
//!     .with_session("session-1")
//!     .with_operation("exec");
//! let _guard = ctx.enter();
//! tracing::info!("Running gated command");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::{RequestContext, RequestGuard};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_logging};
