//! Commonly used telemetry types.
//!
//! ```rust,no_run
//! use warden_telemetry::prelude::*;
//!
//! # fn main() -> TelemetryResult<()> {
//! setup_logging(&LogConfig::new("debug").with_format(LogFormat::Json))?;
//! # Ok(())
//! # }
//! ```

pub use crate::{LogConfig, LogFormat, LogTarget, setup_logging};
pub use crate::{RequestContext, RequestGuard};
pub use crate::{TelemetryError, TelemetryResult};
