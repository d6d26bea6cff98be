//! Convenience re-exports for crates built on Warden Core.
//!
//! ```rust
//! use warden_core::prelude::*;
//!
//! assert!(RiskLevel::Low < RiskLevel::Critical);
//! ```

pub use crate::{Clock, ManualClock, RiskLevel, SharedClock, SystemClock, system_clock};
