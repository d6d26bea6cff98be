//! Warden Core - shared types for the Warden trust boundary.
//!
//! This crate provides the vocabulary every other Warden crate speaks:
//! - [`RiskLevel`], the single total ordering used for every threshold comparison
//! - [`Clock`], the wall-clock collaborator, with a controllable [`ManualClock`] for tests

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod clock;
mod risk;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use risk::{ParseRiskLevelError, RiskLevel};
