//! Convenience re-exports.

pub use crate::{
    AllowlistConfig, AllowlistDecision, CommandDefinition, DirectoryPermission, PathOperation,
    PolicyEngine, PolicyError, PolicyResult,
};
