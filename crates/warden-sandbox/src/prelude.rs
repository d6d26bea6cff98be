//! Convenience re-exports for sandbox consumers.

pub use crate::{
    ContainerRuntime, NetworkPolicy, SandboxConfig, SandboxError, SandboxExecutionRequest,
    SandboxExecutionResult, SandboxExecutor, SandboxResult,
};
