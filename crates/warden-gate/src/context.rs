//! Caller context carried through the pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Who is asking, and why.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateContext {
    /// Agent session the operation belongs to.
    pub session_id: String,
    /// User on whose behalf the agent acts.
    pub user_id: Option<String>,
    /// Agent-supplied explanation shown to the approver.
    pub purpose: Option<String>,
    /// Working directory inside the sandbox.
    pub working_dir: Option<String>,
    /// Extra environment for the sandboxed command.
    pub env: BTreeMap<String, String>,
    /// Execution timeout.
    pub timeout: Option<Duration>,
}

impl GateContext {
    /// Context for `session_id`.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Set the acting user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Explain the operation to the approver.
    #[must_use]
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Run in `dir`.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Bound the execution.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
