//! Request context for correlating log lines.
//!
//! One context covers one gated operation. Its span carries the session and
//! operation, so every event logged by the policy, approval and sandbox
//! stages while the guard is alive can be traced back to the caller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation data for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Unique id of this operation.
    pub request_id: Uuid,
    /// Shared by an operation and its children.
    pub correlation_id: Uuid,
    /// Parent operation, for sub-operations.
    pub parent_id: Option<Uuid>,
    /// Agent session.
    pub session_id: Option<String>,
    /// Acting user.
    pub user_id: Option<String>,
    /// When the operation started.
    pub started_at: DateTime<Utc>,
    /// Component that created the context.
    pub source: String,
    /// Operation name.
    pub operation: Option<String>,
    /// Free-form fields.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RequestContext {
    /// Fresh context owned by `source`.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            request_id: id,
            correlation_id: id,
            parent_id: None,
            session_id: None,
            user_id: None,
            started_at: Utc::now(),
            source: source.into(),
            operation: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Child context sharing this one's correlation, session and user.
    #[must_use]
    pub fn child(&self, source: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            parent_id: Some(self.request_id),
            started_at: Utc::now(),
            source: source.into(),
            operation: None,
            ..self.clone()
        }
    }

    /// Set the session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Add a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Milliseconds since the context was created. Zero if the clock went
    /// backwards.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0)
    }

    /// First eight hex digits of the request id.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.request_id.simple().to_string().chars().take(8).collect()
    }

    /// A span carrying this context's fields.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = %self.short_id(),
            correlation_id = %self.correlation_id,
            session_id = self.session_id.as_deref(),
            user_id = self.user_id.as_deref(),
            source = %self.source,
            operation = self.operation.as_deref(),
        )
    }

    /// Enter the span until the returned guard drops.
    #[must_use]
    pub fn enter(self) -> RequestGuard {
        RequestGuard::new(self)
    }
}

/// Keeps a request span entered and logs the duration on drop.
pub struct RequestGuard {
    context: RequestContext,
    _span: tracing::span::EnteredSpan,
}

impl RequestGuard {
    /// Enter `context`'s span.
    #[must_use]
    pub fn new(context: RequestContext) -> Self {
        let span = context.span().entered();
        tracing::debug!("Request started");
        Self {
            context,
            _span: span,
        }
    }

    /// The entered context.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        tracing::debug!(elapsed_ms = self.context.elapsed_ms(), "Request completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context() {
        let ctx = RequestContext::new("gate");
        assert_eq!(ctx.request_id, ctx.correlation_id);
        assert!(ctx.parent_id.is_none());
        assert!(ctx.session_id.is_none());
    }

    #[test]
    fn test_child_inherits_correlation() {
        let parent = RequestContext::new("cli")
            .with_session("s-1")
            .with_user("alice")
            .with_operation("exec")
            .with_metadata("command", "ls");
        let child = parent.child("sandbox");

        assert_ne!(child.request_id, parent.request_id);
        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.parent_id, Some(parent.request_id));
        assert_eq!(child.session_id.as_deref(), Some("s-1"));
        assert_eq!(child.user_id.as_deref(), Some("alice"));
        assert_eq!(child.metadata["command"], "ls");
        assert!(child.operation.is_none());
    }

    #[test]
    fn test_short_id() {
        let ctx = RequestContext::new("cli");
        let short = ctx.short_id();
        assert_eq!(short.len(), 8);
        assert!(ctx.request_id.simple().to_string().starts_with(&short));
    }

    #[test]
    fn test_elapsed_is_non_negative() {
        let mut ctx = RequestContext::new("cli");
        ctx.started_at = Utc::now()
            .checked_add_signed(chrono::Duration::seconds(60))
            .unwrap();
        assert_eq!(ctx.elapsed_ms(), 0);
    }

    #[test]
    fn test_guard_exposes_context() {
        let guard = RequestContext::new("cli").with_operation("check").enter();
        assert_eq!(guard.context().operation.as_deref(), Some("check"));
    }

    #[test]
    fn test_serialization() {
        let ctx = RequestContext::new("cli").with_session("s-2");
        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: RequestContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx);
    }
}
