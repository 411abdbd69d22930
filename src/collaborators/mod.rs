//! Collaborators consumed by the merge engine.
//!
//! Structural schema validation, scope checks and audit recording are owned
//! by the surrounding service; the engine only depends on these traits. Each
//! trait comes with a default implementation suitable for embedding and tests.

mod audit;
mod schema;
mod scopes;

pub use audit::{AuditError, AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink};
pub use schema::{BasicSchemaValidator, SchemaValidator};
pub use scopes::{ScopeChecker, SmartScopeChecker};

/// Identity and permissions of the caller of one merge request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    /// Authenticated user or client id.
    pub user: String,
    /// Granted scopes, e.g. `user/*.write access/orgA.*`.
    pub scopes: Vec<String>,
    /// Request id used to correlate log lines and audit events.
    pub request_id: Option<String>,
}

impl CallerContext {
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    /// Parses a space separated scope string.
    #[must_use]
    pub fn with_scope_string(mut self, scope: &str) -> Self {
        self.scopes = scope.split_whitespace().map(str::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_string_parsing() {
        let caller = CallerContext::new("u1").with_scope_string("user/*.write  access/orgA.*");
        assert_eq!(caller.user, "u1");
        assert_eq!(caller.scopes, vec!["user/*.write".to_string(), "access/orgA.*".to_string()]);
        assert!(CallerContext::new("u").with_scope_string("").scopes.is_empty());
    }
}
