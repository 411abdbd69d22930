//! Scope-based authorization.
//!
//! Resource scopes follow the SMART-on-FHIR shape `{user|patient|system}/{Type|*}.{action|*}`.
//! Data access is granted through `access/{code}.{action|*}` scopes that are
//! matched against a resource's access security tags; the `*` code grants
//! access to everything.

use crate::collaborators::CallerContext;
use crate::error::{MergeError, MergeResult};
use crate::tags::TagModel;

/// Decides what a caller may do.
pub trait ScopeChecker: Send + Sync {
    /// Checks that the caller may write `resource_type`. Returns the denial
    /// message on failure.
    fn check_write(&self, resource_type: &str, caller: &CallerContext) -> Result<(), String>;

    /// True if the caller may read a resource carrying `tags`.
    ///
    /// # Errors
    /// `Forbidden` when the caller holds no access scopes at all.
    fn has_read_access(&self, tags: &TagModel, caller: &CallerContext) -> MergeResult<bool>;
}

const RESOURCE_SCOPE_PREFIXES: &[&str] = &["user/", "patient/", "system/"];

/// SMART-style scope checker.
#[derive(Debug, Clone, Copy)]
pub struct SmartScopeChecker {
    auth_enabled: bool,
}

impl Default for SmartScopeChecker {
    fn default() -> Self {
        Self { auth_enabled: true }
    }
}

impl SmartScopeChecker {
    #[must_use]
    pub const fn new(auth_enabled: bool) -> Self {
        Self { auth_enabled }
    }

    /// Access codes granted for `action`.
    #[must_use]
    pub fn access_codes(caller: &CallerContext, action: &str) -> Vec<String> {
        caller
            .scopes
            .iter()
            .filter_map(|scope| scope.strip_prefix("access/"))
            .filter_map(|inner| inner.split_once('.'))
            .filter(|(_, granted)| *granted == "*" || *granted == action)
            .map(|(code, _)| code.to_string())
            .collect()
    }

    fn grants_resource_action(scope: &str, resource_type: &str, action: &str) -> bool {
        let Some(inner) = RESOURCE_SCOPE_PREFIXES
            .iter()
            .find_map(|prefix| scope.strip_prefix(prefix))
        else {
            return false;
        };
        let Some((scope_type, granted)) = inner.split_once('.') else {
            return false;
        };
        (scope_type == "*" || scope_type == resource_type) && (granted == "*" || granted == action)
    }
}

impl ScopeChecker for SmartScopeChecker {
    fn check_write(&self, resource_type: &str, caller: &CallerContext) -> Result<(), String> {
        if !self.auth_enabled {
            return Ok(());
        }
        if caller
            .scopes
            .iter()
            .any(|scope| Self::grants_resource_action(scope, resource_type, "write"))
        {
            return Ok(());
        }
        Err(format!(
            "user {} with scopes [{}] failed access check to [{resource_type}.write]",
            caller.user,
            caller.scopes.join(" ")
        ))
    }

    fn has_read_access(&self, tags: &TagModel, caller: &CallerContext) -> MergeResult<bool> {
        if !self.auth_enabled {
            return Ok(true);
        }
        let codes = Self::access_codes(caller, "read");
        if codes.is_empty() {
            return Err(MergeError::forbidden(format!(
                "user {} with scopes [{}] has no access scopes",
                caller.user,
                caller.scopes.join(" ")
            )));
        }
        if codes.iter().any(|c| c == "*") {
            return Ok(true);
        }
        Ok(codes.iter().any(|code| tags.access.contains(code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::SecurityTag;

    fn caller(scopes: &str) -> CallerContext {
        CallerContext::new("u1").with_scope_string(scopes)
    }

    #[test]
    fn test_write_scopes() {
        let checker = SmartScopeChecker::default();
        assert!(checker.check_write("Patient", &caller("user/*.write")).is_ok());
        assert!(checker.check_write("Patient", &caller("user/Patient.*")).is_ok());
        assert!(checker.check_write("Patient", &caller("system/Patient.write")).is_ok());
        let err = checker
            .check_write("Patient", &caller("user/Observation.write user/*.read"))
            .unwrap_err();
        assert!(err.contains("Patient.write"));
        assert!(err.contains("u1"));
    }

    #[test]
    fn test_access_codes() {
        let codes = SmartScopeChecker::access_codes(
            &caller("access/orgA.* access/orgB.read access/orgC.write user/*.*"),
            "read",
        );
        assert_eq!(codes, vec!["orgA".to_string(), "orgB".to_string()]);
    }

    #[test]
    fn test_read_access_matches_access_tags() {
        let checker = SmartScopeChecker::default();
        let tags = TagModel::from_tags(&[SecurityTag::access("orgA")]);
        assert!(checker.has_read_access(&tags, &caller("access/orgA.*")).unwrap());
        assert!(!checker.has_read_access(&tags, &caller("access/orgB.*")).unwrap());
        assert!(checker.has_read_access(&tags, &caller("access/*.*")).unwrap());
    }

    #[test]
    fn test_no_access_scopes_is_forbidden() {
        let checker = SmartScopeChecker::default();
        let err = checker
            .has_read_access(&TagModel::default(), &caller("user/*.*"))
            .unwrap_err();
        assert!(err.is_forbidden());
    }

    #[test]
    fn test_auth_disabled_allows_everything() {
        let checker = SmartScopeChecker::new(false);
        assert!(checker.check_write("Patient", &caller("")).is_ok());
        assert!(checker.has_read_access(&TagModel::default(), &caller("")).unwrap());
    }
}
