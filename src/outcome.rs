//! Per-resource merge results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MergeError;
use crate::resource::Resource;
use crate::tags::TagModel;

/// Free-text details of an issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDetails {
    pub text: String,
}

/// One issue of an operation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcomeIssue {
    pub severity: String,
    pub code: String,
    pub details: IssueDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression: Vec<String>,
}

impl OperationOutcomeIssue {
    /// Error issue for a resource that could not be merged.
    ///
    /// `details.text` echoes the submitted payload for support triage.
    #[must_use]
    pub fn from_error(error: &MergeError, expression: String, payload: &Value) -> Self {
        Self {
            severity: "error".to_string(),
            code: error.issue_code().to_string(),
            details: IssueDetails {
                text: format!("Error merging: {payload}"),
            },
            diagnostics: Some(error.to_string()),
            expression: vec![expression],
        }
    }
}

/// Outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    pub issue: Vec<OperationOutcomeIssue>,
}

impl OperationOutcome {
    #[must_use]
    pub fn new(issue: Vec<OperationOutcomeIssue>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue,
        }
    }
}

/// Result of merging one submitted resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResultEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_assigning_authority: Option<String>,
    pub resource_type: String,
    pub created: bool,
    pub updated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<OperationOutcomeIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_outcome: Option<OperationOutcome>,
}

impl MergeResultEntry {
    fn from_resource(resource: &Resource, created: bool, updated: bool) -> Self {
        Self {
            id: resource.id.clone(),
            uuid: resource.uuid.map(|u| u.to_string()),
            source_assigning_authority: TagModel::from_resource(resource)
                .primary_authority()
                .map(str::to_string),
            resource_type: resource.resource_type.clone(),
            created,
            updated,
            resource_version: resource.meta.version_id.clone(),
            issue: None,
            operation_outcome: None,
        }
    }

    /// A new resource was inserted.
    #[must_use]
    pub fn created(resource: &Resource) -> Self {
        Self::from_resource(resource, true, false)
    }

    /// An existing resource was patched.
    #[must_use]
    pub fn updated(resource: &Resource) -> Self {
        Self::from_resource(resource, false, true)
    }

    /// The submission matched the stored resource; nothing was written.
    #[must_use]
    pub fn unchanged(stored: &Resource) -> Self {
        Self::from_resource(stored, false, false)
    }

    /// The resource was rejected or its merge failed.
    #[must_use]
    pub fn failure(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        error: &MergeError,
        payload: &Value,
    ) -> Self {
        let resource_type = resource_type.into();
        let id = id.into();
        let issue = OperationOutcomeIssue::from_error(error, format!("{resource_type}/{id}"), payload);
        Self {
            id,
            uuid: None,
            source_assigning_authority: None,
            resource_type,
            created: false,
            updated: false,
            resource_version: None,
            operation_outcome: Some(OperationOutcome::new(vec![issue.clone()])),
            issue: Some(issue),
        }
    }

    /// True if this entry reports a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.issue.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::tags::SecurityTag;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_success_entry_wire_format() {
        let mut resource = Resource::new("Patient", "p1").with_tag(SecurityTag::owner("orgA"));
        resource.uuid = Some(Uuid::nil());
        resource.meta.version_id = Some("1".to_string());

        let value = serde_json::to_value(MergeResultEntry::created(&resource)).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "p1",
                "uuid": Uuid::nil().to_string(),
                "sourceAssigningAuthority": "orgA",
                "resourceType": "Patient",
                "created": true,
                "updated": false,
                "resourceVersion": "1"
            })
        );
    }

    #[test]
    fn test_failure_entry_echoes_payload() {
        let payload = json!({"resourceType": "Patient", "id": "p1"});
        let err: MergeError = ValidationError::MissingAccessTag.into();
        let entry = MergeResultEntry::failure("Patient", "p1", &err, &payload);

        assert!(entry.is_failure());
        assert!(!entry.created && !entry.updated);
        let issue = entry.issue.as_ref().unwrap();
        assert_eq!(issue.severity, "error");
        assert_eq!(issue.code, "invalid");
        assert!(issue.details.text.starts_with("Error merging: "));
        assert!(issue.details.text.contains("\"id\":\"p1\""));
        assert_eq!(issue.expression, vec!["Patient/p1".to_string()]);
        assert_eq!(entry.operation_outcome.unwrap().issue.len(), 1);
    }
}
