//! Structural schema validation.

use std::sync::OnceLock;

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;

use crate::resource::ResourceTypeRegistry;

/// Validates the structure of a raw resource before it is merged.
pub trait SchemaValidator: Send + Sync {
    /// Returns the list of diagnostics when `document` is not a valid
    /// `resource_type`.
    fn validate(&self, resource_type: &str, document: &Value) -> Result<(), Vec<String>>;
}

/// Ids may be longer internally; only the first 64 characters are validated.
const MAX_VALIDATED_ID_LEN: usize = 64;

const ID_REGEX: &str = r"^[A-Za-z0-9\-.]{1,64}$";

static ID_PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn id_pattern() -> Result<&'static Regex, String> {
    ID_PATTERN
        .get_or_init(|| Regex::new(ID_REGEX))
        .as_ref()
        .map_err(|e| format!("id pattern failed to compile: {e}"))
}

/// Checks the envelope fields the write path depends on.
///
/// Body fields are not inspected; full profile validation belongs to an
/// external validator plugged in through [`SchemaValidator`].
#[derive(Debug, Clone, Default)]
pub struct BasicSchemaValidator {
    registry: ResourceTypeRegistry,
}

impl BasicSchemaValidator {
    #[must_use]
    pub fn new(registry: ResourceTypeRegistry) -> Self {
        Self { registry }
    }

    fn check_id(document: &Value, diagnostics: &mut Vec<String>) {
        let Some(id) = document.get("id") else {
            diagnostics.push("id is required".to_string());
            return;
        };
        let Some(id) = id.as_str() else {
            diagnostics.push("id must be a string".to_string());
            return;
        };
        let truncated: String = id.chars().take(MAX_VALIDATED_ID_LEN).collect();
        match id_pattern() {
            Ok(pattern) if pattern.is_match(&truncated) => {}
            Ok(_) => diagnostics.push(format!("id '{id}' does not match {ID_REGEX}")),
            Err(e) => diagnostics.push(e),
        }
    }

    fn check_meta(document: &Value, diagnostics: &mut Vec<String>) {
        let Some(meta) = document.get("meta") else {
            return;
        };
        let Some(meta) = meta.as_object() else {
            diagnostics.push("meta must be an object".to_string());
            return;
        };
        if meta.get("versionId").is_some_and(|v| !v.is_string()) {
            diagnostics.push("meta.versionId must be a string".to_string());
        }
        if let Some(last_updated) = meta.get("lastUpdated") {
            let valid = last_updated
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok());
            if !valid {
                diagnostics.push("meta.lastUpdated must be an RFC 3339 instant".to_string());
            }
        }
        if meta.get("source").is_some_and(|v| !v.is_string()) {
            diagnostics.push("meta.source must be a string".to_string());
        }
        if let Some(security) = meta.get("security") {
            let Some(tags) = security.as_array() else {
                diagnostics.push("meta.security must be an array".to_string());
                return;
            };
            for (i, tag) in tags.iter().enumerate() {
                let well_formed = tag.get("system").is_some_and(Value::is_string)
                    && tag.get("code").is_some_and(Value::is_string);
                if !well_formed {
                    diagnostics.push(format!(
                        "meta.security[{i}] must have string system and code"
                    ));
                }
            }
        }
    }
}

impl SchemaValidator for BasicSchemaValidator {
    fn validate(&self, resource_type: &str, document: &Value) -> Result<(), Vec<String>> {
        let mut diagnostics = Vec::new();

        if !document.is_object() {
            return Err(vec!["resource must be a JSON object".to_string()]);
        }
        match document.get("resourceType").and_then(Value::as_str) {
            Some(t) if t == resource_type => {}
            Some(t) => diagnostics.push(format!(
                "resourceType '{t}' does not match expected '{resource_type}'"
            )),
            None => diagnostics.push("resourceType is required".to_string()),
        }
        if !self.registry.contains(resource_type) {
            diagnostics.push(format!("resource type '{resource_type}' is not supported"));
        }
        Self::check_id(document, &mut diagnostics);
        Self::check_meta(document, &mut diagnostics);

        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(diagnostics)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> BasicSchemaValidator {
        BasicSchemaValidator::new(ResourceTypeRegistry::r4())
    }

    #[test]
    fn test_valid_resource() {
        let doc = json!({
            "resourceType": "Patient",
            "id": "p-1.a",
            "meta": {
                "versionId": "1",
                "lastUpdated": "2024-01-02T03:04:05Z",
                "security": [{"system": "https://www.icanbwell.com/owner", "code": "orgA"}]
            }
        });
        assert!(validator().validate("Patient", &doc).is_ok());
    }

    #[test]
    fn test_long_ids_are_validated_on_their_prefix() {
        let doc = json!({"resourceType": "Patient", "id": "a".repeat(100)});
        assert!(validator().validate("Patient", &doc).is_ok());
    }

    #[test]
    fn test_invalid_id() {
        let doc = json!({"resourceType": "Patient", "id": "has space"});
        let diagnostics = validator().validate("Patient", &doc).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("has space"));
    }

    #[test]
    fn test_meta_shape() {
        let doc = json!({
            "resourceType": "Patient",
            "id": "p1",
            "meta": {"versionId": 1, "lastUpdated": "yesterday", "security": [{"system": "s"}]}
        });
        let diagnostics = validator().validate("Patient", &doc).unwrap_err();
        assert_eq!(diagnostics.len(), 3);
    }

    #[test]
    fn test_type_mismatch_and_unknown_type() {
        let doc = json!({"resourceType": "Widget", "id": "w1"});
        let diagnostics = validator().validate("Widget", &doc).unwrap_err();
        assert!(diagnostics.iter().any(|d| d.contains("not supported")));

        let doc = json!({"resourceType": "Patient", "id": "p1"});
        assert!(validator().validate("Observation", &doc).is_err());
    }
}
