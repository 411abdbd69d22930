//! Checks run on each submitted resource before any lookup.

use serde_json::Value;

use crate::collaborators::CallerContext;
use crate::engine::MergeEngine;
use crate::error::{MergeError, MergeResult, ValidationError};
use crate::identity::is_uuid;
use crate::resource::Resource;
use crate::tags::{SecurityTag, TagModel};

/// Reads security tags from a raw document, skipping malformed entries.
fn raw_tags(document: &Value) -> Vec<SecurityTag> {
    document
        .pointer("/meta/security")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|t| {
                    let system = t.get("system")?.as_str()?;
                    let code = t.get("code")?.as_str()?;
                    Some(SecurityTag::new(system, code))
                })
                .collect()
        })
        .unwrap_or_default()
}

impl MergeEngine {
    /// Validates one submitted document and parses it.
    ///
    /// Order: resourceType, id, registered type, owner/authority tags for
    /// non-UUID ids, write scope, schema, access tags when required.
    pub(crate) fn precheck(&self, document: &Value, caller: &CallerContext) -> MergeResult<Resource> {
        if !document.is_object() {
            return Err(ValidationError::MalformedResource {
                reason: "resource must be a JSON object".to_string(),
            }
            .into());
        }
        let resource_type = document
            .get("resourceType")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or(ValidationError::MissingResourceType)?;
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::MissingId)?;
        self.types.resolve(resource_type)?;

        let tags = TagModel::from_tags(&raw_tags(document));
        if !is_uuid(id) && !tags.has_owner_or_authority() {
            return Err(ValidationError::MissingOwnerOrAuthority.into());
        }

        self.scopes
            .check_write(resource_type, caller)
            .map_err(MergeError::forbidden)?;

        self.validator
            .validate(resource_type, document)
            .map_err(|diagnostics| ValidationError::Schema { diagnostics })?;

        let resource = Resource::from_value(document.clone())?;

        if self.config.require_access_tags && !tags.has_access_tags() {
            return Err(ValidationError::MissingAccessTag.into());
        }
        Ok(resource)
    }
}
