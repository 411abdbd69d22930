//! Typed references with global identity side-data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::identity::{is_uuid, parse_reference, resolve_global_id};

/// Global identity attached to a reference on save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalIdentity {
    /// `Type/localId` as submitted (without the authority qualifier).
    pub source_id: String,
    /// `Type/<global uuid>`.
    pub global_uuid: String,
    /// Authority the global id was derived from.
    pub authority_code: String,
}

/// A reference to another resource.
///
/// `reference` is the human-readable local value and is never rewritten;
/// identity resolution only fills `global_identity`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_identity: Option<GlobalIdentity>,

    /// Other reference members (type, identifier, extension, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Reference {
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Self::default()
        }
    }

    /// Computes the global identity of the referenced entity.
    ///
    /// Authority precedence: an inline `|authority` suffix, then the authority
    /// recorded by an earlier resolution, then `default_authority` (the owning
    /// resource's primary authority). Returns `Ok(None)` when the reference has
    /// no value or no authority is available for a non-UUID id.
    pub fn resolve_identity(
        &self,
        default_authority: Option<&str>,
    ) -> Result<Option<GlobalIdentity>, ValidationError> {
        let Some(value) = self.reference.as_deref() else {
            return Ok(None);
        };
        let parts = parse_reference(value)?;
        let recorded = self
            .global_identity
            .as_ref()
            .map(|g| g.authority_code.as_str())
            .filter(|code| !code.is_empty());
        let authority = parts
            .authority
            .as_deref()
            .or(recorded)
            .or(default_authority);

        let Some(uuid) = resolve_global_id(&parts.id, authority) else {
            return Ok(None);
        };
        let prefix = parts
            .resource_type
            .as_deref()
            .map(|t| format!("{t}/"))
            .unwrap_or_default();

        let authority_code = match authority {
            Some(a) => a.to_string(),
            // UUID ids need no authority; keep the side-data shape uniform.
            None if is_uuid(&parts.id) => String::new(),
            None => return Ok(None),
        };

        Ok(Some(GlobalIdentity {
            source_id: format!("{prefix}{}", parts.id),
            global_uuid: format!("{prefix}{uuid}"),
            authority_code,
        }))
    }
}
