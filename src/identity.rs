//! Cross-source identity resolution.
//!
//! Independent upstream sources submit the same real-world entity under their
//! own local ids. A global id is derived deterministically from the local id and
//! the source assigning authority, so every submission of the same
//! `(id, authority)` pair lands on the same identity without a lookup table.
//!
//! # Examples
//!
//! ```
//! use clinmerge::identity::{create_reference, derive_global_id, parse_reference};
//!
//! let a = derive_global_id("p1", "orgA");
//! assert_eq!(a, derive_global_id("p1", "orgA"));
//! assert_ne!(a, derive_global_id("p1", "orgB"));
//!
//! let parts = parse_reference("Patient/p1|orgA").unwrap();
//! assert_eq!(parts.resource_type.as_deref(), Some("Patient"));
//! assert_eq!(create_reference(&parts), "Patient/p1|orgA");
//! ```

use uuid::Uuid;

use crate::error::ValidationError;

/// Namespace for version-5 global ids.
pub const GLOBAL_ID_NAMESPACE: Uuid = Uuid::NAMESPACE_OID;

/// Returns true if `value` is a hyphenated UUID (already globally unique).
#[must_use]
pub fn is_uuid(value: &str) -> bool {
    value.len() == 36 && Uuid::parse_str(value).is_ok()
}

/// Derives the global id of `local_id` issued by `authority`.
///
/// Version-5 UUID over `"{local_id}|{authority}"`; stable across processes.
#[must_use]
pub fn derive_global_id(local_id: &str, authority: &str) -> Uuid {
    Uuid::new_v5(
        &GLOBAL_ID_NAMESPACE,
        format!("{local_id}|{authority}").as_bytes(),
    )
}

/// Resolves the global id for a local id.
///
/// UUID ids are used as-is; anything else is derived from the authority.
/// Returns `None` when the id is not a UUID and no authority is available.
#[must_use]
pub fn resolve_global_id(local_id: &str, authority: Option<&str>) -> Option<Uuid> {
    if is_uuid(local_id) {
        return Uuid::parse_str(local_id).ok();
    }
    authority.map(|a| derive_global_id(local_id, a))
}

/// Components of a reference string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceParts {
    pub resource_type: Option<String>,
    pub id: String,
    pub authority: Option<String>,
}

impl ReferenceParts {
    #[must_use]
    pub fn new(resource_type: Option<&str>, id: &str, authority: Option<&str>) -> Self {
        Self {
            resource_type: resource_type.map(str::to_string),
            id: id.to_string(),
            authority: authority.map(str::to_string),
        }
    }
}

/// Parses `id`, `id|authority`, `Type/id` or `Type/id|authority`.
pub fn parse_reference(value: &str) -> Result<ReferenceParts, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidReference {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let (resource_type, rest) = match value.split_once('/') {
        Some((t, rest)) => {
            if t.is_empty() {
                return Err(invalid("resource type is empty"));
            }
            (Some(t), rest)
        }
        None => (None, value),
    };

    let (id, authority) = match rest.split_once('|') {
        Some((id, authority)) => {
            if authority.is_empty() {
                return Err(invalid("authority is empty"));
            }
            (id, Some(authority))
        }
        None => (rest, None),
    };

    if id.is_empty() {
        return Err(invalid("id is empty"));
    }
    if id.contains('/') {
        return Err(invalid("id contains '/'"));
    }

    Ok(ReferenceParts::new(resource_type, id, authority))
}

/// Inverse of [`parse_reference`].
///
/// The `|authority` qualifier is only written for non-UUID ids.
#[must_use]
pub fn create_reference(parts: &ReferenceParts) -> String {
    let mut out = String::new();
    if let Some(t) = &parts.resource_type {
        out.push_str(t);
        out.push('/');
    }
    out.push_str(&parts.id);
    if let Some(authority) = &parts.authority {
        if !is_uuid(&parts.id) {
            out.push('|');
            out.push_str(authority);
        }
    }
    out
}
