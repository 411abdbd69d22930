//! Error types for the merge engine.
//!
//! All errors are strongly typed using thiserror. Precheck problems are
//! `ValidationError`s and are reported per resource as an outcome; the
//! remaining `MergeError` variants are raised while merging one resource and
//! converted to a failure entry by the batch coordinator.

use thiserror::Error;

use crate::config::ConfigError;
use crate::patch::PatchError;
use crate::storage::StorageError;

/// Validation errors found before any merge decision is taken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("resource is missing resourceType")]
    MissingResourceType,

    #[error("resource is missing id")]
    MissingId,

    #[error("resource type '{resource_type}' is not supported")]
    UnknownResourceType {
        resource_type: String,
    },

    #[error(
        "Either id passed in resource should be uuid or meta.security tag with system: \
         {owner} or {authority} should be present",
        owner = crate::tags::SecurityTagSystem::OWNER,
        authority = crate::tags::SecurityTagSystem::SOURCE_ASSIGNING_AUTHORITY
    )]
    MissingOwnerOrAuthority,

    #[error(
        "Resource is missing a security access tag with system: {system}",
        system = crate::tags::SecurityTagSystem::ACCESS
    )]
    MissingAccessTag,

    #[error("Unable to merge resource. Missing either metadata or metadata source.")]
    MissingMetaSource,

    #[error("schema validation failed: {}", .diagnostics.join("; "))]
    Schema {
        diagnostics: Vec<String>,
    },

    #[error("invalid reference '{value}': {reason}")]
    InvalidReference {
        value: String,
        reason: String,
    },

    #[error("malformed resource: {reason}")]
    MalformedResource {
        reason: String,
    },

    #[error("invalid base version '{value}'")]
    InvalidBaseVersion {
        value: String,
    },
}

/// A bulk write for one resource type failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bulk write to {collection} failed for {resource_type}{}: {message}", .index.map(|i| format!(" at operation {i}")).unwrap_or_default())]
pub struct PersistenceError {
    /// Resource type whose batch failed.
    pub resource_type: String,
    /// Collection the batch was written to.
    pub collection: String,
    /// Position of the failing operation inside the batch, when known.
    pub index: Option<usize>,
    /// Backend message.
    pub message: String,
}

/// Top-level error type for merge operations.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Forbidden: {message}")]
    Forbidden {
        message: String,
    },

    #[error("No sourceAssigningAuthority codes found for resource {resource_type}/{id}")]
    MissingAuthority {
        resource_type: String,
        id: String,
    },

    #[error(
        "Resource {resource_type}/{id} is stored under authority [{stored}] \
         and cannot be merged with a resource from authority [{incoming}]"
    )]
    AuthorityConflict {
        resource_type: String,
        id: String,
        stored: String,
        incoming: String,
    },

    /// A resource a collaborator depends on does not exist. The engine's own
    /// write path never raises it; custom pre-save handlers and scope
    /// checkers do.
    #[error("Resource not found: {resource_type}/{id}")]
    NotFound {
        resource_type: String,
        id: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MergeError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an access-control failure.
    #[must_use]
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Returns true if this error came from the storage layer.
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Storage(_))
    }

    /// Outcome issue code used when this error is reported for one resource.
    #[must_use]
    pub const fn issue_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid",
            Self::Forbidden { .. } => "forbidden",
            Self::NotFound { .. } => "not-found",
            Self::AuthorityConflict { .. } => "conflict",
            Self::MissingAuthority { .. }
            | Self::Persistence(_)
            | Self::Storage(_)
            | Self::Patch(_)
            | Self::Config(_)
            | Self::Internal { .. } => "exception",
        }
    }
}

/// Result type alias for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;
