//! # clinmerge - Resource Merge & Global Identity Resolution
//!
//! The write path of a multi-tenant clinical document store. Callers submit
//! batches of FHIR-style resources; each one is either created, patched onto
//! the stored version, or recognized as unchanged, and every persisted
//! version is copied to an append-only history collection.
//!
//! ## Core Concepts
//!
//! - **Resource**: a JSON document identified by `(resourceType, id)` and
//!   tagged with owner/access/authority security codes
//! - **Global id**: a deterministic UUID derived from `id` and the source
//!   assigning authority, stored as `_uuid`
//! - **Merge**: overlay of the submission on the stored document, persisted
//!   as a JSON patch with a version bump
//! - **Bulk write**: all writes of one request, grouped per resource type and
//!   issued only after every merge decision is taken
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use clinmerge::{CallerContext, InMemoryDocumentStore, MergeConfig, MergeEngine, MergeRequest};
//!
//! let engine = MergeEngine::new(Arc::new(InMemoryDocumentStore::new()), MergeConfig::from_env()?)?;
//! let caller = CallerContext::new("client-1").with_scope_string("user/*.write access/orgA.*");
//! let response = engine.merge(MergeRequest::new(resources, caller))?;
//! for entry in &response.entries {
//!     println!("{}/{} created={} updated={}", entry.resource_type, entry.id, entry.created, entry.updated);
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Document model
pub mod error;
pub mod identity;
pub mod reference;
pub mod resource;
pub mod tags;

// Merge algorithms
pub mod overlay;
pub mod patch;
pub mod presave;

// Persistence and orchestration
pub mod bulk;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod outcome;
pub mod storage;

pub use bulk::{BulkExecution, BulkWriter, HistoryRecord};
pub use collaborators::{
    AuditEvent, AuditSink, BasicSchemaValidator, CallerContext, InMemoryAuditSink, NoopAuditSink,
    SchemaValidator, ScopeChecker, SmartScopeChecker,
};
pub use config::{ConfigError, MergeConfig};
pub use engine::{MergeEngine, MergeRequest, MergeResponse};
pub use error::{MergeError, MergeResult, PersistenceError, ValidationError};
pub use identity::{derive_global_id, parse_reference, ReferenceParts};
pub use outcome::{MergeResultEntry, OperationOutcome, OperationOutcomeIssue};
pub use presave::{PreSaveHandler, PreSavePipeline};
pub use reference::{GlobalIdentity, Reference};
pub use resource::{Meta, Resource, ResourceTypeRegistry};
pub use storage::{CollectionRegistry, DocumentStore, InMemoryDocumentStore, StorageError};
pub use tags::{SecurityTag, SecurityTagSystem, TagModel};
