//! Abstract document storage trait.
//!
//! The merge engine only needs keyed lookup and grouped bulk writes against
//! named collections. By keeping this behind a trait, we enable:
//! - An in-memory backend for tests and embedded use
//! - Document-database backends for production

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Key already exists in the collection.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Collection was never created.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// The collection registry was closed.
    #[error("Collection registry is closed")]
    RegistryClosed,

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// One operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    /// Inserts a new document. Fails with `DuplicateKey` if the key exists.
    InsertOne { key: String, document: Value },

    /// Replaces the document stored under `key`.
    ///
    /// Without `upsert`, a missing key matches nothing and is not an error.
    ReplaceOne {
        key: String,
        document: Value,
        upsert: bool,
    },
}

impl WriteModel {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::InsertOne { key, .. } | Self::ReplaceOne { key, .. } => key,
        }
    }
}

/// Counters reported by a bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    pub inserted: usize,
    pub matched: usize,
    pub modified: usize,
    pub upserted: usize,
}

/// A bulk write that failed for at least one operation.
///
/// `summary` counts the operations that were applied before (ordered) or
/// besides (unordered) the failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkWriteFailure {
    pub summary: BulkWriteSummary,
    /// `(operation index, error)` pairs.
    pub errors: Vec<(usize, StorageError)>,
}

impl BulkWriteFailure {
    /// Index of the first failing operation.
    #[must_use]
    pub fn first_index(&self) -> Option<usize> {
        self.errors.first().map(|(i, _)| *i)
    }
}

/// Storage trait for keyed JSON documents grouped in named collections.
///
/// # Ordering
/// - `ordered` bulk writes apply operations in sequence and stop at the first
///   failure; later operations are not attempted
/// - unordered bulk writes attempt every operation and report all failures
pub trait DocumentStore: Send + Sync {
    /// Creates the collection if it does not exist yet.
    fn ensure_collection(&self, collection: &str) -> Result<(), StorageError>;

    /// Fetches the document stored under `key`.
    fn find_by_key(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError>;

    /// Applies a batch of write operations.
    fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteModel>,
        ordered: bool,
    ) -> Result<BulkWriteSummary, BulkWriteFailure>;

    /// All documents of a collection, in key order.
    fn list(&self, collection: &str) -> Result<Vec<Value>, StorageError>;

    /// Number of documents in a collection.
    fn count(&self, collection: &str) -> Result<usize, StorageError>;
}
