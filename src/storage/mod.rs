//! Document storage for merged resources.
//!
//! The trait defines the abstract interface for storage backends; an
//! in-memory implementation and the collection registry live alongside it.

pub mod memory;
pub mod registry;
mod traits;

pub use memory::InMemoryDocumentStore;
pub use registry::{history_collection_name, primary_collection_name, CollectionRegistry};
pub use traits::{BulkWriteFailure, BulkWriteSummary, DocumentStore, StorageError, WriteModel};
