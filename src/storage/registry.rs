//! Collection registry.
//!
//! Maps a resource type and base version to its primary and history
//! collection names and makes sure the collections exist before first use.
//! The registry is an explicit object with an open/close lifecycle; it is
//! created once and injected into the components that write.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::storage::traits::{DocumentStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Suffix of history collection names.
pub const HISTORY_SUFFIX: &str = "_History";

/// Primary collection name for a resource type.
#[must_use]
pub fn primary_collection_name(resource_type: &str, base_version: &str) -> String {
    format!("{resource_type}_{base_version}")
}

/// History collection name for a resource type.
#[must_use]
pub fn history_collection_name(resource_type: &str, base_version: &str) -> String {
    format!("{resource_type}_{base_version}{HISTORY_SUFFIX}")
}

/// Registry of the collections backing each resource type.
pub struct CollectionRegistry {
    store: Arc<dyn DocumentStore>,
    ensured: RwLock<HashSet<String>>,
    open: AtomicBool,
}

impl std::fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRegistry")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl CollectionRegistry {
    /// Opens a registry over `store`.
    #[must_use]
    pub fn open(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            ensured: RwLock::new(HashSet::new()),
            open: AtomicBool::new(true),
        }
    }

    /// Closes the registry. Later lookups fail with `RegistryClosed`.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Ok(mut ensured) = self.ensured.write() {
            ensured.clear();
        }
        debug!("collection registry closed");
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// The backing store.
    pub fn store(&self) -> Result<&Arc<dyn DocumentStore>, StorageError> {
        if !self.is_open() {
            return Err(StorageError::RegistryClosed);
        }
        Ok(&self.store)
    }

    fn ensure(&self, name: String) -> Result<String, StorageError> {
        if !self.is_open() {
            return Err(StorageError::RegistryClosed);
        }
        {
            let ensured = self.ensured.read().map_err(|_| lock_err("ensured.read"))?;
            if ensured.contains(&name) {
                return Ok(name);
            }
        }
        self.store.ensure_collection(&name)?;
        let mut ensured = self.ensured.write().map_err(|_| lock_err("ensured.write"))?;
        ensured.insert(name.clone());
        debug!(collection = %name, "collection ready");
        Ok(name)
    }

    /// Name of the primary collection, creating it on first use.
    pub fn primary(&self, resource_type: &str, base_version: &str) -> Result<String, StorageError> {
        self.ensure(primary_collection_name(resource_type, base_version))
    }

    /// Name of the history collection, creating it on first use.
    pub fn history(&self, resource_type: &str, base_version: &str) -> Result<String, StorageError> {
        self.ensure(history_collection_name(resource_type, base_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryDocumentStore;

    #[test]
    fn test_collection_names() {
        assert_eq!(primary_collection_name("Patient", "4_0_0"), "Patient_4_0_0");
        assert_eq!(
            history_collection_name("Patient", "4_0_0"),
            "Patient_4_0_0_History"
        );
    }

    #[test]
    fn test_collections_are_created_lazily() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let registry = CollectionRegistry::open(store.clone());
        assert!(store.collection_names().unwrap().is_empty());

        assert_eq!(registry.primary("Patient", "4_0_0").unwrap(), "Patient_4_0_0");
        assert_eq!(
            registry.history("Patient", "4_0_0").unwrap(),
            "Patient_4_0_0_History"
        );
        assert_eq!(
            store.collection_names().unwrap(),
            vec!["Patient_4_0_0".to_string(), "Patient_4_0_0_History".to_string()]
        );
    }

    #[test]
    fn test_closed_registry_rejects_use() {
        let registry = CollectionRegistry::open(Arc::new(InMemoryDocumentStore::new()));
        registry.primary("Patient", "4_0_0").unwrap();
        registry.close();
        assert!(!registry.is_open());
        assert_eq!(
            registry.primary("Patient", "4_0_0"),
            Err(StorageError::RegistryClosed)
        );
        assert!(registry.store().is_err());
    }
}
