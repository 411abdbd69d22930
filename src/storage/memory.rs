//! In-memory storage backend.
//!
//! Thread-safe implementation of [`DocumentStore`] for embedded usage, tests,
//! and as a reference implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde_json::Value;
use uuid::Uuid;

use crate::resource::ROW_ID_FIELD;
use crate::storage::traits::{
    BulkWriteFailure, BulkWriteSummary, DocumentStore, StorageError, WriteModel,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

type Collection = BTreeMap<String, Value>;

/// Assigns a row id to a new document, or carries over the one it replaces.
fn with_row_id(mut document: Value, existing: Option<&Value>) -> Result<Value, StorageError> {
    let Value::Object(map) = &mut document else {
        return Err(StorageError::SerializationError(
            "documents must be JSON objects".to_string(),
        ));
    };
    let row_id = existing
        .and_then(|doc| doc.get(ROW_ID_FIELD))
        .cloned()
        .unwrap_or_else(|| Value::String(Uuid::new_v4().simple().to_string()));
    map.insert(ROW_ID_FIELD.to_string(), row_id);
    Ok(document)
}

fn apply_one(
    collection: &mut Collection,
    op: WriteModel,
    summary: &mut BulkWriteSummary,
) -> Result<(), StorageError> {
    match op {
        WriteModel::InsertOne { key, document } => {
            if collection.contains_key(&key) {
                return Err(StorageError::DuplicateKey(key));
            }
            let document = with_row_id(document, None)?;
            collection.insert(key, document);
            summary.inserted += 1;
        }
        WriteModel::ReplaceOne {
            key,
            document,
            upsert,
        } => match collection.get(&key) {
            Some(existing) => {
                let document = with_row_id(document, Some(existing))?;
                summary.matched += 1;
                if existing != &document {
                    summary.modified += 1;
                }
                collection.insert(key, document);
            }
            None if upsert => {
                let document = with_row_id(document, None)?;
                collection.insert(key, document);
                summary.upserted += 1;
            }
            None => {}
        },
    }
    Ok(())
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Result<Vec<String>, StorageError> {
        let guard = self
            .collections
            .read()
            .map_err(|_| lock_err("collections.read"))?;
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn ensure_collection(&self, collection: &str) -> Result<(), StorageError> {
        let mut guard = self
            .collections
            .write()
            .map_err(|_| lock_err("collections.write"))?;
        guard.entry(collection.to_string()).or_default();
        Ok(())
    }

    fn find_by_key(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let guard = self
            .collections
            .read()
            .map_err(|_| lock_err("collections.read"))?;
        Ok(guard.get(collection).and_then(|c| c.get(key)).cloned())
    }

    fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteModel>,
        ordered: bool,
    ) -> Result<BulkWriteSummary, BulkWriteFailure> {
        let mut summary = BulkWriteSummary::default();
        let mut guard = match self.collections.write() {
            Ok(guard) => guard,
            Err(_) => {
                return Err(BulkWriteFailure {
                    summary,
                    errors: vec![(0, lock_err("collections.write"))],
                })
            }
        };
        let Some(target) = guard.get_mut(collection) else {
            return Err(BulkWriteFailure {
                summary,
                errors: vec![(0, StorageError::UnknownCollection(collection.to_string()))],
            });
        };

        let mut errors = Vec::new();
        for (index, op) in operations.into_iter().enumerate() {
            if let Err(e) = apply_one(target, op, &mut summary) {
                errors.push((index, e));
                if ordered {
                    break;
                }
            }
        }

        if errors.is_empty() {
            Ok(summary)
        } else {
            Err(BulkWriteFailure { summary, errors })
        }
    }

    fn list(&self, collection: &str) -> Result<Vec<Value>, StorageError> {
        let guard = self
            .collections
            .read()
            .map_err(|_| lock_err("collections.read"))?;
        guard
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .ok_or_else(|| StorageError::UnknownCollection(collection.to_string()))
    }

    fn count(&self, collection: &str) -> Result<usize, StorageError> {
        let guard = self
            .collections
            .read()
            .map_err(|_| lock_err("collections.read"))?;
        guard
            .get(collection)
            .map(BTreeMap::len)
            .ok_or_else(|| StorageError::UnknownCollection(collection.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(key: &str, document: Value) -> WriteModel {
        WriteModel::InsertOne {
            key: key.to_string(),
            document,
        }
    }

    fn replace(key: &str, document: Value) -> WriteModel {
        WriteModel::ReplaceOne {
            key: key.to_string(),
            document,
            upsert: false,
        }
    }

    fn store_with(collection: &str) -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new();
        store.ensure_collection(collection).unwrap();
        store
    }

    #[test]
    fn test_insert_assigns_row_id() {
        let store = store_with("Patient_4_0_0");
        let summary = store
            .bulk_write("Patient_4_0_0", vec![insert("p1", json!({"id": "p1"}))], true)
            .unwrap();
        assert_eq!(summary.inserted, 1);

        let doc = store.find_by_key("Patient_4_0_0", "p1").unwrap().unwrap();
        assert!(doc[ROW_ID_FIELD].is_string());
        assert_eq!(doc["id"], json!("p1"));
    }

    #[test]
    fn test_replace_keeps_row_id() {
        let store = store_with("c");
        store.bulk_write("c", vec![insert("k", json!({"v": 1}))], true).unwrap();
        let row_id = store.find_by_key("c", "k").unwrap().unwrap()[ROW_ID_FIELD].clone();

        let summary = store.bulk_write("c", vec![replace("k", json!({"v": 2}))], true).unwrap();
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.modified, 1);

        let doc = store.find_by_key("c", "k").unwrap().unwrap();
        assert_eq!(doc["v"], json!(2));
        assert_eq!(doc[ROW_ID_FIELD], row_id);
    }

    #[test]
    fn test_replace_without_match_is_not_an_error() {
        let store = store_with("c");
        let summary = store.bulk_write("c", vec![replace("missing", json!({}))], true).unwrap();
        assert_eq!(summary.matched, 0);
        assert_eq!(store.count("c").unwrap(), 0);
    }

    #[test]
    fn test_upsert_inserts_missing_key() {
        let store = store_with("c");
        let op = WriteModel::ReplaceOne {
            key: "k".to_string(),
            document: json!({"v": 1}),
            upsert: true,
        };
        let summary = store.bulk_write("c", vec![op], true).unwrap();
        assert_eq!(summary.upserted, 1);
        assert_eq!(store.count("c").unwrap(), 1);
    }

    #[test]
    fn test_ordered_batch_stops_at_first_failure() {
        let store = store_with("c");
        let ops = vec![
            insert("a", json!({})),
            insert("a", json!({})),
            insert("b", json!({})),
        ];
        let failure = store.bulk_write("c", ops, true).unwrap_err();
        assert_eq!(failure.first_index(), Some(1));
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.summary.inserted, 1);
        assert!(store.find_by_key("c", "b").unwrap().is_none());
    }

    #[test]
    fn test_unordered_batch_attempts_every_operation() {
        let store = store_with("c");
        let ops = vec![
            insert("a", json!({})),
            insert("a", json!({})),
            insert("b", json!({})),
        ];
        let failure = store.bulk_write("c", ops, false).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert!(matches!(failure.errors[0].1, StorageError::DuplicateKey(_)));
        assert_eq!(failure.summary.inserted, 2);
        assert!(store.find_by_key("c", "b").unwrap().is_some());
    }

    #[test]
    fn test_unknown_collection() {
        let store = InMemoryDocumentStore::new();
        assert!(store.find_by_key("nope", "k").unwrap().is_none());
        assert_eq!(
            store.count("nope"),
            Err(StorageError::UnknownCollection("nope".to_string()))
        );
        let failure = store.bulk_write("nope", vec![insert("k", json!({}))], true).unwrap_err();
        assert!(matches!(failure.errors[0].1, StorageError::UnknownCollection(_)));
    }

    #[test]
    fn test_non_object_document_rejected() {
        let store = store_with("c");
        let failure = store.bulk_write("c", vec![insert("k", json!([1]))], true).unwrap_err();
        assert!(matches!(failure.errors[0].1, StorageError::SerializationError(_)));
    }

    #[test]
    fn test_list_is_key_ordered() {
        let store = store_with("c");
        store
            .bulk_write("c", vec![insert("b", json!({"k": "b"})), insert("a", json!({"k": "a"}))], true)
            .unwrap();
        let docs = store.list("c").unwrap();
        assert_eq!(docs[0]["k"], json!("a"));
        assert_eq!(docs[1]["k"], json!("b"));
        assert_eq!(store.collection_names().unwrap(), vec!["c".to_string()]);
    }
}
