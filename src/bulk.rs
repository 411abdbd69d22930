//! Grouped bulk persistence.
//!
//! A [`BulkWriter`] lives for one merge request. Merge decisions queue
//! inserts and replaces per resource type; [`BulkWriter::execute`] then writes
//! every type's primary batch (ordered, so inserts land before the replaces
//! that follow them) and history batch (unordered, each record is an
//! independent append), all in parallel. A failing batch only affects the
//! resources it carried.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{MergeError, MergeResult, PersistenceError};
use crate::resource::Resource;
use crate::storage::{
    BulkWriteFailure, BulkWriteSummary, CollectionRegistry, DocumentStore, StorageError,
    WriteModel,
};

/// The write that produced a history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub method: String,
    pub url: String,
}

/// Immutable copy of a resource at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// `{businessId}_{versionId}`.
    pub id: String,
    pub resource: Value,
    pub request: HistoryRequest,
}

impl HistoryRecord {
    /// History key of `id` at `version`.
    #[must_use]
    pub fn key(id: &str, version: u64) -> String {
        format!("{id}_{version}")
    }
}

/// Kind of a queued primary write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Replace,
}

#[derive(Debug, Clone)]
struct QueuedWrite {
    id: String,
    kind: WriteKind,
    model: WriteModel,
}

#[derive(Debug, Default)]
struct Queues {
    primary: BTreeMap<String, Vec<QueuedWrite>>,
    history: BTreeMap<String, Vec<QueuedWrite>>,
}

fn lock_err() -> MergeError {
    MergeError::Storage(StorageError::BackendError(
        "poisoned lock: bulk queues".to_string(),
    ))
}

/// Which collection of a resource type a batch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTarget {
    Primary,
    History,
}

/// Outcome of one resource type's batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub resource_type: String,
    pub target: BatchTarget,
    pub operations: usize,
    pub outcome: Result<BulkWriteSummary, PersistenceError>,
}

/// Outcome of [`BulkWriter::execute`].
#[derive(Debug, Clone, Default)]
pub struct BulkExecution {
    pub batches: Vec<BatchResult>,
    failed: BTreeMap<(String, String), PersistenceError>,
}

impl BulkExecution {
    /// The persistence error that affected `(resource_type, id)`, if any.
    #[must_use]
    pub fn failure_for(&self, resource_type: &str, id: &str) -> Option<&PersistenceError> {
        self.failed
            .get(&(resource_type.to_string(), id.to_string()))
    }

    /// True if every batch succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.batches.iter().all(|b| b.outcome.is_ok())
    }

    /// `(resource_type, id)` pairs whose writes failed.
    pub fn failed_ids(&self) -> impl Iterator<Item = (&str, &str)> {
        self.failed.keys().map(|(t, id)| (t.as_str(), id.as_str()))
    }
}

/// Request-scoped accumulator of bulk writes.
#[derive(Debug)]
pub struct BulkWriter {
    base_version: String,
    request_id: Option<String>,
    queues: Mutex<Queues>,
}

impl BulkWriter {
    #[must_use]
    pub fn new(base_version: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            base_version: base_version.into(),
            request_id,
            queues: Mutex::new(Queues::default()),
        }
    }

    #[must_use]
    pub fn base_version(&self) -> &str {
        &self.base_version
    }

    fn history_write(&self, resource: &Resource, document: Value, method: &str) -> MergeResult<QueuedWrite> {
        let version = resource.meta.version_number()?;
        let key = HistoryRecord::key(&resource.id, version);
        let record = HistoryRecord {
            id: key.clone(),
            resource: document,
            request: HistoryRequest {
                id: self.request_id.clone(),
                method: method.to_string(),
                url: format!(
                    "/{}/{}/{}",
                    self.base_version, resource.resource_type, resource.id
                ),
            },
        };
        let document = serde_json::to_value(&record)
            .map_err(|e| MergeError::internal(format!("failed to serialize history record: {e}")))?;
        Ok(QueuedWrite {
            id: resource.id.clone(),
            kind: WriteKind::Insert,
            model: WriteModel::InsertOne { key, document },
        })
    }

    fn replace_model(id: &str, document: Value) -> WriteModel {
        WriteModel::ReplaceOne {
            key: id.to_string(),
            document,
            upsert: false,
        }
    }

    /// Queues a new resource and its first history record.
    ///
    /// If an insert for the same id is already pending, the write is queued
    /// as a replace so the ordered batch does not hit a duplicate key.
    pub fn insert_one(&self, resource: &Resource) -> MergeResult<()> {
        let document = resource.to_value()?;
        let history = self.history_write(resource, document.clone(), "POST")?;
        let mut queues = self.queues.lock().map_err(|_| lock_err())?;

        let primary = queues
            .primary
            .entry(resource.resource_type.clone())
            .or_default();
        let already_inserted = primary
            .iter()
            .any(|w| w.id == resource.id && w.kind == WriteKind::Insert);
        let write = if already_inserted {
            debug!(resource = %resource.reference_key(), "insert already pending, queueing replace");
            QueuedWrite {
                id: resource.id.clone(),
                kind: WriteKind::Replace,
                model: Self::replace_model(&resource.id, document),
            }
        } else {
            QueuedWrite {
                id: resource.id.clone(),
                kind: WriteKind::Insert,
                model: WriteModel::InsertOne {
                    key: resource.id.clone(),
                    document,
                },
            }
        };
        primary.push(write);
        queues
            .history
            .entry(resource.resource_type.clone())
            .or_default()
            .push(history);
        Ok(())
    }

    /// Queues a replacement of a stored resource and its history record.
    pub fn replace_one(&self, resource: &Resource) -> MergeResult<()> {
        let document = resource.to_value()?;
        let history = self.history_write(resource, document.clone(), "PUT")?;
        let mut queues = self.queues.lock().map_err(|_| lock_err())?;
        queues
            .primary
            .entry(resource.resource_type.clone())
            .or_default()
            .push(QueuedWrite {
                id: resource.id.clone(),
                kind: WriteKind::Replace,
                model: Self::replace_model(&resource.id, document),
            });
        queues
            .history
            .entry(resource.resource_type.clone())
            .or_default()
            .push(history);
        Ok(())
    }

    /// Latest queued document for `id`, if any.
    pub fn pending(&self, resource_type: &str, id: &str) -> MergeResult<Option<Value>> {
        let queues = self.queues.lock().map_err(|_| lock_err())?;
        Ok(queues
            .primary
            .get(resource_type)
            .and_then(|writes| writes.iter().rev().find(|w| w.id == id))
            .map(|w| match &w.model {
                WriteModel::InsertOne { document, .. } | WriteModel::ReplaceOne { document, .. } => {
                    document.clone()
                }
            }))
    }

    /// Number of queued primary writes.
    pub fn pending_count(&self) -> MergeResult<usize> {
        let queues = self.queues.lock().map_err(|_| lock_err())?;
        Ok(queues.primary.values().map(Vec::len).sum())
    }

    /// Writes every queued batch and clears the queues.
    pub fn execute(&self, registry: &CollectionRegistry) -> MergeResult<BulkExecution> {
        let queues = {
            let mut guard = self.queues.lock().map_err(|_| lock_err())?;
            std::mem::take(&mut *guard)
        };
        let store = registry.store()?;

        let mut jobs = Vec::new();
        for (resource_type, writes) in queues.primary {
            let collection = registry.primary(&resource_type, &self.base_version);
            jobs.push(BatchJob::new(resource_type, BatchTarget::Primary, collection, writes));
        }
        for (resource_type, writes) in queues.history {
            let collection = registry.history(&resource_type, &self.base_version);
            jobs.push(BatchJob::new(resource_type, BatchTarget::History, collection, writes));
        }

        let outputs: Vec<JobOutput> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(jobs.len());
            let mut inline = Vec::new();
            for job in &jobs {
                let name = format!("clinmerge-bulk-{}", job.resource_type);
                match thread::Builder::new()
                    .name(name)
                    .spawn_scoped(scope, move || job.run(store))
                {
                    Ok(handle) => handles.push((job, handle)),
                    Err(e) => {
                        debug!(error = %e, "bulk thread spawn failed, writing inline");
                        inline.push(job.run(store));
                    }
                }
            }
            for (job, handle) in handles {
                inline.push(handle.join().unwrap_or_else(|_| {
                    job.failed_output("bulk writer thread panicked".to_string(), None)
                }));
            }
            inline
        });

        let mut execution = BulkExecution::default();
        for output in outputs {
            for id in output.failed_ids {
                if let Err(e) = &output.result.outcome {
                    execution
                        .failed
                        .entry((output.result.resource_type.clone(), id))
                        .or_insert_with(|| e.clone());
                }
            }
            execution.batches.push(output.result);
        }
        Ok(execution)
    }
}

struct BatchJob {
    resource_type: String,
    target: BatchTarget,
    collection: Result<String, StorageError>,
    writes: Vec<QueuedWrite>,
}

struct JobOutput {
    result: BatchResult,
    failed_ids: BTreeSet<String>,
}

impl BatchJob {
    fn new(
        resource_type: String,
        target: BatchTarget,
        collection: Result<String, StorageError>,
        writes: Vec<QueuedWrite>,
    ) -> Self {
        Self {
            resource_type,
            target,
            collection,
            writes,
        }
    }

    fn ordered(&self) -> bool {
        self.target == BatchTarget::Primary
    }

    fn collection_name(&self) -> String {
        match &self.collection {
            Ok(name) => name.clone(),
            Err(_) => format!("{}<{:?}>", self.resource_type, self.target),
        }
    }

    fn failed_output(&self, message: String, index: Option<usize>) -> JobOutput {
        JobOutput {
            failed_ids: self.writes.iter().map(|w| w.id.clone()).collect(),
            result: BatchResult {
                resource_type: self.resource_type.clone(),
                target: self.target,
                operations: self.writes.len(),
                outcome: Err(PersistenceError {
                    resource_type: self.resource_type.clone(),
                    collection: self.collection_name(),
                    index,
                    message,
                }),
            },
        }
    }

    fn run(&self, store: &Arc<dyn DocumentStore>) -> JobOutput {
        let collection = match &self.collection {
            Ok(name) => name.as_str(),
            Err(e) => {
                error!(resource_type = %self.resource_type, error = %e, "collection unavailable");
                return self.failed_output(e.to_string(), None);
            }
        };
        let operations: Vec<WriteModel> = self.writes.iter().map(|w| w.model.clone()).collect();

        match store.bulk_write(collection, operations, self.ordered()) {
            Ok(summary) => {
                debug!(
                    resource_type = %self.resource_type,
                    collection,
                    inserted = summary.inserted,
                    matched = summary.matched,
                    "bulk write complete"
                );
                JobOutput {
                    failed_ids: BTreeSet::new(),
                    result: BatchResult {
                        resource_type: self.resource_type.clone(),
                        target: self.target,
                        operations: self.writes.len(),
                        outcome: Ok(summary),
                    },
                }
            }
            Err(failure) => self.failure_output(collection, &failure),
        }
    }

    fn failure_output(&self, collection: &str, failure: &BulkWriteFailure) -> JobOutput {
        let first = failure.first_index();
        let message = failure
            .errors
            .iter()
            .map(|(i, e)| format!("#{i}: {e}"))
            .collect::<Vec<_>>()
            .join("; ");
        error!(
            resource_type = %self.resource_type,
            collection,
            errors = failure.errors.len(),
            %message,
            "bulk write failed"
        );

        // Ordered batches abandon everything from the first failure on.
        let failed_ids = if self.ordered() {
            let start = first.unwrap_or(0);
            self.writes.iter().skip(start).map(|w| w.id.clone()).collect()
        } else {
            failure
                .errors
                .iter()
                .filter_map(|(i, _)| self.writes.get(*i))
                .map(|w| w.id.clone())
                .collect()
        };

        JobOutput {
            failed_ids,
            result: BatchResult {
                resource_type: self.resource_type.clone(),
                target: self.target,
                operations: self.writes.len(),
                outcome: Err(PersistenceError {
                    resource_type: self.resource_type.clone(),
                    collection: collection.to_string(),
                    index: first,
                    message,
                }),
            },
        }
    }
}
