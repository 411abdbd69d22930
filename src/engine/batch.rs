//! Batch coordination.
//!
//! Resources are grouped by business id in submission order. Groups are fed
//! through a bounded channel to a scoped worker pool; each worker merges the
//! resources of one group sequentially, so two submissions of the same id can
//! never both decide "not found". Writes happen once every decision is in.

use std::collections::{BTreeMap, HashMap};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde_json::Value;
use tracing::{debug, warn};

use crate::bulk::{BulkExecution, BulkWriter};
use crate::collaborators::{AuditEvent, CallerContext};
use crate::engine::write_path::{Decision, RequestContext};
use crate::engine::MergeEngine;
use crate::error::{MergeError, MergeResult};
use crate::outcome::MergeResultEntry;

/// Result of merging one submitted resource, before persistence.
enum Pending {
    Decided(Decision),
    Failed(MergeResultEntry),
}

fn str_member<'a>(document: &'a Value, key: &str) -> &'a str {
    document.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Splits submission indices into groups sharing a business id.
///
/// Groups keep the order of their first member; members keep submission order.
fn group_by_id(items: &[Value]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut by_id: HashMap<&str, usize> = HashMap::new();
    for (index, item) in items.iter().enumerate() {
        let id = str_member(item, "id");
        if id.is_empty() {
            groups.push(vec![index]);
            continue;
        }
        match by_id.get(id) {
            Some(&group) => {
                warn!(id, "resource id submitted more than once in one request; merging in order");
                groups[group].push(index);
            }
            None => {
                by_id.insert(id, groups.len());
                groups.push(vec![index]);
            }
        }
    }
    groups
}

fn failure(document: &Value, error: &MergeError) -> MergeResultEntry {
    MergeResultEntry::failure(
        str_member(document, "resourceType"),
        str_member(document, "id"),
        error,
        document,
    )
}

impl MergeEngine {
    fn merge_one(&self, ctx: &RequestContext<'_>, document: &Value) -> Pending {
        let result = self
            .precheck(document, ctx.caller)
            .and_then(|resource| self.merge_resource(ctx, resource));
        match result {
            Ok(decision) => Pending::Decided(decision),
            Err(e) => {
                debug!(error = %e, "merge: rejected");
                Pending::Failed(failure(document, &e))
            }
        }
    }

    fn merge_group(
        &self,
        ctx: &RequestContext<'_>,
        items: &[Value],
        group: &[usize],
        results: &Sender<(usize, Pending)>,
    ) {
        for &index in group {
            let pending = self.merge_one(ctx, &items[index]);
            // The receiver lives until every worker is joined.
            let _ = results.send((index, pending));
        }
    }
}

/// Phase one: runs every group on the worker pool and collects decisions.
fn decide_all(
    engine: &MergeEngine,
    ctx: &RequestContext<'_>,
    items: &[Value],
    groups: &[Vec<usize>],
) -> Vec<Option<Pending>> {
    let workers = engine.config.merge_parallelism.min(groups.len()).max(1);
    let (group_tx, group_rx) = bounded::<&[usize]>(workers);
    let (result_tx, result_rx) = unbounded::<(usize, Pending)>();
    // Only workers hold the queue's receiving end, so a send fails instead
    // of blocking once every worker is gone.
    let receivers: Vec<Receiver<&[usize]>> = (0..workers).map(|_| group_rx.clone()).collect();
    drop(group_rx);

    thread::scope(|scope| {
        let mut spawned = 0usize;
        for (idx, rx) in receivers.into_iter().enumerate() {
            let results = result_tx.clone();
            let spawn = thread::Builder::new()
                .name(format!("clinmerge-merge-{idx}"))
                .spawn_scoped(scope, move || {
                    while let Ok(group) = rx.recv() {
                        engine.merge_group(ctx, items, group, &results);
                    }
                });
            match spawn {
                Ok(_) => spawned += 1,
                Err(e) => warn!(error = %e, "failed to spawn merge worker"),
            }
        }

        if spawned == 0 {
            warn!("no merge worker could be started, merging inline");
            for group in groups {
                engine.merge_group(ctx, items, group, &result_tx);
            }
        } else {
            for group in groups {
                if group_tx.send(group.as_slice()).is_err() {
                    break;
                }
            }
        }
        // Closing the queue lets workers drain it and exit.
        drop(group_tx);
    });
    drop(result_tx);

    let mut decided: Vec<Option<Pending>> = (0..items.len()).map(|_| None).collect();
    for (index, pending) in result_rx.try_iter() {
        decided[index] = Some(pending);
    }
    decided
}

/// Ids per resource type, for audit events.
type IdsByType = BTreeMap<String, Vec<String>>;

/// Merges a whole request and persists the outcome.
pub(crate) fn run(
    engine: &MergeEngine,
    items: &[Value],
    base_version: &str,
    caller: &CallerContext,
) -> MergeResult<Vec<MergeResultEntry>> {
    let writer = BulkWriter::new(base_version, caller.request_id.clone());
    let ctx = RequestContext {
        base_version,
        caller,
        writer: &writer,
    };

    let groups = group_by_id(items);
    let decided = decide_all(engine, &ctx, items, &groups);

    // Phase two: one bulk execution for the whole request.
    let execution = if writer.pending_count()? > 0 {
        writer.execute(&engine.registry)
    } else {
        Ok(BulkExecution::default())
    };

    let mut entries = Vec::with_capacity(items.len());
    let mut created = IdsByType::new();
    let mut updated = IdsByType::new();
    let mut rejected = Vec::new();

    for (document, pending) in items.iter().zip(decided) {
        let entry = match pending {
            None => failure(document, &MergeError::internal("merge worker did not report a result")),
            Some(Pending::Failed(entry)) => entry,
            Some(Pending::Decided(decision)) => {
                persisted_entry(document, &decision, &execution, &mut created, &mut updated)
            }
        };
        if entry.is_failure() {
            let diagnostics = entry
                .issue
                .as_ref()
                .and_then(|i| i.diagnostics.clone())
                .unwrap_or_default();
            rejected.push((document.clone(), diagnostics));
        }
        entries.push(entry);
    }

    record_audit(engine, caller, created, updated, rejected);
    Ok(entries)
}

fn persisted_entry(
    document: &Value,
    decision: &Decision,
    execution: &MergeResult<BulkExecution>,
    created: &mut IdsByType,
    updated: &mut IdsByType,
) -> MergeResultEntry {
    let (resource, is_insert) = match decision {
        Decision::Created(r) => (r, true),
        Decision::Updated(r) => (r, false),
        Decision::Unchanged(current) => return MergeResultEntry::unchanged(current),
    };
    let execution = match execution {
        Ok(execution) => execution,
        Err(e) => {
            let err = MergeError::internal(format!("bulk write could not run: {e}"));
            return failure(document, &err);
        }
    };
    if let Some(e) = execution.failure_for(&resource.resource_type, &resource.id) {
        return failure(document, &MergeError::Persistence(e.clone()));
    }

    let ids = if is_insert { created } else { updated };
    ids.entry(resource.resource_type.clone())
        .or_default()
        .push(resource.id.clone());
    if is_insert {
        MergeResultEntry::created(resource)
    } else {
        MergeResultEntry::updated(resource)
    }
}

fn record_audit(
    engine: &MergeEngine,
    caller: &CallerContext,
    created: IdsByType,
    updated: IdsByType,
    rejected: Vec<(Value, String)>,
) {
    let request_id = &caller.request_id;
    let events = created
        .into_iter()
        .map(|(resource_type, ids)| AuditEvent::Created {
            resource_type,
            ids,
            request_id: request_id.clone(),
        })
        .chain(updated.into_iter().map(|(resource_type, ids)| AuditEvent::Updated {
            resource_type,
            ids,
            request_id: request_id.clone(),
        }))
        .chain(rejected.into_iter().map(|(resource, diagnostics)| AuditEvent::Rejected {
            resource,
            diagnostics,
            request_id: request_id.clone(),
        }));

    for event in events {
        if let Err(e) = engine.audit.record(event) {
            warn!(error = %e, "audit event dropped");
        }
    }
}
