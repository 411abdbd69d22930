//! Per-resource create-or-update decision.

use serde_json::Value;
use tracing::debug;

use crate::bulk::BulkWriter;
use crate::collaborators::CallerContext;
use crate::engine::MergeEngine;
use crate::error::{MergeError, MergeResult, ValidationError};
use crate::overlay::overlay;
use crate::patch::{apply, diff, PatchOp};
use crate::resource::{normalize_nulls, now_truncated, Resource, ROW_ID_FIELD};
use crate::tags::TagModel;

/// Members that identify a stored document and are never patched.
const IMMUTABLE_POINTERS: &[&str] = &["/_id", "/id", "/_uuid"];

/// What the merge of one resource decided.
#[derive(Debug, Clone)]
pub(crate) enum Decision {
    /// Queued as a new resource.
    Created(Resource),
    /// Queued as a patched replacement.
    Updated(Resource),
    /// Matches the stored resource; nothing queued.
    Unchanged(Resource),
}

/// Shared state of one merge request.
pub(crate) struct RequestContext<'a> {
    pub base_version: &'a str,
    pub caller: &'a CallerContext,
    pub writer: &'a BulkWriter,
}

fn strip_row_id(mut document: Value) -> Value {
    if let Value::Object(map) = &mut document {
        map.remove(ROW_ID_FIELD);
    }
    document
}

impl MergeEngine {
    /// Merges one prechecked resource.
    pub(crate) fn merge_resource(
        &self,
        ctx: &RequestContext<'_>,
        mut incoming: Resource,
    ) -> MergeResult<Decision> {
        // Internal members are owned by the store, never by the caller.
        incoming.row_id = None;
        incoming.uuid = None;
        self.pipeline.run(&mut incoming)?;

        match self.lookup(ctx, &incoming)? {
            None => self.insert_path(ctx, incoming),
            Some(stored) => self.update_path(ctx, incoming, stored),
        }
    }

    /// Finds the current document, consulting writes queued by this request first.
    fn lookup(&self, ctx: &RequestContext<'_>, resource: &Resource) -> MergeResult<Option<Value>> {
        if let Some(pending) = ctx.writer.pending(&resource.resource_type, &resource.id)? {
            return Ok(Some(pending));
        }
        let collection = self
            .registry
            .primary(&resource.resource_type, ctx.base_version)?;
        let store = self.registry.store()?;
        Ok(store.find_by_key(&collection, &resource.id)?)
    }

    fn insert_path(&self, ctx: &RequestContext<'_>, mut resource: Resource) -> MergeResult<Decision> {
        resource.meta.version_id = Some("1".to_string());
        resource.meta.last_updated = Some(now_truncated());

        if self.config.require_access_tags && !TagModel::from_resource(&resource).has_access_tags() {
            return Err(ValidationError::MissingAccessTag.into());
        }
        if self.config.require_meta_source && resource.meta.source.is_none() {
            return Err(ValidationError::MissingMetaSource.into());
        }

        let resource = Resource::from_value(normalize_nulls(resource.to_value()?))?;
        ctx.writer.insert_one(&resource)?;
        debug!(resource = %resource.reference_key(), "merge: insert");
        Ok(Decision::Created(resource))
    }

    fn update_path(
        &self,
        ctx: &RequestContext<'_>,
        incoming: Resource,
        stored: Value,
    ) -> MergeResult<Decision> {
        let current = Resource::from_value(stored.clone())?;

        // The stored global id is derived from the stored authority, so only a
        // submission sharing that authority may patch the document.
        let current_tags = TagModel::from_resource(&current);
        let incoming_tags = TagModel::from_resource(&incoming);
        if !current_tags.authority.is_empty()
            && !incoming_tags.authority.is_empty()
            && !current_tags.matches_on_authority(&incoming_tags)
        {
            return Err(MergeError::AuthorityConflict {
                resource_type: current.resource_type.clone(),
                id: current.id.clone(),
                stored: current_tags.authority.join(", "),
                incoming: incoming_tags.authority.join(", "),
            });
        }

        // Fields the store owns are taken from the current document so that
        // they never show up as differences.
        let mut compare = incoming.clone();
        compare.meta.version_id.clone_from(&current.meta.version_id);
        compare.meta.last_updated = current.meta.last_updated;
        compare.meta.source.clone_from(&current.meta.source);
        compare.uuid = current.uuid;

        let current_doc = normalize_nulls(strip_row_id(stored));
        let incoming_doc = normalize_nulls(strip_row_id(compare.to_value()?));
        if current_doc == incoming_doc {
            debug!(resource = %current.reference_key(), "merge: unchanged");
            return Ok(Decision::Unchanged(current));
        }

        let merged = overlay(&current_doc, &incoming_doc);
        let patch: Vec<PatchOp> = diff(&current_doc, &merged)
            .into_iter()
            .filter(|op| !IMMUTABLE_POINTERS.iter().any(|p| op.touches(p)))
            .collect();
        if patch.is_empty() {
            debug!(resource = %current.reference_key(), "merge: overlay adds nothing");
            return Ok(Decision::Unchanged(current));
        }

        if !self.scopes.has_read_access(&current_tags, ctx.caller)? {
            return Err(MergeError::forbidden(format!(
                "user {} with scopes [{}] has no access to resource {} with access tags [{}]",
                ctx.caller.user,
                ctx.caller.scopes.join(" "),
                current.reference_key(),
                current_tags.access.join(", ")
            )));
        }

        let mut patched = Resource::from_value(apply(&current_doc, &patch)?)?;
        let version = current.meta.version_number()? + 1;
        patched.meta.version_id = Some(version.to_string());
        patched.meta.last_updated = Some(now_truncated());
        patched.meta.source = incoming.meta.source.clone().or_else(|| current.meta.source.clone());
        patched.meta.security = if incoming.meta.security.is_empty() {
            current.meta.security.clone()
        } else {
            incoming.meta.security.clone()
        };
        patched.uuid = current.uuid;
        patched.row_id.clone_from(&current.row_id);
        self.pipeline.run(&mut patched)?;

        ctx.writer.replace_one(&patched)?;
        debug!(
            resource = %patched.reference_key(),
            version,
            operations = patch.len(),
            "merge: update"
        );
        Ok(Decision::Updated(patched))
    }
}
