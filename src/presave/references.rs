use serde_json::Value;
use tracing::trace;

use crate::error::{MergeError, MergeResult, ValidationError};
use crate::presave::PreSaveHandler;
use crate::reference::Reference;
use crate::resource::Resource;
use crate::tags::TagModel;

/// Attaches global identity side-data to every embedded reference.
///
/// Any JSON object in the resource body with a string `reference` member is
/// treated as a reference. Absolute URLs and contained (`#`) references point
/// outside the identity graph and never carry identity data.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceGlobalIdHandler;

const GLOBAL_IDENTITY_FIELD: &str = "globalIdentity";

fn is_external(value: &str) -> bool {
    value.starts_with('#') || value.contains("://")
}

fn rewrite(value: &mut Value, default_authority: Option<&str>) -> MergeResult<()> {
    match value {
        Value::Object(map) => {
            let target = map
                .get("reference")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(target) = target {
                if is_external(&target) {
                    // Identity data left over from an earlier local target.
                    map.remove(GLOBAL_IDENTITY_FIELD);
                } else {
                    let mut reference: Reference = serde_json::from_value(Value::Object(map.clone()))
                        .map_err(|e| ValidationError::InvalidReference {
                            value: target.clone(),
                            reason: e.to_string(),
                        })?;
                    reference.global_identity = reference.resolve_identity(default_authority)?;
                    trace!(reference = %target, resolved = reference.global_identity.is_some(), "reference resolved");
                    *value = serde_json::to_value(&reference)
                        .map_err(|e| MergeError::internal(format!("failed to serialize reference: {e}")))?;
                    return Ok(());
                }
            }
            for child in map.values_mut() {
                rewrite(child, default_authority)?;
            }
            Ok(())
        }
        Value::Array(items) => items
            .iter_mut()
            .try_for_each(|item| rewrite(item, default_authority)),
        _ => Ok(()),
    }
}

impl PreSaveHandler for ReferenceGlobalIdHandler {
    fn name(&self) -> &'static str {
        "reference_global_id"
    }

    fn pre_save(&self, resource: &mut Resource) -> MergeResult<()> {
        let tags = TagModel::from_resource(resource);
        let authority = tags.primary_authority();
        for field in resource.fields.values_mut() {
            rewrite(field, authority)?;
        }
        Ok(())
    }
}
