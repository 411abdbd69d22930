use uuid::Uuid;

use crate::error::{MergeError, MergeResult};
use crate::identity::{derive_global_id, is_uuid};
use crate::presave::PreSaveHandler;
use crate::resource::Resource;
use crate::tags::TagModel;

/// Stamps the resource's global id.
///
/// UUID ids are used directly; other ids are derived from the primary
/// authority. A global id that is already set is kept, it never changes
/// after the first save.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalIdHandler;

impl PreSaveHandler for GlobalIdHandler {
    fn name(&self) -> &'static str {
        "global_id"
    }

    fn pre_save(&self, resource: &mut Resource) -> MergeResult<()> {
        if resource.uuid.is_some() {
            return Ok(());
        }
        if is_uuid(&resource.id) {
            let uuid = Uuid::parse_str(&resource.id)
                .map_err(|e| MergeError::internal(format!("invalid uuid id: {e}")))?;
            resource.uuid = Some(uuid);
            return Ok(());
        }
        let tags = TagModel::from_resource(resource);
        let authority = tags
            .primary_authority()
            .ok_or_else(|| MergeError::MissingAuthority {
                resource_type: resource.resource_type.clone(),
                id: resource.id.clone(),
            })?;
        resource.uuid = Some(derive_global_id(&resource.id, authority));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::SecurityTag;

    #[test]
    fn test_derives_from_primary_authority() {
        let mut resource = Resource::new("Patient", "p1")
            .with_tag(SecurityTag::authority("srcB"))
            .with_tag(SecurityTag::owner("orgA"));
        GlobalIdHandler.pre_save(&mut resource).unwrap();
        assert_eq!(resource.uuid, Some(derive_global_id("p1", "srcB")));
    }

    #[test]
    fn test_uuid_id_is_used_directly() {
        let id = "3f2b6c4e-8d1a-4b7e-9c2f-0a1b2c3d4e5f";
        let mut resource = Resource::new("Patient", id);
        GlobalIdHandler.pre_save(&mut resource).unwrap();
        assert_eq!(resource.uuid.map(|u| u.to_string()).as_deref(), Some(id));
    }

    #[test]
    fn test_missing_authority() {
        let mut resource = Resource::new("Patient", "p1");
        let err = GlobalIdHandler.pre_save(&mut resource).unwrap_err();
        assert!(matches!(err, MergeError::MissingAuthority { .. }));
    }

    #[test]
    fn test_existing_global_id_is_kept() {
        let mut resource = Resource::new("Patient", "p1").with_tag(SecurityTag::owner("orgA"));
        resource.uuid = Some(Uuid::nil());
        GlobalIdHandler.pre_save(&mut resource).unwrap();
        assert_eq!(resource.uuid, Some(Uuid::nil()));
    }
}
