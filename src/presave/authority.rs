use crate::error::MergeResult;
use crate::presave::PreSaveHandler;
use crate::resource::Resource;
use crate::tags::{SecurityTag, SecurityTagSystem};

/// Copies owner codes into source assigning authority tags when a resource
/// has none, so the authority fallback is persisted explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorityTagHandler;

impl PreSaveHandler for AuthorityTagHandler {
    fn name(&self) -> &'static str {
        "authority_tags"
    }

    fn pre_save(&self, resource: &mut Resource) -> MergeResult<()> {
        let security = &mut resource.meta.security;
        if security
            .iter()
            .any(|t| t.system == SecurityTagSystem::SOURCE_ASSIGNING_AUTHORITY)
        {
            return Ok(());
        }
        let mut owners: Vec<String> = Vec::new();
        for tag in security.iter().filter(|t| t.system == SecurityTagSystem::OWNER) {
            if !owners.contains(&tag.code) {
                owners.push(tag.code.clone());
            }
        }
        security.extend(owners.into_iter().map(SecurityTag::authority));
        Ok(())
    }
}
