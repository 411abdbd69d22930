//! Security tag ownership model.
//!
//! Every stored resource carries `meta.security` codings. Four systems are
//! meaningful to the write path: owner, access, vendor and source assigning
//! authority. The authority codes are the namespace used to derive global ids;
//! when a resource carries no explicit authority tag, its owner codes stand in.

use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// Well-known security tag systems.
pub struct SecurityTagSystem;

impl SecurityTagSystem {
    /// Organisation that owns the resource.
    pub const OWNER: &'static str = "https://www.icanbwell.com/owner";
    /// Access code a caller must hold (via scopes) to read the resource.
    pub const ACCESS: &'static str = "https://www.icanbwell.com/access";
    /// Vendor that delivered the resource.
    pub const VENDOR: &'static str = "https://www.icanbwell.com/vendor";
    /// Source that issued the resource's local id.
    pub const SOURCE_ASSIGNING_AUTHORITY: &'static str =
        "https://www.icanbwell.com/sourceAssigningAuthority";
}

/// A `(system, code)` pair in `meta.security`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityTag {
    pub system: String,
    pub code: String,
}

impl SecurityTag {
    /// Creates a tag for an arbitrary system.
    #[must_use]
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            code: code.into(),
        }
    }

    /// Owner tag.
    #[must_use]
    pub fn owner(code: impl Into<String>) -> Self {
        Self::new(SecurityTagSystem::OWNER, code)
    }

    /// Access tag.
    #[must_use]
    pub fn access(code: impl Into<String>) -> Self {
        Self::new(SecurityTagSystem::ACCESS, code)
    }

    /// Vendor tag.
    #[must_use]
    pub fn vendor(code: impl Into<String>) -> Self {
        Self::new(SecurityTagSystem::VENDOR, code)
    }

    /// Source assigning authority tag.
    #[must_use]
    pub fn authority(code: impl Into<String>) -> Self {
        Self::new(SecurityTagSystem::SOURCE_ASSIGNING_AUTHORITY, code)
    }
}

/// Codes of a resource grouped by security system.
///
/// Codes keep their tag order and are de-duplicated, so `authority[0]` is the
/// primary authority used for identity derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagModel {
    pub owner: Vec<String>,
    pub access: Vec<String>,
    pub vendor: Vec<String>,
    pub authority: Vec<String>,
}

fn push_unique(codes: &mut Vec<String>, code: &str) {
    if !codes.iter().any(|c| c == code) {
        codes.push(code.to_string());
    }
}

impl TagModel {
    /// Collects codes per system. Falls back to the owner codes when no
    /// authority tag is present.
    #[must_use]
    pub fn from_tags(tags: &[SecurityTag]) -> Self {
        let mut model = Self::default();
        for tag in tags {
            let bucket = match tag.system.as_str() {
                SecurityTagSystem::OWNER => &mut model.owner,
                SecurityTagSystem::ACCESS => &mut model.access,
                SecurityTagSystem::VENDOR => &mut model.vendor,
                SecurityTagSystem::SOURCE_ASSIGNING_AUTHORITY => &mut model.authority,
                _ => continue,
            };
            push_unique(bucket, &tag.code);
        }
        if model.authority.is_empty() {
            model.authority = model.owner.clone();
        }
        model
    }

    /// Builds the model from a resource's `meta.security`.
    #[must_use]
    pub fn from_resource(resource: &Resource) -> Self {
        Self::from_tags(&resource.meta.security)
    }

    /// True iff both models share at least one authority code.
    #[must_use]
    pub fn matches_on_authority(&self, other: &Self) -> bool {
        self.authority
            .iter()
            .any(|code| other.authority.iter().any(|o| o == code))
    }

    /// First authority code, used to namespace global ids.
    #[must_use]
    pub fn primary_authority(&self) -> Option<&str> {
        self.authority.first().map(String::as_str)
    }

    #[must_use]
    pub fn has_access_tags(&self) -> bool {
        !self.access.is_empty()
    }

    /// True if an owner or authority code is available (after fallback).
    #[must_use]
    pub fn has_owner_or_authority(&self) -> bool {
        !self.owner.is_empty() || !self.authority.is_empty()
    }
}
