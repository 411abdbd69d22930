//! Merge engine configuration.
//!
//! Resolved once at startup and injected into [`crate::engine::MergeEngine`].

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("base_version must not be empty")]
    EmptyBaseVersion,

    #[error("base_version '{0}' may only contain letters, digits and '_'")]
    InvalidBaseVersion(String),

    #[error("merge_parallelism must be at least 1")]
    ZeroParallelism,

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Environment keys read by [`MergeConfig::from_lookup`].
pub mod keys {
    pub const BASE_VERSION: &str = "BASE_VERSION";
    pub const MERGE_PARALLELISM: &str = "MERGE_PARALLEL_CHUNK_SIZE";
    pub const REQUIRE_ACCESS_TAGS: &str = "REQUIRE_ACCESS_TAGS";
    pub const REQUIRE_META_SOURCE: &str = "REQUIRE_META_SOURCE_TAGS";
    pub const AUTH_ENABLED: &str = "AUTH_ENABLED";
}

/// Merge engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConfig {
    /// Version selector used when a request does not name one.
    pub base_version: String,
    /// Maximum number of merge groups processed concurrently.
    pub merge_parallelism: usize,
    /// Reject resources without an access tag.
    pub require_access_tags: bool,
    /// Reject new resources without `meta.source`.
    pub require_meta_source: bool,
    /// When false, scope checks allow everything.
    pub auth_enabled: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            base_version: "4_0_0".to_string(),
            merge_parallelism: 10,
            require_access_tags: false,
            require_meta_source: false,
            auth_enabled: true,
        }
    }
}

/// Validates a base version selector.
pub fn validate_base_version(base_version: &str) -> Result<(), ConfigError> {
    if base_version.is_empty() {
        return Err(ConfigError::EmptyBaseVersion);
    }
    if !base_version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ConfigError::InvalidBaseVersion(base_version.to_string()));
    }
    Ok(())
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

impl MergeConfig {
    /// Checks the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_base_version(&self.base_version)?;
        if self.merge_parallelism == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        Ok(())
    }

    /// Resolves the configuration from a key lookup, falling back to defaults
    /// for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(keys::BASE_VERSION) {
            config.base_version = v.trim().to_string();
        }
        if let Some(v) = lookup(keys::MERGE_PARALLELISM) {
            config.merge_parallelism =
                v.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: keys::MERGE_PARALLELISM,
                        value: v.clone(),
                    })?;
        }
        if let Some(v) = lookup(keys::REQUIRE_ACCESS_TAGS) {
            config.require_access_tags = parse_bool(keys::REQUIRE_ACCESS_TAGS, &v)?;
        }
        if let Some(v) = lookup(keys::REQUIRE_META_SOURCE) {
            config.require_meta_source = parse_bool(keys::REQUIRE_META_SOURCE, &v)?;
        }
        if let Some(v) = lookup(keys::AUTH_ENABLED) {
            config.auth_enabled = parse_bool(keys::AUTH_ENABLED, &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Resolves the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}
