//! Merge engine.
//!
//! Reconciles submitted resources against stored state. A request is split
//! into groups by business id; groups run concurrently on a bounded worker
//! pool while resources sharing an id run in submission order. Every merge
//! decision is taken before any write is issued, then the request's bulk
//! writer persists all primary and history documents in one pass.

mod batch;
mod precheck;
mod write_path;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collaborators::{
    AuditSink, BasicSchemaValidator, CallerContext, NoopAuditSink, SchemaValidator, ScopeChecker,
    SmartScopeChecker,
};
use crate::config::{validate_base_version, MergeConfig};
use crate::error::{MergeResult, ValidationError};
use crate::outcome::MergeResultEntry;
use crate::presave::PreSavePipeline;
use crate::resource::ResourceTypeRegistry;
use crate::storage::{CollectionRegistry, DocumentStore};

/// A merge request.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    /// A single resource object or an array of resource objects.
    pub resources: Value,
    /// Version selector; the configured base version when `None`.
    pub base_version: Option<String>,
    pub caller: CallerContext,
}

impl MergeRequest {
    #[must_use]
    pub fn new(resources: Value, caller: CallerContext) -> Self {
        Self {
            resources,
            base_version: None,
            caller,
        }
    }

    #[must_use]
    pub fn with_base_version(mut self, base_version: impl Into<String>) -> Self {
        self.base_version = Some(base_version.into());
        self
    }
}

/// One entry per submitted resource, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResponse {
    pub entries: Vec<MergeResultEntry>,
}

impl MergeResponse {
    /// Number of entries that report a failure.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_failure()).count()
    }
}

/// Resource merge engine.
#[derive(Clone)]
pub struct MergeEngine {
    registry: Arc<CollectionRegistry>,
    config: MergeConfig,
    types: ResourceTypeRegistry,
    validator: Arc<dyn SchemaValidator>,
    scopes: Arc<dyn ScopeChecker>,
    audit: Arc<dyn AuditSink>,
    pipeline: Arc<PreSavePipeline>,
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl MergeEngine {
    /// Creates an engine over `store` with the default collaborators.
    ///
    /// # Errors
    /// `Config` if `config` does not validate.
    pub fn new(store: Arc<dyn DocumentStore>, config: MergeConfig) -> MergeResult<Self> {
        Self::with_registry(Arc::new(CollectionRegistry::open(store)), config)
    }

    /// Creates an engine over an existing collection registry.
    pub fn with_registry(registry: Arc<CollectionRegistry>, config: MergeConfig) -> MergeResult<Self> {
        config.validate()?;
        let types = ResourceTypeRegistry::default();
        Ok(Self {
            registry,
            validator: Arc::new(BasicSchemaValidator::new(types.clone())),
            scopes: Arc::new(SmartScopeChecker::new(config.auth_enabled)),
            audit: Arc::new(NoopAuditSink),
            pipeline: Arc::new(PreSavePipeline::standard()),
            types,
            config,
        })
    }

    /// Replaces the accepted resource types.
    ///
    /// Also resets the schema validator to a [`BasicSchemaValidator`] over the
    /// new registry; install a custom validator afterwards.
    #[must_use]
    pub fn with_resource_types(mut self, types: ResourceTypeRegistry) -> Self {
        self.validator = Arc::new(BasicSchemaValidator::new(types.clone()));
        self.types = types;
        self
    }

    #[must_use]
    pub fn with_schema_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn with_scope_checker(mut self, scopes: Arc<dyn ScopeChecker>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PreSavePipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    #[must_use]
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn resource_types(&self) -> &ResourceTypeRegistry {
        &self.types
    }

    /// Merges the submitted resources.
    ///
    /// Per-resource problems never fail the call; they are reported in the
    /// resource's entry. The call itself fails only for a malformed request
    /// (neither an object nor an array, or a bad version selector).
    pub fn merge(&self, request: MergeRequest) -> MergeResult<MergeResponse> {
        let base_version = request
            .base_version
            .unwrap_or_else(|| self.config.base_version.clone());
        validate_base_version(&base_version).map_err(|_| ValidationError::InvalidBaseVersion {
            value: base_version.clone(),
        })?;

        let items = match request.resources {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            other => {
                return Err(ValidationError::MalformedResource {
                    reason: format!("expected a resource or an array of resources, got {other}"),
                }
                .into())
            }
        };

        let entries = batch::run(self, &items, &base_version, &request.caller)?;
        Ok(MergeResponse { entries })
    }
}
