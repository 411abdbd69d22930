//! Resource documents and the resource type registry.
//!
//! A [`Resource`] is a typed envelope around an arbitrary JSON document: the
//! fields the write path depends on (`resourceType`, `id`, the derived global id
//! and `meta`) are typed, everything else is carried verbatim in `fields`.

use std::collections::BTreeSet;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{MergeError, MergeResult, ValidationError};
use crate::tags::SecurityTag;

/// Wire name of the internal row identifier assigned by the store.
pub const ROW_ID_FIELD: &str = "_id";

/// Wire name of the derived global id.
pub const GLOBAL_ID_FIELD: &str = "_uuid";

/// Resource metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// Monotonically increasing integer, serialized as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// Upstream system that sent the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security: Vec<SecurityTag>,

    /// Any other meta members (profile, tag, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    /// Parses `versionId` as an integer.
    pub fn version_number(&self) -> MergeResult<u64> {
        let raw = self
            .version_id
            .as_deref()
            .ok_or_else(|| MergeError::internal("stored resource has no versionId"))?;
        raw.parse::<u64>()
            .map_err(|_| MergeError::internal(format!("stored versionId '{raw}' is not an integer")))
    }
}

/// A typed resource document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_type: String,

    /// Source-local business id.
    pub id: String,

    /// Global id derived from `(id, primary authority)`.
    #[serde(rename = "_uuid", default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,

    /// Internal row identifier assigned by the store.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,

    #[serde(default)]
    pub meta: Meta,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Resource {
    /// Creates an empty resource of the given type.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            uuid: None,
            row_id: None,
            meta: Meta::default(),
            fields: Map::new(),
        }
    }

    /// Adds a security tag.
    #[must_use]
    pub fn with_tag(mut self, tag: SecurityTag) -> Self {
        self.meta.security.push(tag);
        self
    }

    /// Sets a body field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Parses a raw JSON document.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::MalformedResource {
            reason: e.to_string(),
        })
    }

    /// Serializes to a JSON document.
    pub fn to_value(&self) -> MergeResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| MergeError::internal(format!("failed to serialize resource: {e}")))
    }

    /// `Type/id`, used in diagnostics.
    #[must_use]
    pub fn reference_key(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

/// Current time truncated to whole seconds, the precision `lastUpdated` is stored with.
#[must_use]
pub fn now_truncated() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Removes null object members and null array items recursively.
#[must_use]
pub fn normalize_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, normalize_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(normalize_nulls)
                .collect(),
        ),
        other => other,
    }
}

/// FHIR R4 resource types hosted by the store.
const R4_RESOURCE_TYPES: &[&str] = &[
    "Account",
    "AllergyIntolerance",
    "Appointment",
    "AuditEvent",
    "Binary",
    "CarePlan",
    "CareTeam",
    "Claim",
    "ClaimResponse",
    "Communication",
    "Composition",
    "Condition",
    "Consent",
    "Coverage",
    "Device",
    "DiagnosticReport",
    "DocumentReference",
    "Encounter",
    "ExplanationOfBenefit",
    "FamilyMemberHistory",
    "Goal",
    "Group",
    "HealthcareService",
    "Immunization",
    "InsurancePlan",
    "Location",
    "Medication",
    "MedicationAdministration",
    "MedicationDispense",
    "MedicationRequest",
    "MedicationStatement",
    "Observation",
    "Organization",
    "Patient",
    "Person",
    "Practitioner",
    "PractitionerRole",
    "Procedure",
    "Provenance",
    "Questionnaire",
    "QuestionnaireResponse",
    "RelatedPerson",
    "ServiceRequest",
    "Specimen",
    "Task",
    "ValueSet",
];

/// Closed registry of resource types the store accepts.
///
/// Built once at startup and only read afterwards; each registered type gets
/// its own primary and history collection.
#[derive(Debug, Clone)]
pub struct ResourceTypeRegistry {
    types: BTreeSet<String>,
}

impl Default for ResourceTypeRegistry {
    fn default() -> Self {
        Self::r4()
    }
}

impl ResourceTypeRegistry {
    /// Registry of the FHIR R4 types hosted by the store.
    #[must_use]
    pub fn r4() -> Self {
        Self::with_types(R4_RESOURCE_TYPES.iter().copied())
    }

    /// Registry of an explicit set of types.
    #[must_use]
    pub fn with_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, resource_type: &str) -> bool {
        self.types.contains(resource_type)
    }

    /// Resolves a type name, failing for unregistered types.
    pub fn resolve(&self, resource_type: &str) -> Result<&str, ValidationError> {
        self.types
            .get(resource_type)
            .map(String::as_str)
            .ok_or_else(|| ValidationError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(String::as_str)
    }
}
