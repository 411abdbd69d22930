//! Best-effort audit recording.

use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;

/// Audit sink failures. The engine logs these and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Something worth recording about a merge request.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    /// Resources of one type were created.
    Created {
        resource_type: String,
        ids: Vec<String>,
        request_id: Option<String>,
    },
    /// Resources of one type were updated.
    Updated {
        resource_type: String,
        ids: Vec<String>,
        request_id: Option<String>,
    },
    /// A resource was rejected; carries the submitted payload.
    Rejected {
        resource: Value,
        diagnostics: String,
        request_id: Option<String>,
    },
}

/// Receives audit events. Delivery is fire-and-forget.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    pub fn events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        self.events
            .lock()
            .map(|events| events.clone())
            .map_err(|_| AuditError::Unavailable("poisoned lock: events".to_string()))
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::Unavailable("poisoned lock: events".to_string()))?
            .push(event);
        Ok(())
    }
}
