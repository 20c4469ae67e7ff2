//! Append-only audit trail of delegation validation attempts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trustgate_types::EntityId;

use crate::error::VerifyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ValidationSuccess,
    ValidationFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub delegation_id: String,
    pub event_type: AuditEventType,
    pub actor: EntityId,
    pub event_data: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Durable destination for audit rows
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), VerifyError>;
}

#[derive(Debug, Default)]
pub struct AuditLog {
    records: Vec<AuditRecord>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: AuditRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    pub fn for_delegation(&self, delegation_id: &str) -> Vec<AuditRecord> {
        self.records
            .iter()
            .filter(|r| r.delegation_id == delegation_id)
            .cloned()
            .collect()
    }

    pub fn by_type(&self, event_type: AuditEventType) -> Vec<AuditRecord> {
        self.records
            .iter()
            .filter(|r| r.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
