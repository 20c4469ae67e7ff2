//! Durable trust ledger seam.
//!
//! The batcher hands a whole flush to [`TrustLedgerStore::commit_batch`];
//! implementations must apply every row or none.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use trustgate_types::{EntityId, OrganizationId};

use crate::error::StoreError;
use crate::score::{T3Tensor, V3Tensor};

/// One aggregated row of a flush, also the Merkle leaf payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerUpdate {
    pub entity: EntityId,
    pub organization: OrganizationId,
    pub talent: f64,
    pub training: f64,
    pub temperament: f64,
    pub veracity: f64,
    pub validity: f64,
    pub value: f64,
    pub action_count: u32,
    pub transaction_count: u32,
    pub flushed_at: DateTime<Utc>,
}

/// Persisted trust state for one (entity, organization)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub t3: T3Tensor,
    pub v3: V3Tensor,
    pub total_actions: u64,
    pub total_transactions: u64,
    pub last_updated: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrustLedgerStore: Send + Sync {
    /// Upsert every update in a single all-or-nothing transaction
    async fn commit_batch(&self, updates: &[LedgerUpdate]) -> Result<(), StoreError>;
}

/// In-process ledger used by tests and the demo
#[derive(Debug, Default)]
pub struct InMemoryTrustLedger {
    rows: Mutex<HashMap<(EntityId, OrganizationId), LedgerRow>>,
}

impl InMemoryTrustLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(&self, entity: &EntityId, organization: &OrganizationId) -> Option<LedgerRow> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.get(&(entity.clone(), organization.clone())).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TrustLedgerStore for InMemoryTrustLedger {
    async fn commit_batch(&self, updates: &[LedgerUpdate]) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());

        // Stage into a copy so a bad row leaves the ledger untouched
        let mut staged = rows.clone();
        for update in updates {
            if !update.talent.is_finite() || !update.value.is_finite() {
                return Err(StoreError(format!(
                    "non-finite delta for {}:{}",
                    update.entity, update.organization
                )));
            }
            let row = staged
                .entry((update.entity.clone(), update.organization.clone()))
                .or_insert_with(|| LedgerRow {
                    t3: T3Tensor::default(),
                    v3: V3Tensor::default(),
                    total_actions: 0,
                    total_transactions: 0,
                    last_updated: update.flushed_at,
                });
            row.t3.apply(update.talent, update.training, update.temperament);
            row.v3.apply(update.veracity, update.validity, update.value);
            row.total_actions += u64::from(update.action_count);
            row.total_transactions += u64::from(update.transaction_count);
            row.last_updated = update.flushed_at;
        }
        *rows = staged;
        Ok(())
    }
}
