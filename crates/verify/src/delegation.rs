//! Delegation records and the registry of accepted delegations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};
use trustgate_crypto::{canonical_bytes, Signature};
use trustgate_types::{EntityId, OrganizationId};

use crate::error::VerifyError;
use crate::Result;

/// A witness countersignature over the delegation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WitnessSignature {
    pub witness: EntityId,
    pub signature: Signature,
    pub signed_at: DateTime<Utc>,
}

/// A signed grant of claims from delegator to delegatee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: String,
    pub delegator: EntityId,
    pub delegatee: EntityId,
    pub organization: OrganizationId,
    pub granted_claims: BTreeSet<String>,
    pub atp_budget: u64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub signature: Option<Signature>,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub witness_signatures: Vec<WitnessSignature>,
}

impl Delegation {
    /// Create an unsigned delegation valid from `valid_from` for `duration`
    pub fn new<I, S>(
        id: impl Into<String>,
        delegator: EntityId,
        delegatee: EntityId,
        organization: OrganizationId,
        granted_claims: I,
        valid_from: DateTime<Utc>,
        duration: Duration,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            delegator,
            delegatee,
            organization,
            granted_claims: granted_claims.into_iter().map(Into::into).collect(),
            atp_budget: 0,
            valid_from,
            valid_until: valid_from + duration,
            signature: None,
            parent_id: None,
            witness_signatures: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_budget(mut self, atp_budget: u64) -> Self {
        self.atp_budget = atp_budget;
        self
    }

    pub fn with_witness(mut self, witness: WitnessSignature) -> Self {
        self.witness_signatures.push(witness);
        self
    }

    pub fn signed(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Canonical bytes the delegator signs
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let payload = json!({
            "delegation_id": self.id,
            "delegator": self.delegator,
            "delegatee": self.delegatee,
            "organization_id": self.organization,
            "granted_claims": self.granted_claims,
        });
        Ok(canonical_bytes(&payload)?)
    }

    /// Canonical bytes a witness signs
    pub fn witness_payload(&self) -> Result<Vec<u8>> {
        Ok(canonical_bytes(&json!({ "delegation_id": self.id }))?)
    }

    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    Active,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub delegation: Delegation,
    pub status: DelegationStatus,
    pub accepted_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub atp_consumed: u64,
}

impl DelegationRecord {
    pub fn remaining_budget(&self) -> u64 {
        self.delegation.atp_budget.saturating_sub(self.atp_consumed)
    }
}

/// Accepted delegations indexed by id
///
/// Revoking a delegation does not touch its children. Whether a child is
/// still in effect is decided when it is used, by walking its parents.
#[derive(Debug, Default)]
pub struct DelegationRegistry {
    records: HashMap<String, DelegationRecord>,
}

impl DelegationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, delegation: Delegation, accepted_at: DateTime<Utc>) -> Result<()> {
        if self.records.contains_key(&delegation.id) {
            return Err(VerifyError::DuplicateDelegation(delegation.id));
        }
        self.records.insert(
            delegation.id.clone(),
            DelegationRecord {
                delegation,
                status: DelegationStatus::Active,
                accepted_at,
                revoked_at: None,
                atp_consumed: 0,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&DelegationRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of delegations accepted from `delegator` after `since`
    pub fn accepted_since(&self, delegator: &EntityId, since: DateTime<Utc>) -> usize {
        self.records
            .values()
            .filter(|r| &r.delegation.delegator == delegator && r.accepted_at > since)
            .count()
    }

    pub fn revoke(&mut self, id: &str) -> Result<()> {
        self.revoke_at(id, Utc::now())
    }

    pub fn revoke_at(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| VerifyError::DelegationNotFound(id.to_string()))?;
        if record.status == DelegationStatus::Revoked {
            return Ok(());
        }
        record.status = DelegationStatus::Revoked;
        record.revoked_at = Some(now);
        warn!(delegation = id, "revoked delegation");
        Ok(())
    }

    /// The record for `id` if it and every ancestor are active and in window
    pub fn effective_at(&self, id: &str, now: DateTime<Utc>) -> Result<&DelegationRecord> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| VerifyError::DelegationNotFound(id.to_string()))?;

        let mut seen = HashSet::new();
        let mut current = Some(record);
        while let Some(r) = current {
            let current_id = r.delegation.id.as_str();
            if !seen.insert(current_id) {
                return Err(inactive(id, format!("cycle at {current_id}")));
            }
            if r.status == DelegationStatus::Revoked {
                return Err(inactive(id, format!("{current_id} is revoked")));
            }
            if !r.delegation.is_within_window(now) {
                return Err(inactive(id, format!("{current_id} is outside its validity window")));
            }
            current = match &r.delegation.parent_id {
                Some(parent) => Some(self.records.get(parent).ok_or_else(|| {
                    inactive(id, format!("parent {parent} not found"))
                })?),
                None => None,
            };
        }
        Ok(record)
    }

    /// Spend ATP from an effective delegation, returning what remains
    pub fn consume_budget_at(&mut self, id: &str, amount: u64, now: DateTime<Utc>) -> Result<u64> {
        let remaining = self.effective_at(id, now)?.remaining_budget();
        if amount > remaining {
            return Err(VerifyError::BudgetExceeded {
                id: id.to_string(),
                requested: amount,
                remaining,
            });
        }

        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| VerifyError::DelegationNotFound(id.to_string()))?;
        record.atp_consumed += amount;
        info!(delegation = id, amount, remaining = remaining - amount, "consumed budget");
        Ok(remaining - amount)
    }

    pub fn consume_budget(&mut self, id: &str, amount: u64) -> Result<u64> {
        self.consume_budget_at(id, amount, Utc::now())
    }
}

fn inactive(id: &str, reason: String) -> VerifyError {
    VerifyError::DelegationInactive {
        id: id.to_string(),
        reason,
    }
}
