//! Permission claims held by entities within an organization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use trustgate_crypto::sha256_hex;
use trustgate_types::{EntityId, OrganizationId};

/// Stable claim identifier for an action over a resource
pub fn claim_hash(action: &str, resource: &str) -> String {
    sha256_hex(format!("{action}:{resource}").as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Active,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionClaim {
    pub subject: EntityId,
    pub organization: OrganizationId,
    pub claim_hash: String,
    pub status: ClaimStatus,
    pub issued_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// In-memory claim table keyed by (subject, organization)
#[derive(Debug, Default)]
pub struct PermissionClaimStore {
    claims: HashMap<(EntityId, OrganizationId), BTreeMap<String, PermissionClaim>>,
}

impl PermissionClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, subject: &EntityId, organization: &OrganizationId, claim: &str) {
        self.grant_at(subject, organization, claim, Utc::now())
    }

    /// Issue or reactivate a claim
    pub fn grant_at(
        &mut self,
        subject: &EntityId,
        organization: &OrganizationId,
        claim: &str,
        now: DateTime<Utc>,
    ) {
        debug!(subject = %subject, organization = %organization, claim, "granting claim");
        self.claims
            .entry((subject.clone(), organization.clone()))
            .or_default()
            .insert(
                claim.to_string(),
                PermissionClaim {
                    subject: subject.clone(),
                    organization: organization.clone(),
                    claim_hash: claim.to_string(),
                    status: ClaimStatus::Active,
                    issued_at: now,
                    revoked_at: None,
                },
            );
    }

    /// Returns `false` when there was no active claim to revoke
    pub fn revoke(&mut self, subject: &EntityId, organization: &OrganizationId, claim: &str) -> bool {
        let Some(claims) = self.claims.get_mut(&(subject.clone(), organization.clone())) else {
            return false;
        };
        match claims.get_mut(claim) {
            Some(c) if c.status == ClaimStatus::Active => {
                c.status = ClaimStatus::Revoked;
                c.revoked_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    pub fn has_active(&self, subject: &EntityId, organization: &OrganizationId, claim: &str) -> bool {
        self.claims
            .get(&(subject.clone(), organization.clone()))
            .and_then(|claims| claims.get(claim))
            .is_some_and(|c| c.status == ClaimStatus::Active)
    }

    /// Claims from `wanted` the subject does not actively hold, in order
    pub fn missing<'a, I>(
        &self,
        subject: &EntityId,
        organization: &OrganizationId,
        wanted: I,
    ) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        wanted
            .into_iter()
            .filter(|claim| !self.has_active(subject, organization, claim))
            .cloned()
            .collect()
    }

    pub fn active_claims(&self, subject: &EntityId, organization: &OrganizationId) -> Vec<&str> {
        self.claims
            .get(&(subject.clone(), organization.clone()))
            .map(|claims| {
                claims
                    .values()
                    .filter(|c| c.status == ClaimStatus::Active)
                    .map(|c| c.claim_hash.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}
