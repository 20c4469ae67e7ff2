//! Delegation chain validation.
//!
//! A submitted [`Delegation`] is checked in a fixed order and the first
//! failing check decides the outcome:
//!
//! 1. the delegator's signature, against the key valid at submission time
//! 2. the delegator actively holds every granted claim
//! 3. every witness signature, against the witness key valid when it signed
//! 4. the parent delegation, when one is named
//! 5. the delegator's acceptance rate over the trailing window
//!
//! Every attempt lands in the audit log. Accepted delegations are inserted
//! into the shared [`DelegationRegistry`].

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use trustgate_crypto::KeyVersionStore;
use trustgate_types::EntityId;

use crate::audit::{AuditEventType, AuditLog, AuditRecord, AuditSink};
use crate::claims::PermissionClaimStore;
use crate::delegation::{Delegation, DelegationRegistry, DelegationStatus};

/// Validator configuration
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Accepted delegations allowed per delegator per window
    pub max_delegations_per_window: usize,
    /// Length of the trailing rate window
    pub rate_window: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_delegations_per_window: 100,
            rate_window: Duration::hours(1),
        }
    }
}

/// Why a delegation was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationRejection {
    Malformed { delegation_id: String, detail: String },
    InvalidSignature { delegator: EntityId },
    MissingPermissions { delegator: EntityId, missing: Vec<String> },
    InvalidWitness { delegation_id: String, witness: EntityId },
    InvalidChain { parent_id: String, detail: String },
    RateLimited { delegator: EntityId },
}

impl fmt::Display for DelegationRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed {
                delegation_id,
                detail,
            } => write!(f, "Malformed delegation {delegation_id}: {detail}"),
            Self::InvalidSignature { delegator } => {
                write!(f, "Invalid delegation signature from {delegator}")
            }
            Self::MissingPermissions { delegator, .. } => {
                write!(f, "Delegator {delegator} lacks permissions being delegated")
            }
            Self::InvalidWitness { delegation_id, .. } => {
                write!(f, "Invalid witness signatures for delegation {delegation_id}")
            }
            Self::InvalidChain { parent_id, detail } => {
                write!(f, "Invalid delegation chain: parent {parent_id}: {detail}")
            }
            Self::RateLimited { delegator } => {
                write!(f, "Delegation rate limit exceeded for {delegator}")
            }
        }
    }
}

/// Result of one validation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub delegation_id: String,
    pub rejection: Option<DelegationRejection>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn reason(&self) -> Option<String> {
        self.rejection.as_ref().map(ToString::to_string)
    }
}

pub struct DelegationValidator {
    config: ValidatorConfig,
    keys: Arc<RwLock<KeyVersionStore>>,
    claims: Arc<RwLock<PermissionClaimStore>>,
    registry: Arc<RwLock<DelegationRegistry>>,
    audit: Mutex<AuditLog>,
    sink: Option<Arc<dyn AuditSink>>,
}

impl DelegationValidator {
    pub fn new(
        config: ValidatorConfig,
        keys: Arc<RwLock<KeyVersionStore>>,
        claims: Arc<RwLock<PermissionClaimStore>>,
    ) -> Self {
        Self {
            config,
            keys,
            claims,
            registry: Arc::new(RwLock::new(DelegationRegistry::new())),
            audit: Mutex::new(AuditLog::new()),
            sink: None,
        }
    }

    /// Also forward every audit row to a durable sink
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> Arc<RwLock<DelegationRegistry>> {
        Arc::clone(&self.registry)
    }

    pub async fn validate(&self, delegation: &Delegation) -> ValidationOutcome {
        self.validate_at(delegation, Utc::now()).await
    }

    pub async fn validate_at(&self, delegation: &Delegation, now: DateTime<Utc>) -> ValidationOutcome {
        let rejection = self.check(delegation, now).await.err();

        match &rejection {
            None => info!(
                delegation = %delegation.id,
                delegator = %delegation.delegator,
                delegatee = %delegation.delegatee,
                "delegation accepted"
            ),
            Some(r) => warn!(delegation = %delegation.id, reason = %r, "delegation rejected"),
        }

        let record = AuditRecord {
            delegation_id: delegation.id.clone(),
            event_type: if rejection.is_none() {
                AuditEventType::ValidationSuccess
            } else {
                AuditEventType::ValidationFailure
            },
            actor: delegation.delegator.clone(),
            event_data: match &rejection {
                None => json!({ "status": "validated" }),
                Some(r) => json!({ "error": r.to_string() }),
            },
            recorded_at: now,
        };
        self.write_audit(record).await;

        ValidationOutcome {
            delegation_id: delegation.id.clone(),
            rejection,
        }
    }

    async fn check(
        &self,
        delegation: &Delegation,
        now: DateTime<Utc>,
    ) -> Result<(), DelegationRejection> {
        let malformed = |detail: String| DelegationRejection::Malformed {
            delegation_id: delegation.id.clone(),
            detail,
        };

        if delegation.valid_until <= delegation.valid_from {
            return Err(malformed("validity window is empty".to_string()));
        }

        {
            let keys = self.keys.read().await;

            let payload = delegation
                .signing_payload()
                .map_err(|e| malformed(e.to_string()))?;
            let signed = delegation.signature.as_ref().is_some_and(|sig| {
                keys.verify_signature(&delegation.delegator, &payload, sig, now)
            });
            if !signed {
                return Err(DelegationRejection::InvalidSignature {
                    delegator: delegation.delegator.clone(),
                });
            }

            let missing = self.claims.read().await.missing(
                &delegation.delegator,
                &delegation.organization,
                &delegation.granted_claims,
            );
            if !missing.is_empty() {
                return Err(DelegationRejection::MissingPermissions {
                    delegator: delegation.delegator.clone(),
                    missing,
                });
            }

            if !delegation.witness_signatures.is_empty() {
                let payload = delegation
                    .witness_payload()
                    .map_err(|e| malformed(e.to_string()))?;
                if let Some(bad) = delegation.witness_signatures.iter().find(|w| {
                    !keys.verify_signature(&w.witness, &payload, &w.signature, w.signed_at)
                }) {
                    return Err(DelegationRejection::InvalidWitness {
                        delegation_id: delegation.id.clone(),
                        witness: bad.witness.clone(),
                    });
                }
            }
        }

        // Chain, rate and insert share one write lock so concurrent
        // submissions cannot overshoot the rate limit.
        let mut registry = self.registry.write().await;

        if let Some(parent_id) = &delegation.parent_id {
            let chain = |detail: String| DelegationRejection::InvalidChain {
                parent_id: parent_id.clone(),
                detail,
            };
            let parent = registry
                .get(parent_id)
                .ok_or_else(|| chain("not found".to_string()))?;
            if parent.status != DelegationStatus::Active {
                return Err(chain("revoked".to_string()));
            }
            if now > parent.delegation.valid_until {
                return Err(chain("expired".to_string()));
            }
            if parent.delegation.delegatee != delegation.delegator {
                return Err(chain(format!(
                    "granted to {}, not {}",
                    parent.delegation.delegatee, delegation.delegator
                )));
            }
            if parent.delegation.organization != delegation.organization {
                return Err(chain(format!(
                    "issued in organization {}",
                    parent.delegation.organization
                )));
            }
            let excess: Vec<&str> = delegation
                .granted_claims
                .difference(&parent.delegation.granted_claims)
                .map(String::as_str)
                .collect();
            if !excess.is_empty() {
                return Err(chain(format!("claims not in parent: {}", excess.join(", "))));
            }
        }

        let since = now - self.config.rate_window;
        if registry.accepted_since(&delegation.delegator, since)
            >= self.config.max_delegations_per_window
        {
            return Err(DelegationRejection::RateLimited {
                delegator: delegation.delegator.clone(),
            });
        }

        registry
            .insert(delegation.clone(), now)
            .map_err(|e| malformed(e.to_string()))
    }

    async fn write_audit(&self, record: AuditRecord) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&record).await {
                warn!(delegation = %record.delegation_id, error = %e, "audit sink append failed");
            }
        }
        self.audit.lock().await.push(record);
    }

    pub async fn audit_records(&self, delegation_id: &str) -> Vec<AuditRecord> {
        self.audit.lock().await.for_delegation(delegation_id)
    }

    pub async fn audit_failures(&self) -> Vec<AuditRecord> {
        self.audit.lock().await.by_type(AuditEventType::ValidationFailure)
    }

    pub async fn audit_len(&self) -> usize {
        self.audit.lock().await.len()
    }
}
