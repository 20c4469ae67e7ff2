//! Accountability layer: adjudicated misbehavior becomes durable constraints.
//!
//! Events are append-only. A constraint never expires destructively; whether
//! it still binds is decided at read time by [`Constraint::is_active`], so
//! past events stay queryable after their effect lapses.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock as StdRwLock};
use tokio::sync::RwLock;
use tracing::{error, warn};
use trustgate_crypto::sha256_hex;
use trustgate_trust::{DeltaFields, ReputationEngine, T3Tensor, TrustUpdateBatcher, V3Tensor};
use trustgate_types::{EntityId, OrganizationId, TrustLevel};
use uuid::Uuid;

use crate::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    RateLimit,
    MaxTransactionValue,
    Quarantine,
    ActionBlock,
    SupervisionRequired,
}

/// An operational limit installed by an accountability event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub constraint_type: ConstraintType,
    /// Limit for `rate_limit` (actions per window) and `max_transaction_value`
    pub value: Option<f64>,
    /// `None` means permanent
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
}

impl Constraint {
    pub fn new(constraint_type: ConstraintType, reason: impl Into<String>) -> Self {
        Self {
            constraint_type,
            value: None,
            expires_at: None,
            reason: reason.into(),
        }
    }

    pub fn quarantine(until: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self::new(ConstraintType::Quarantine, reason).with_expiry(until)
    }

    pub fn max_transaction_value(limit: f64, reason: impl Into<String>) -> Self {
        Self::new(ConstraintType::MaxTransactionValue, reason).with_value(limit)
    }

    pub fn rate_limit(max_actions: u32, reason: impl Into<String>) -> Self {
        Self::new(ConstraintType::RateLimit, reason).with_value(f64::from(max_actions))
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expiry| now < expiry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountabilityEventType {
    FraudAttempt,
    ConfirmedFraud,
    PolicyViolation,
    SecurityIncident,
}

impl fmt::Display for AccountabilityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FraudAttempt => "fraud_attempt",
            Self::ConfirmedFraud => "confirmed_fraud",
            Self::PolicyViolation => "policy_violation",
            Self::SecurityIncident => "security_incident",
        };
        f.write_str(s)
    }
}

/// Trust state of a profile at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustSnapshot {
    pub t3: T3Tensor,
    pub v3: V3Tensor,
    pub trust_score: f64,
    pub trust_level: TrustLevel,
}

impl TrustSnapshot {
    fn of(engine: &ReputationEngine, entity: &EntityId, role: &str) -> Self {
        let (t3, v3) = engine
            .profile(entity, role)
            .map(|p| (p.t3, p.v3))
            .unwrap_or_default();
        let trust_score = t3.average();
        Self {
            t3,
            v3,
            trust_score,
            trust_level: TrustLevel::from_score(trust_score),
        }
    }
}

/// Immutable record of an adjudicated incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountabilityEvent {
    pub id: String,
    pub entity: EntityId,
    pub role: String,
    pub event_type: AccountabilityEventType,
    pub evidence_refs: Vec<String>,
    pub adjudicator: EntityId,
    pub description: String,
    pub trust_before: TrustSnapshot,
    pub trust_after: TrustSnapshot,
    pub constraints: Vec<Constraint>,
    pub recorded_at: DateTime<Utc>,
}

impl AccountabilityEvent {
    pub fn trust_delta(&self) -> f64 {
        self.trust_after.trust_score - self.trust_before.trust_score
    }

    pub fn active_constraints(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(move |c| c.is_active(now))
    }
}

fn event_id(entity: &EntityId, event_type: AccountabilityEventType, at: DateTime<Utc>) -> String {
    let digest = sha256_hex(
        format!("{entity}:{event_type}:{}:{}", at.to_rfc3339(), Uuid::new_v4()).as_bytes(),
    );
    format!("wal:{}", &digest[..16])
}

/// Adjudicated misbehavior to be recorded
#[derive(Debug, Clone)]
pub struct MisbehaviorReport {
    pub entity: EntityId,
    pub role: String,
    /// Ledger row the penalty is written to
    pub organization: Option<OrganizationId>,
    pub event_type: AccountabilityEventType,
    pub evidence_refs: Vec<String>,
    pub adjudicator: EntityId,
    pub description: String,
    pub constraints: Vec<Constraint>,
}

impl MisbehaviorReport {
    pub fn new(entity: EntityId, role: impl Into<String>, adjudicator: EntityId) -> Self {
        Self {
            entity,
            role: role.into(),
            organization: None,
            event_type: AccountabilityEventType::ConfirmedFraud,
            evidence_refs: Vec::new(),
            adjudicator,
            description: String::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_organization(mut self, organization: OrganizationId) -> Self {
        self.organization = Some(organization);
        self
    }

    pub fn with_event_type(mut self, event_type: AccountabilityEventType) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn with_evidence(mut self, evidence_ref: impl Into<String>) -> Self {
        self.evidence_refs.push(evidence_ref.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Durable append-only event log
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountabilityStore: Send + Sync {
    async fn append(&self, event: &AccountabilityEvent) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct AccountabilityConfig {
    /// Drop applied to every T3 component and veracity per incident
    pub penalty_magnitude: f64,
    /// Window over which `rate_limit` constraints count actions
    pub rate_limit_window: Duration,
}

impl Default for AccountabilityConfig {
    fn default() -> Self {
        Self {
            penalty_magnitude: 0.5,
            rate_limit_window: Duration::hours(1),
        }
    }
}

/// Outcome of [`AccountabilityLayer::check_allowed`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDecision {
    pub allowed: bool,
    pub reason: String,
    /// Allowed only under supervision
    pub supervised: bool,
}

impl ConstraintDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            supervised: false,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            supervised: false,
        }
    }
}

pub struct AccountabilityLayer {
    config: AccountabilityConfig,
    engine: Arc<RwLock<ReputationEngine>>,
    events: StdRwLock<Vec<AccountabilityEvent>>,
    recent_actions: Mutex<HashMap<EntityId, VecDeque<DateTime<Utc>>>>,
    store: Option<Arc<dyn AccountabilityStore>>,
    batcher: Option<Arc<TrustUpdateBatcher>>,
}

impl AccountabilityLayer {
    pub fn new(config: AccountabilityConfig, engine: Arc<RwLock<ReputationEngine>>) -> Self {
        Self {
            config,
            engine,
            events: StdRwLock::new(Vec::new()),
            recent_actions: Mutex::new(HashMap::new()),
            store: None,
            batcher: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn AccountabilityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Route penalties through the trust ledger batcher
    ///
    /// Reports must then name an organization.
    pub fn with_batcher(mut self, batcher: Arc<TrustUpdateBatcher>) -> Self {
        self.batcher = Some(batcher);
        self
    }

    fn read_events(&self) -> std::sync::RwLockReadGuard<'_, Vec<AccountabilityEvent>> {
        self.events.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_actions(&self) -> MutexGuard<'_, HashMap<EntityId, VecDeque<DateTime<Utc>>>> {
        self.recent_actions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn record_confirmed_misbehavior(
        &self,
        report: MisbehaviorReport,
    ) -> Result<AccountabilityEvent> {
        self.record_confirmed_misbehavior_at(report, Utc::now()).await
    }

    /// Penalize, install constraints and persist the event
    ///
    /// The penalty is queued on the ledger batcher, when one is attached,
    /// without regard to its rate or pending limits. The event and its
    /// constraints take effect in memory before the store is called; a
    /// persistence failure is returned but does not lift them.
    pub async fn record_confirmed_misbehavior_at(
        &self,
        report: MisbehaviorReport,
        now: DateTime<Utc>,
    ) -> Result<AccountabilityEvent> {
        let ledger = match (&self.batcher, &report.organization) {
            (Some(batcher), Some(organization)) => Some((batcher, organization)),
            (Some(_), None) => {
                return Err(CoreError::Config(format!(
                    "misbehavior report for {} names no organization",
                    report.entity
                )))
            }
            (None, _) => None,
        };

        let (trust_before, trust_after) = {
            let mut engine = self.engine.write().await;
            let before = TrustSnapshot::of(&engine, &report.entity, &report.role);
            let penalty = engine.penalize_at(
                &report.entity,
                &report.role,
                self.config.penalty_magnitude,
                format!("{}: {}", report.event_type, report.description),
                &report.adjudicator,
                now,
            );
            if let Some((batcher, organization)) = ledger {
                batcher.record_adjudicated_at(
                    &report.entity,
                    organization,
                    DeltaFields::from(&penalty),
                    now,
                );
            }
            (before, TrustSnapshot::of(&engine, &report.entity, &report.role))
        };

        let event = AccountabilityEvent {
            id: event_id(&report.entity, report.event_type, now),
            entity: report.entity,
            role: report.role,
            event_type: report.event_type,
            evidence_refs: report.evidence_refs,
            adjudicator: report.adjudicator,
            description: report.description,
            trust_before,
            trust_after,
            constraints: report.constraints,
            recorded_at: now,
        };

        warn!(
            event = %event.id,
            entity = %event.entity,
            event_type = %event.event_type,
            constraints = event.constraints.len(),
            trust_delta = event.trust_delta(),
            "recorded accountability event"
        );

        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());

        if let Some(store) = &self.store {
            if let Err(e) = store.append(&event).await {
                error!(event = %event.id, error = %e, "failed to persist accountability event");
                return Err(CoreError::Persistence(format!("event {}: {e}", event.id)));
            }
        }
        Ok(event)
    }

    pub fn check_allowed(
        &self,
        entity: &EntityId,
        action_type: &str,
        value: Option<f64>,
    ) -> ConstraintDecision {
        self.check_allowed_at(entity, action_type, value, Utc::now())
    }

    /// Gate an action against the entity's active constraints
    ///
    /// Allowed actions count toward any active `rate_limit`.
    pub fn check_allowed_at(
        &self,
        entity: &EntityId,
        action_type: &str,
        value: Option<f64>,
        now: DateTime<Utc>,
    ) -> ConstraintDecision {
        self.check(entity, action_type, value, now, true)
    }

    /// Same gate as [`check_allowed_at`](Self::check_allowed_at) without
    /// counting the action; pair with [`note_action_at`](Self::note_action_at)
    /// once the action actually goes ahead.
    pub fn check_constraints_at(
        &self,
        entity: &EntityId,
        action_type: &str,
        value: Option<f64>,
        now: DateTime<Utc>,
    ) -> ConstraintDecision {
        self.check(entity, action_type, value, now, false)
    }

    /// Count a performed action toward the entity's active `rate_limit`
    pub fn note_action_at(&self, entity: &EntityId, now: DateTime<Utc>) {
        let limited = self
            .active_constraints_at(entity, now)
            .iter()
            .any(|c| c.constraint_type == ConstraintType::RateLimit);
        if limited {
            self.lock_actions().entry(entity.clone()).or_default().push_back(now);
        }
    }

    fn check(
        &self,
        entity: &EntityId,
        action_type: &str,
        value: Option<f64>,
        now: DateTime<Utc>,
        count: bool,
    ) -> ConstraintDecision {
        let active = self.active_constraints_at(entity, now);
        if active.is_empty() {
            return ConstraintDecision::allow("No active constraints");
        }

        let decision = self.evaluate(entity, &active, value, now, count);
        if !decision.allowed {
            warn!(entity = %entity, action_type, reason = %decision.reason, "action denied by constraint");
        }
        decision
    }

    fn evaluate(
        &self,
        entity: &EntityId,
        active: &[Constraint],
        value: Option<f64>,
        now: DateTime<Utc>,
        count: bool,
    ) -> ConstraintDecision {
        let of_type = |t: ConstraintType| active.iter().filter(move |c| c.constraint_type == t);

        if let Some(c) = of_type(ConstraintType::Quarantine).next() {
            let until = c
                .expires_at
                .map_or_else(|| "further notice".to_string(), |t| t.to_rfc3339());
            return ConstraintDecision::deny(format!("Entity quarantined until {until}: {}", c.reason));
        }

        if let Some(c) = of_type(ConstraintType::ActionBlock).next() {
            return ConstraintDecision::deny(format!("Action blocked: {}", c.reason));
        }

        if let Some(value) = value {
            for c in of_type(ConstraintType::MaxTransactionValue) {
                if let Some(limit) = c.value.filter(|limit| value > *limit) {
                    return ConstraintDecision::deny(format!(
                        "Transaction value ${value:.2} exceeds limit ${limit:.2}: per-transaction limit exceeded"
                    ));
                }
            }
        }

        let tightest_rate = of_type(ConstraintType::RateLimit)
            .filter_map(|c| c.value)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))));
        if let Some(limit) = tightest_rate {
            let mut actions = self.lock_actions();
            let window = actions.entry(entity.clone()).or_default();
            let horizon = now - self.config.rate_limit_window;
            while window.front().is_some_and(|t| *t <= horizon) {
                window.pop_front();
            }
            if window.len() as f64 >= limit {
                return ConstraintDecision::deny(format!(
                    "Rate limit exceeded: {limit} actions per {} minutes",
                    self.config.rate_limit_window.num_minutes()
                ));
            }
            if count {
                window.push_back(now);
            }
        }

        if let Some(c) = of_type(ConstraintType::SupervisionRequired).next() {
            return ConstraintDecision {
                allowed: true,
                reason: format!("Action allowed under supervision: {}", c.reason),
                supervised: true,
            };
        }

        ConstraintDecision::allow("Action allowed")
    }

    pub fn active_constraints_at(&self, entity: &EntityId, now: DateTime<Utc>) -> Vec<Constraint> {
        self.read_events()
            .iter()
            .filter(|e| &e.entity == entity)
            .flat_map(|e| e.active_constraints(now).cloned())
            .collect()
    }

    pub fn events_for(&self, entity: &EntityId) -> Vec<AccountabilityEvent> {
        self.read_events()
            .iter()
            .filter(|e| &e.entity == entity)
            .cloned()
            .collect()
    }

    pub fn events_of_type(&self, event_type: AccountabilityEventType) -> Vec<AccountabilityEvent> {
        self.read_events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn event(&self, id: &str) -> Option<AccountabilityEvent> {
        self.read_events().iter().find(|e| e.id == id).cloned()
    }
}
