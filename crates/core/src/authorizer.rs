//! Authorization facade tying the engine components together.
//!
//! A request passes the accountability gate, then the resource patterns of
//! its delegation, then the delegation's effectiveness and ATP budget.
//! Finished actions flow back through [`Authorizer::record_outcome`] into the
//! reputation engine and the write-behind batcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use trustgate_crypto::{KeyVersion, KeyVersionStore, PrivateKey};
use trustgate_trust::{
    ActionOutcome, BatcherHandle, DeltaFields, JitterSchedule, ReputationDelta, ReputationEngine,
    TrustLedgerStore, TrustUpdateBatcher,
};
use trustgate_types::{EntityId, OrganizationId};
use trustgate_verify::{
    Delegation, DelegationRegistry, DelegationValidator, PermissionClaimStore, PermissionLevel,
    ResourceMatcher, ValidationOutcome,
};

use crate::accountability::AccountabilityLayer;
use crate::config::EngineConfig;
use crate::Result;

/// An entity asking to act on a resource under a delegation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub entity: EntityId,
    pub delegation_id: String,
    pub action_type: String,
    pub resource: String,
    pub required: PermissionLevel,
    /// Transaction value checked against value caps
    pub value: Option<f64>,
    /// ATP spent from the delegation budget when allowed
    #[serde(default)]
    pub atp_cost: u64,
}

impl AuthorizationRequest {
    pub fn new(
        entity: EntityId,
        delegation_id: impl Into<String>,
        action_type: impl Into<String>,
        resource: impl Into<String>,
        required: PermissionLevel,
    ) -> Self {
        Self {
            entity,
            delegation_id: delegation_id.into(),
            action_type: action_type.into(),
            resource: resource.into(),
            required,
            value: None,
            atp_cost: 0,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_cost(mut self, atp_cost: u64) -> Self {
        self.atp_cost = atp_cost;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    pub reason: String,
    pub supervised: bool,
    /// Budget left on the delegation after an allowed request
    pub remaining_budget: Option<u64>,
}

impl AuthorizationDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            supervised: false,
            remaining_budget: None,
        }
    }
}

pub struct Authorizer {
    config: EngineConfig,
    keys: Arc<RwLock<KeyVersionStore>>,
    claims: Arc<RwLock<PermissionClaimStore>>,
    validator: DelegationValidator,
    registry: Arc<RwLock<DelegationRegistry>>,
    resources: RwLock<HashMap<String, ResourceMatcher>>,
    engine: Arc<RwLock<ReputationEngine>>,
    accountability: AccountabilityLayer,
    batcher: Arc<TrustUpdateBatcher>,
}

impl Authorizer {
    pub fn new(config: EngineConfig, ledger: Arc<dyn TrustLedgerStore>) -> Self {
        let keys = Arc::new(RwLock::new(KeyVersionStore::new(config.key_store_config())));
        let claims = Arc::new(RwLock::new(PermissionClaimStore::new()));
        let validator =
            DelegationValidator::new(config.validator_config(), keys.clone(), claims.clone());
        let registry = validator.registry();
        let engine = Arc::new(RwLock::new(ReputationEngine::new(config.reputation_config())));
        let batcher = Arc::new(TrustUpdateBatcher::new(config.batcher_config(), ledger));
        let accountability = AccountabilityLayer::new(config.accountability_config(), engine.clone())
            .with_batcher(batcher.clone());

        Self {
            config,
            keys,
            claims,
            validator,
            registry,
            resources: RwLock::new(HashMap::new()),
            engine,
            accountability,
            batcher,
        }
    }

    /// Replace the accountability layer, e.g. to attach a durable store
    pub fn with_accountability(
        mut self,
        build: impl FnOnce(AccountabilityLayer) -> AccountabilityLayer,
    ) -> Self {
        self.accountability = build(self.accountability);
        self
    }

    pub fn keys(&self) -> &Arc<RwLock<KeyVersionStore>> {
        &self.keys
    }

    pub fn claims(&self) -> &Arc<RwLock<PermissionClaimStore>> {
        &self.claims
    }

    pub fn validator(&self) -> &DelegationValidator {
        &self.validator
    }

    pub fn registry(&self) -> &Arc<RwLock<DelegationRegistry>> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<RwLock<ReputationEngine>> {
        &self.engine
    }

    pub fn accountability(&self) -> &AccountabilityLayer {
        &self.accountability
    }

    pub fn batcher(&self) -> &Arc<TrustUpdateBatcher> {
        &self.batcher
    }

    /// Start the periodic flush worker with the configured jitter seed
    pub fn start_flusher(&self) -> BatcherHandle {
        let schedule = JitterSchedule::new(self.batcher.config(), self.config.batcher.jitter_seed);
        self.batcher.spawn(schedule)
    }

    pub async fn register_entity_at(
        &self,
        entity: &EntityId,
        private_key: PrivateKey,
        now: DateTime<Utc>,
    ) -> Result<KeyVersion> {
        Ok(self
            .keys
            .write()
            .await
            .register_initial_at(entity, private_key, now)?)
    }

    pub async fn grant_claim(&self, entity: &EntityId, organization: &OrganizationId, claim: &str) {
        self.claims.write().await.grant(entity, organization, claim);
    }

    /// Sign a delegation with the delegator's current key
    pub async fn sign_delegation(&self, delegation: Delegation) -> Result<Delegation> {
        let payload = delegation.signing_payload()?;
        let (signature, version) = self.keys.read().await.sign(&delegation.delegator, &payload)?;
        debug!(delegation = %delegation.id, version, "signed delegation");
        Ok(delegation.signed(signature))
    }

    pub async fn submit_delegation(
        &self,
        delegation: &Delegation,
        resources: ResourceMatcher,
    ) -> ValidationOutcome {
        self.submit_delegation_at(delegation, resources, Utc::now()).await
    }

    /// Validate a delegation and attach its resource patterns when accepted
    pub async fn submit_delegation_at(
        &self,
        delegation: &Delegation,
        resources: ResourceMatcher,
        now: DateTime<Utc>,
    ) -> ValidationOutcome {
        let outcome = self.validator.validate_at(delegation, now).await;
        if outcome.is_valid() {
            self.resources
                .write()
                .await
                .insert(delegation.id.clone(), resources);
        }
        outcome
    }

    pub async fn authorize(&self, request: &AuthorizationRequest) -> AuthorizationDecision {
        self.authorize_at(request, Utc::now()).await
    }

    pub async fn authorize_at(
        &self,
        request: &AuthorizationRequest,
        now: DateTime<Utc>,
    ) -> AuthorizationDecision {
        let gate = self.accountability.check_constraints_at(
            &request.entity,
            &request.action_type,
            request.value,
            now,
        );
        if !gate.allowed {
            return AuthorizationDecision::deny(gate.reason);
        }

        let access = match self.resources.read().await.get(&request.delegation_id) {
            Some(matcher) => matcher.is_authorized(&request.resource, request.required),
            None => ResourceMatcher::new().is_authorized(&request.resource, request.required),
        };
        if !access.allowed {
            return AuthorizationDecision::deny(access.reason);
        }

        let mut registry = self.registry.write().await;
        let record = match registry.effective_at(&request.delegation_id, now) {
            Ok(record) => record,
            Err(e) => return AuthorizationDecision::deny(e.to_string()),
        };
        if record.delegation.delegatee != request.entity {
            return AuthorizationDecision::deny(format!(
                "Delegation {} was not granted to {}",
                request.delegation_id, request.entity
            ));
        }

        let remaining =
            match registry.consume_budget_at(&request.delegation_id, request.atp_cost, now) {
                Ok(remaining) => remaining,
                Err(e) => return AuthorizationDecision::deny(e.to_string()),
            };

        drop(registry);
        self.accountability.note_action_at(&request.entity, now);

        info!(
            entity = %request.entity,
            delegation = %request.delegation_id,
            resource = %request.resource,
            supervised = gate.supervised,
            "authorized"
        );
        AuthorizationDecision {
            allowed: true,
            reason: access.reason,
            supervised: gate.supervised,
            remaining_budget: Some(remaining),
        }
    }

    pub async fn record_outcome(
        &self,
        action: &ActionOutcome,
        organization: &OrganizationId,
    ) -> Result<ReputationDelta> {
        self.record_outcome_at(action, organization, Utc::now()).await
    }

    /// Score an outcome and queue its delta for the ledger
    ///
    /// The delta is applied to the engine only after the batcher admitted
    /// it, so a limit rejection leaves the profile untouched and the caller
    /// may retry.
    pub async fn record_outcome_at(
        &self,
        action: &ActionOutcome,
        organization: &OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<ReputationDelta> {
        let (delta, gaming) = {
            let mut engine = self.engine.write().await;
            let delta = engine.compute_delta_at(action, now);
            self.batcher
                .record_at(&action.entity, organization, DeltaFields::from(&delta), now)?;
            engine.apply_delta(&delta);
            (delta, engine.detect_gaming(&action.entity, &action.role))
        };
        if let Some(signal) = gaming {
            warn!(entity = %action.entity, role = %action.role, signal = signal.reason(), "possible reputation gaming");
        }
        Ok(delta)
    }
}
