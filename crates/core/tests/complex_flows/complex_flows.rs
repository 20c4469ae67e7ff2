//! Complex flow tests for the core crate.
//! These tests combine keys, delegations, accountability and batching.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::join_all;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use trustgate_core::{
    AuthorizationRequest, Authorizer, Constraint, EngineConfig, MisbehaviorReport,
};
use trustgate_crypto::PrivateKey;
use trustgate_trust::{
    ActionOutcome, BatchError, InMemoryTrustLedger, LedgerUpdate, OutcomeType, StoreError,
    TrustLedgerStore,
};
use trustgate_types::{Classify, EntityId, OrganizationId};
use trustgate_verify::{AuditEventType, Delegation, PermissionLevel, ResourceMatcher};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap()
}

fn org() -> OrganizationId {
    OrganizationId::new("acme")
}

fn matcher() -> ResourceMatcher {
    ResourceMatcher::new()
        .with_allowed("ledger/*", PermissionLevel::Write)
        .unwrap()
}

fn draft(id: &str, from: &str, to: &str) -> Delegation {
    Delegation::new(
        id,
        EntityId::new(from),
        EntityId::new(to),
        org(),
        ["pay"],
        t0(),
        Duration::days(90),
    )
}

async fn setup(config: EngineConfig, ledger: Arc<dyn TrustLedgerStore>) -> Authorizer {
    let authorizer = Authorizer::new(config, ledger);
    for e in ["treasurer", "clerk"] {
        authorizer
            .register_entity_at(&EntityId::new(e), PrivateKey::generate(), t0())
            .await
            .unwrap();
    }
    authorizer.grant_claim(&EntityId::new("treasurer"), &org(), "pay").await;
    authorizer
}

/// Ledger that fails a fixed number of commits before delegating
struct FlakyLedger {
    failures_left: AtomicU32,
    inner: InMemoryTrustLedger,
}

#[async_trait]
impl TrustLedgerStore for FlakyLedger {
    async fn commit_batch(&self, updates: &[LedgerUpdate]) -> Result<(), StoreError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(StoreError("connection reset".into()));
        }
        self.inner.commit_batch(updates).await
    }
}

#[tokio::test]
async fn test_end_to_end_with_background_flusher() {
    let config = EngineConfig::from_json_str(
        r#"{"batcher": {"flush_interval_secs": 3600, "flush_jitter_secs": 0, "execution_noise_ms": 0, "jitter_seed": 42}}"#,
    )
    .unwrap();
    let ledger = Arc::new(InMemoryTrustLedger::new());
    let authorizer = setup(config, ledger.clone()).await;
    let handle = authorizer.start_flusher();

    // Wall-clock flow: the delegation window must cover the real current time
    let live = Delegation::new(
        "pay-1",
        EntityId::new("treasurer"),
        EntityId::new("clerk"),
        org(),
        ["pay"],
        Utc::now() - Duration::minutes(1),
        Duration::days(1),
    )
    .with_budget(1_000);
    let d = authorizer.sign_delegation(live).await.unwrap();
    assert!(authorizer.submit_delegation(&d, matcher()).await.is_valid());

    let clerk = EntityId::new("clerk");
    let request = AuthorizationRequest::new(clerk.clone(), "pay-1", "payment", "ledger/q3", PermissionLevel::Write)
        .with_value(250.0)
        .with_cost(100);
    let decision = authorizer.authorize(&request).await;
    assert!(decision.allowed, "{}", decision.reason);
    assert_eq!(decision.remaining_budget, Some(900));

    authorizer
        .record_outcome(
            &ActionOutcome::new(clerk.clone(), "acme", OutcomeType::DeadlineMet)
                .with_action("payment", "ledger/q3")
                .with_witness(EntityId::new("treasurer")),
            &org(),
        )
        .await
        .unwrap();
    assert_eq!(authorizer.batcher().pending_count(), 1);

    // Stopping runs the final flush even though the timer never fired
    let report = handle.stop().await.unwrap().unwrap();
    assert_eq!(report.entries, 1);
    assert_eq!(authorizer.batcher().pending_count(), 0);
    assert!(ledger.row(&clerk, &org()).is_some());
    assert!(authorizer.batcher().get_proof(&clerk, &org()).unwrap().verify());

    let audit = authorizer.validator().audit_records("pay-1").await;
    assert_eq!(audit[0].event_type, AuditEventType::ValidationSuccess);
}

#[tokio::test]
async fn test_misbehavior_quarantine_then_transaction_cap() {
    let authorizer = setup(EngineConfig::default(), Arc::new(InMemoryTrustLedger::new())).await;
    let now = t0() + Duration::hours(1);
    let d = authorizer
        .sign_delegation(draft("pay-1", "treasurer", "clerk"))
        .await
        .unwrap();
    assert!(authorizer.submit_delegation_at(&d, matcher(), now).await.is_valid());

    let clerk = EntityId::new("clerk");
    let event = authorizer
        .accountability()
        .record_confirmed_misbehavior_at(
            MisbehaviorReport::new(clerk.clone(), "acme", EntityId::new("auditor"))
                .with_organization(org())
                .with_evidence("fipt:778")
                .with_description("duplicate invoice")
                .with_constraint(Constraint::quarantine(now + Duration::days(7), "duplicate invoice"))
                .with_constraint(Constraint::max_transaction_value(500.0, "reduced ceiling")),
            now,
        )
        .await
        .unwrap();
    assert!(event.trust_after.trust_score < event.trust_before.trust_score);
    assert!(authorizer.engine().read().await.trust_score(&clerk, "acme") < 0.5);

    let request = |value: f64| {
        AuthorizationRequest::new(clerk.clone(), "pay-1", "payment", "ledger/q3", PermissionLevel::Write)
            .with_value(value)
    };

    let quarantined = authorizer.authorize_at(&request(10.0), now + Duration::days(1)).await;
    assert!(!quarantined.allowed);
    assert!(quarantined.reason.starts_with("Entity quarantined until"));

    let after = now + Duration::days(8);
    assert!(authorizer.authorize_at(&request(400.0), after).await.allowed);
    let capped = authorizer.authorize_at(&request(900.0), after).await;
    assert!(!capped.allowed);
    assert!(capped.reason.contains("per-transaction limit exceeded"));

    // History stays queryable after the quarantine lapsed
    assert_eq!(authorizer.accountability().events_for(&clerk).len(), 1);
}

#[tokio::test]
async fn test_delegations_across_key_rotation() {
    let authorizer = setup(EngineConfig::default(), Arc::new(InMemoryTrustLedger::new())).await;
    let treasurer = EntityId::new("treasurer");

    let early = authorizer.sign_delegation(draft("early", "treasurer", "clerk")).await.unwrap();
    assert!(authorizer
        .submit_delegation_at(&early, matcher(), t0() + Duration::days(1))
        .await
        .is_valid());

    let rotated_at = t0() + Duration::days(2);
    let old_key = PrivateKey::generate();
    {
        let mut keys = authorizer.keys().write().await;
        keys.rotate_at(&treasurer, PrivateKey::generate(), Duration::days(30), "scheduled", rotated_at)
            .unwrap();
    }

    let late = authorizer.sign_delegation(draft("late", "treasurer", "clerk")).await.unwrap();
    assert!(authorizer
        .submit_delegation_at(&late, matcher(), rotated_at + Duration::hours(1))
        .await
        .is_valid());

    // A signature from a key the store never knew is refused
    let forged = draft("forged", "treasurer", "clerk");
    let payload = forged.signing_payload().unwrap();
    let forged = forged.signed(old_key.sign(&payload));
    let outcome = authorizer
        .submit_delegation_at(&forged, matcher(), rotated_at + Duration::hours(2))
        .await;
    assert_eq!(outcome.reason().as_deref(), Some("Invalid delegation signature from treasurer"));

    // Accepted delegations are not re-validated when keys change
    authorizer.keys().write().await.revoke_at(&treasurer, 1, "retired", rotated_at).unwrap();
    let request = AuthorizationRequest::new(EntityId::new("clerk"), "early", "payment", "ledger/a", PermissionLevel::Read);
    assert!(authorizer.authorize_at(&request, rotated_at + Duration::days(1)).await.allowed);
}

#[tokio::test]
async fn test_concurrent_submissions_respect_rate_limit() {
    let config = EngineConfig::from_json_str(r#"{"delegation": {"max_delegations_per_window": 10}}"#).unwrap();
    let authorizer = setup(config, Arc::new(InMemoryTrustLedger::new())).await;
    let now = t0() + Duration::minutes(10);

    let mut signed = Vec::new();
    for i in 0..20 {
        signed.push(
            authorizer
                .sign_delegation(draft(&format!("burst-{i}"), "treasurer", "clerk"))
                .await
                .unwrap(),
        );
    }

    let outcomes = join_all(
        signed
            .iter()
            .map(|d| authorizer.submit_delegation_at(d, matcher(), now)),
    )
    .await;

    assert_eq!(outcomes.iter().filter(|o| o.is_valid()).count(), 10);
    assert_eq!(authorizer.registry().read().await.len(), 10);
    assert_eq!(authorizer.validator().audit_len().await, 20);
    assert_eq!(authorizer.validator().audit_failures().await.len(), 10);
}

#[tokio::test]
async fn test_failed_commit_is_requeued_and_retried() {
    let ledger = Arc::new(FlakyLedger {
        failures_left: AtomicU32::new(2),
        inner: InMemoryTrustLedger::new(),
    });
    let authorizer = setup(EngineConfig::default(), ledger.clone()).await;
    let clerk = EntityId::new("clerk");

    authorizer
        .record_outcome_at(
            &ActionOutcome::new(clerk.clone(), "acme", OutcomeType::StandardSuccess),
            &org(),
            t0(),
        )
        .await
        .unwrap();

    let err = authorizer.batcher().flush_at(t0() + Duration::minutes(1)).await.unwrap_err();
    assert!(matches!(err, BatchError::CommitFailed { attempts: 2, .. }));
    assert!(err.is_retriable());
    assert_eq!(authorizer.batcher().pending_count(), 1);
    assert!(authorizer.batcher().merkle_roots().is_empty());

    // A later update merges into the requeued entry
    authorizer
        .record_outcome_at(
            &ActionOutcome::new(clerk.clone(), "acme", OutcomeType::StandardSuccess),
            &org(),
            t0() + Duration::minutes(2),
        )
        .await
        .unwrap();
    assert_eq!(authorizer.batcher().pending_entry(&clerk, &org()).unwrap().updates, 2);

    let report = authorizer
        .batcher()
        .flush_at(t0() + Duration::minutes(3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.entries, 1);
    assert_eq!(ledger.inner.row(&clerk, &org()).unwrap().total_actions, 2);

    let stats = authorizer.batcher().stats();
    assert_eq!(stats.flush_errors, 1);
    assert_eq!(stats.commit_retries, 1);
    assert_eq!(stats.merkle_roots_generated, 1);
}
