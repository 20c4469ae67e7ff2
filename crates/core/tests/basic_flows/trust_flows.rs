//! Basic trust flows.
//! These tests verify scoring, batching and anchoring of trust updates.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use trustgate_core::{Authorizer, Constraint, CoreError, EngineConfig, MisbehaviorReport};
use trustgate_trust::{
    ActionOutcome, InMemoryTrustLedger, OutcomeType, ReputationConfig, ReputationEngine, T3Tensor,
};
use trustgate_types::{Classify, EntityId, OrganizationId};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

#[test]
fn test_diminishing_returns_scenario() {
    let mut engine = ReputationEngine::new(ReputationConfig::default());
    let veteran = EntityId::new("veteran");
    let newcomer = EntityId::new("newcomer");
    engine.get_or_create(&veteran, "analyst").t3 = T3Tensor::new(0.85, 0.85, 0.85).unwrap();
    engine.get_or_create(&newcomer, "analyst").t3 = T3Tensor::new(0.3, 0.3, 0.3).unwrap();

    let high = engine.compute_delta_at(
        &ActionOutcome::new(veteran, "analyst", OutcomeType::StandardSuccess),
        t0(),
    );
    let low = engine.compute_delta_at(
        &ActionOutcome::new(newcomer, "analyst", OutcomeType::StandardSuccess),
        t0(),
    );

    assert!(high.net_trust_change() > 0.0);
    assert!(high.net_trust_change() < low.net_trust_change());
}

#[tokio::test]
async fn test_outcomes_flow_into_anchored_ledger() {
    let ledger = Arc::new(InMemoryTrustLedger::new());
    let authorizer = Authorizer::new(EngineConfig::default(), ledger.clone());
    let org = OrganizationId::new("acme");
    let alice = EntityId::new("alice");
    let bob = EntityId::new("bob");

    for (i, entity) in [&alice, &bob, &alice].into_iter().enumerate() {
        authorizer
            .record_outcome_at(
                &ActionOutcome::new(entity.clone(), "acme", OutcomeType::StandardSuccess),
                &org,
                t0() + Duration::seconds(i as i64),
            )
            .await
            .unwrap();
    }

    let batcher = authorizer.batcher();
    assert_eq!(batcher.pending_count(), 2);
    assert_eq!(batcher.pending_entry(&alice, &org).unwrap().updates, 2);

    let report = batcher.flush_at(t0() + Duration::minutes(1)).await.unwrap().unwrap();
    assert_eq!(report.entries, 2);
    assert_eq!(batcher.merkle_roots(), vec![report.merkle_root.clone()]);

    let proof = batcher.get_proof(&alice, &org).unwrap();
    assert!(proof.verify());
    assert_eq!(proof.root_hex(), report.merkle_root);

    let row = ledger.row(&alice, &org).unwrap();
    assert_eq!(row.total_actions, 2);
    assert!(row.t3.average() > 0.5);

    // Nothing pending: no new root
    assert!(batcher.flush_at(t0() + Duration::minutes(2)).await.unwrap().is_none());
    assert_eq!(batcher.merkle_roots().len(), 1);
    assert_eq!(batcher.stats().total_flushes, 1);
}

#[tokio::test]
async fn test_engine_scores_match_profile() {
    let authorizer = Authorizer::new(EngineConfig::default(), Arc::new(InMemoryTrustLedger::new()));
    let org = OrganizationId::new("acme");
    let carol = EntityId::new("carol");

    assert_eq!(authorizer.engine().read().await.trust_score(&carol, "acme"), 0.5);

    let delta = authorizer
        .record_outcome_at(
            &ActionOutcome::new(carol.clone(), "acme", OutcomeType::UnexpectedFailure),
            &org,
            t0(),
        )
        .await
        .unwrap();
    assert!(delta.net_trust_change() < 0.0);
    assert!(authorizer.engine().read().await.trust_score(&carol, "acme") < 0.5);
}

#[tokio::test]
async fn test_rejected_outcome_leaves_engine_untouched() {
    let mut config = EngineConfig::default();
    config.batcher.max_updates_per_minute = 1;
    let ledger = Arc::new(InMemoryTrustLedger::new());
    let authorizer = Authorizer::new(config, ledger.clone());
    let org = OrganizationId::new("acme");
    let dave = EntityId::new("dave");
    let outcome = ActionOutcome::new(dave.clone(), "acme", OutcomeType::StandardSuccess);

    authorizer.record_outcome_at(&outcome, &org, t0()).await.unwrap();
    let score = authorizer.engine().read().await.trust_score(&dave, "acme");

    let err = authorizer.record_outcome_at(&outcome, &org, t0()).await.unwrap_err();
    assert!(matches!(err, CoreError::Batch(_)));
    assert!(err.is_retriable());
    {
        let engine = authorizer.engine().read().await;
        assert_eq!(engine.profile(&dave, "acme").unwrap().total_actions, 1);
        assert_eq!(engine.trust_score(&dave, "acme"), score);
    }

    // Retrying once the window rolled over lands in both places exactly once
    authorizer
        .record_outcome_at(&outcome, &org, t0() + Duration::seconds(61))
        .await
        .unwrap();
    authorizer.batcher().flush_at(t0() + Duration::minutes(2)).await.unwrap();
    let engine_actions = authorizer
        .engine()
        .read()
        .await
        .profile(&dave, "acme")
        .unwrap()
        .total_actions;
    assert_eq!(engine_actions, 2);
    assert_eq!(ledger.row(&dave, &org).unwrap().total_actions, 2);
}

#[tokio::test]
async fn test_adjudicated_penalty_reaches_ledger() {
    let ledger = Arc::new(InMemoryTrustLedger::new());
    let authorizer = Authorizer::new(EngineConfig::default(), ledger.clone());
    let org = OrganizationId::new("acme");
    let erin = EntityId::new("erin");

    let event = authorizer
        .accountability()
        .record_confirmed_misbehavior_at(
            MisbehaviorReport::new(erin.clone(), "acme", EntityId::new("auditor"))
                .with_organization(org.clone())
                .with_evidence("case:42")
                .with_constraint(Constraint::quarantine(t0() + Duration::days(7), "fraud")),
            t0(),
        )
        .await
        .unwrap();
    assert!(event.trust_delta() < 0.0);
    assert_eq!(authorizer.batcher().pending_count(), 1);

    let report = authorizer
        .batcher()
        .flush_at(t0() + Duration::minutes(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.entries, 1);

    let row = ledger.row(&erin, &org).unwrap();
    assert!(row.t3.average() < 0.5);
    assert!(row.v3.veracity < 0.5);
    assert!(authorizer.batcher().get_proof(&erin, &org).unwrap().verify());
}
