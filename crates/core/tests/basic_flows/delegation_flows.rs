//! Basic delegation flows.
//! These tests drive the validator and authorization path through the facade.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use trustgate_core::{AuthorizationRequest, Authorizer, Constraint, EngineConfig, MisbehaviorReport};
use trustgate_crypto::PrivateKey;
use trustgate_trust::InMemoryTrustLedger;
use trustgate_types::{EntityId, OrganizationId};
use trustgate_verify::{Delegation, PermissionLevel, ResourceMatcher};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

fn org() -> OrganizationId {
    OrganizationId::new("acme")
}

async fn authorizer_with(entities: &[&str]) -> Authorizer {
    let authorizer = Authorizer::new(EngineConfig::default(), Arc::new(InMemoryTrustLedger::new()));
    for e in entities {
        authorizer
            .register_entity_at(&EntityId::new(*e), PrivateKey::generate(), t0())
            .await
            .unwrap();
    }
    authorizer
}

fn draft(id: &str, from: &str, to: &str, claims: &[&str]) -> Delegation {
    Delegation::new(
        id,
        EntityId::new(from),
        EntityId::new(to),
        org(),
        claims.iter().copied(),
        t0(),
        Duration::days(30),
    )
}

fn docs_matcher() -> ResourceMatcher {
    ResourceMatcher::new()
        .with_allowed("docs/*", PermissionLevel::Write)
        .unwrap()
}

#[tokio::test]
async fn test_sub_delegation_subset_scenario() {
    let authorizer = authorizer_with(&["dave", "gina", "hank"]).await;
    for claim in ["read", "write"] {
        authorizer.grant_claim(&EntityId::new("dave"), &org(), claim).await;
        authorizer.grant_claim(&EntityId::new("gina"), &org(), claim).await;
    }
    authorizer.grant_claim(&EntityId::new("gina"), &org(), "admin").await;
    let now = t0() + Duration::minutes(5);

    let p = authorizer
        .sign_delegation(draft("P", "dave", "gina", &["read", "write"]))
        .await
        .unwrap();
    assert!(authorizer.submit_delegation_at(&p, docs_matcher(), now).await.is_valid());

    let read_only = authorizer
        .sign_delegation(draft("P-read", "gina", "hank", &["read"]).with_parent("P"))
        .await
        .unwrap();
    assert!(authorizer
        .submit_delegation_at(&read_only, docs_matcher(), now)
        .await
        .is_valid());

    let admin = authorizer
        .sign_delegation(draft("P-admin", "gina", "hank", &["admin"]).with_parent("P"))
        .await
        .unwrap();
    let outcome = authorizer.submit_delegation_at(&admin, docs_matcher(), now).await;
    assert!(!outcome.is_valid());
    assert!(outcome.reason().unwrap().contains("not in parent"));
}

#[tokio::test]
async fn test_rate_limit_scenario() {
    let authorizer = authorizer_with(&["alice", "bob"]).await;
    authorizer.grant_claim(&EntityId::new("alice"), &org(), "read").await;

    let mut results = Vec::new();
    for i in 0..105i64 {
        let d = authorizer
            .sign_delegation(draft(&format!("bulk-{i}"), "alice", "bob", &["read"]))
            .await
            .unwrap();
        let outcome = authorizer
            .submit_delegation_at(&d, docs_matcher(), t0() + Duration::seconds(i * 30))
            .await;
        results.push(outcome);
    }

    assert!(results[..100].iter().all(|o| o.is_valid()));
    assert!(results[100..]
        .iter()
        .all(|o| o.reason().as_deref() == Some("Delegation rate limit exceeded for alice")));
}

#[tokio::test]
async fn test_authorize_checks_resources_delegatee_and_budget() {
    let authorizer = authorizer_with(&["alice", "bob"]).await;
    authorizer.grant_claim(&EntityId::new("alice"), &org(), "read").await;
    let now = t0() + Duration::hours(1);

    let d = authorizer
        .sign_delegation(draft("d1", "alice", "bob", &["read"]).with_budget(10))
        .await
        .unwrap();
    let matcher = docs_matcher().with_denied("docs/private/*").unwrap();
    assert!(authorizer.submit_delegation_at(&d, matcher, now).await.is_valid());

    let bob = EntityId::new("bob");
    let ok = authorizer
        .authorize_at(
            &AuthorizationRequest::new(bob.clone(), "d1", "read", "docs/guide.md", PermissionLevel::Read)
                .with_cost(4),
            now,
        )
        .await;
    assert!(ok.allowed, "{}", ok.reason);
    assert_eq!(ok.remaining_budget, Some(6));

    let denied = authorizer
        .authorize_at(
            &AuthorizationRequest::new(bob.clone(), "d1", "read", "docs/private/keys", PermissionLevel::Read),
            now,
        )
        .await;
    assert!(!denied.allowed);

    let too_strong = authorizer
        .authorize_at(
            &AuthorizationRequest::new(bob.clone(), "d1", "delete", "docs/guide.md", PermissionLevel::Admin),
            now,
        )
        .await;
    assert!(too_strong.reason.contains("Insufficient permission"));

    let stranger = authorizer
        .authorize_at(
            &AuthorizationRequest::new(EntityId::new("eve"), "d1", "read", "docs/guide.md", PermissionLevel::Read),
            now,
        )
        .await;
    assert_eq!(stranger.reason, "Delegation d1 was not granted to eve");

    let overspend = authorizer
        .authorize_at(
            &AuthorizationRequest::new(bob, "d1", "read", "docs/guide.md", PermissionLevel::Read).with_cost(7),
            now,
        )
        .await;
    assert!(!overspend.allowed);
    assert!(overspend.reason.contains("Budget exceeded"));
}

#[tokio::test]
async fn test_revoked_parent_blocks_child_use() {
    let authorizer = authorizer_with(&["dave", "gina", "hank"]).await;
    authorizer.grant_claim(&EntityId::new("dave"), &org(), "read").await;
    authorizer.grant_claim(&EntityId::new("gina"), &org(), "read").await;
    let now = t0() + Duration::minutes(1);

    let p = authorizer.sign_delegation(draft("P", "dave", "gina", &["read"])).await.unwrap();
    assert!(authorizer.submit_delegation_at(&p, docs_matcher(), now).await.is_valid());
    let c = authorizer
        .sign_delegation(draft("C", "gina", "hank", &["read"]).with_parent("P"))
        .await
        .unwrap();
    assert!(authorizer.submit_delegation_at(&c, docs_matcher(), now).await.is_valid());

    let request =
        AuthorizationRequest::new(EntityId::new("hank"), "C", "read", "docs/a", PermissionLevel::Read);
    assert!(authorizer.authorize_at(&request, now).await.allowed);

    authorizer.registry().write().await.revoke_at("P", now).unwrap();
    let decision = authorizer.authorize_at(&request, now + Duration::seconds(1)).await;
    assert!(!decision.allowed);
    assert!(decision.reason.contains("P is revoked"));
}

#[tokio::test]
async fn test_unknown_delegation_has_no_resources() {
    let authorizer = authorizer_with(&[]).await;
    let decision = authorizer
        .authorize_at(
            &AuthorizationRequest::new(EntityId::new("bob"), "missing", "read", "docs/a", PermissionLevel::Read),
            t0(),
        )
        .await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason, "No allowed resources configured");
}

#[tokio::test]
async fn test_denied_requests_do_not_spend_rate_allowance() {
    let authorizer = authorizer_with(&["dave", "hank"]).await;
    authorizer.grant_claim(&EntityId::new("dave"), &org(), "read").await;
    let now = t0() + Duration::minutes(5);
    let d = authorizer
        .sign_delegation(draft("R", "dave", "hank", &["read"]))
        .await
        .unwrap();
    assert!(authorizer.submit_delegation_at(&d, docs_matcher(), now).await.is_valid());

    let hank = EntityId::new("hank");
    authorizer
        .accountability()
        .record_confirmed_misbehavior_at(
            MisbehaviorReport::new(hank.clone(), "acme", EntityId::new("dave"))
                .with_organization(org())
                .with_constraint(Constraint::rate_limit(2, "probation")),
            now,
        )
        .await
        .unwrap();

    let request = |resource: &str| {
        AuthorizationRequest::new(hank.clone(), "R", "read", resource, PermissionLevel::Read)
    };
    for i in 1..=3 {
        let denied = authorizer
            .authorize_at(&request("vault/keys"), now + Duration::minutes(i))
            .await;
        assert!(!denied.allowed);
        assert!(denied.reason.contains("does not match any allowed pattern"));
    }

    for i in 4..=5 {
        assert!(authorizer
            .authorize_at(&request("docs/readme"), now + Duration::minutes(i))
            .await
            .allowed);
    }
    let limited = authorizer
        .authorize_at(&request("docs/readme"), now + Duration::minutes(6))
        .await;
    assert!(!limited.allowed);
    assert!(limited.reason.starts_with("Rate limit exceeded"));
}
