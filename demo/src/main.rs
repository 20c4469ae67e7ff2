use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use trustgate_core::{AuthorizationRequest, Authorizer, Constraint, EngineConfig, MisbehaviorReport};
use trustgate_crypto::PrivateKey;
use trustgate_trust::{ActionOutcome, InMemoryTrustLedger, OutcomeType};
use trustgate_types::{EntityId, OrganizationId};
use trustgate_verify::{claim_hash, Delegation, PermissionLevel, ResourceMatcher};

fn load_config() -> Result<EngineConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config from {path}"))?;
            Ok(EngineConfig::from_json_str(&raw)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .pretty()
        .init();

    info!("Starting trustgate demo...");

    let config = load_config()?;
    let ledger = Arc::new(InMemoryTrustLedger::new());
    let authorizer = Authorizer::new(config, ledger.clone());
    let flusher = authorizer.start_flusher();

    let org = OrganizationId::new("acme");
    let dana = EntityId::new("dana");
    let gil = EntityId::new("gil");
    let now = Utc::now();

    // 1. Identities and held permissions
    for entity in [&dana, &gil] {
        let key = authorizer
            .register_entity_at(entity, PrivateKey::generate(), now)
            .await?;
        info!("Registered {} with key v{} ({})", entity, key.version, key.public_key);
    }
    let pay = claim_hash("pay", "ledger/*");
    authorizer.grant_claim(&dana, &org, &pay).await;

    // 2. Delegate payment rights to gil
    let delegation = Delegation::new(
        "dana-to-gil",
        dana.clone(),
        gil.clone(),
        org.clone(),
        [pay.clone()],
        now,
        Duration::days(7),
    )
    .with_budget(500);
    let delegation = authorizer.sign_delegation(delegation).await?;
    let resources = ResourceMatcher::new()
        .with_allowed("ledger/*", PermissionLevel::Write)?
        .with_denied("ledger/closed/*")?;
    let outcome = authorizer.submit_delegation(&delegation, resources).await;
    if !outcome.is_valid() {
        bail!("delegation rejected: {}", outcome.reason().unwrap_or_default());
    }
    info!("Delegation {} accepted", delegation.id);

    // 3. Authorize and score an action
    let request = AuthorizationRequest::new(gil.clone(), "dana-to-gil", "payment", "ledger/2024-q3", PermissionLevel::Write)
        .with_value(120.0)
        .with_cost(50);
    let decision = authorizer.authorize(&request).await;
    info!("Authorization: allowed={} reason={}", decision.allowed, decision.reason);

    let delta = authorizer
        .record_outcome(
            &ActionOutcome::new(gil.clone(), org.as_str(), OutcomeType::StandardSuccess)
                .with_action("payment", "ledger/2024-q3")
                .with_witness(dana.clone()),
            &org,
        )
        .await?;
    info!("Trust delta for {}: {:+.4} ({})", gil, delta.net_trust_change(), delta.reason);

    // 4. Adjudicated misbehavior installs a quarantine
    let event = authorizer
        .accountability()
        .record_confirmed_misbehavior(
            MisbehaviorReport::new(gil.clone(), org.as_str(), dana.clone())
                .with_organization(org.clone())
                .with_evidence("receipt:4411")
                .with_description("double payment")
                .with_constraint(Constraint::quarantine(Utc::now() + Duration::days(30), "double payment")),
        )
        .await?;
    info!("Recorded {} (trust {:+.3})", event.id, event.trust_delta());

    let decision = authorizer.authorize(&request).await;
    if decision.allowed {
        warn!("Quarantined entity was allowed to act");
    } else {
        info!("Authorization after quarantine: {}", decision.reason);
    }

    // 5. Final flush anchors the pending trust updates
    match flusher.stop().await? {
        Some(report) => {
            info!("Flushed {} entries under root {}", report.entries, report.merkle_root);
            if let Some(proof) = authorizer.batcher().get_proof(&gil, &org) {
                info!("Inclusion proof for {} verifies: {}", gil, proof.verify());
            }
        }
        None => info!("Nothing to flush"),
    }
    if let Some(row) = ledger.row(&gil, &org) {
        info!("Ledger row for {}: T3 avg {:.3}, {} actions", gil, row.t3.average(), row.total_actions);
    }

    info!("Demo completed successfully!");
    Ok(())
}
