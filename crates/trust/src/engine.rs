//! Outcome-driven reputation engine.
//!
//! Profiles are keyed by (entity, role). Every outcome produces an immutable
//! [`ReputationDelta`] from a fixed impact table scaled by witness,
//! consistency and novelty multipliers. Gains shrink as the profile's T3
//! average rises so volume alone cannot push a profile to the ceiling.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};
use trustgate_types::{EntityId, TrustLevel};
use uuid::Uuid;

use crate::score::{OutcomeType, T3Tensor, V3Tensor};

const MONTH_SECS: f64 = 30.0 * 86_400.0;

/// Reputation engine configuration
#[derive(Debug, Clone)]
pub struct ReputationConfig {
    /// Multiplier when at least one witness attests the action
    pub witness_boost: f64,
    /// Multiplier for profiles with a proven track record
    pub consistency_bonus: f64,
    /// Actions required before the consistency bonus applies
    pub consistency_min_actions: u64,
    /// Success rate that must be exceeded for the consistency bonus
    pub consistency_min_success_rate: f64,
    /// Multiplier for novel successes
    pub novelty_multiplier: f64,
    /// (T3 average threshold, factor) pairs, highest threshold first
    pub diminishing_returns: Vec<(f64, f64)>,
    /// Deltas retained per profile
    pub history_limit: usize,
    /// Minimum idle time before decay applies
    pub decay_interval: Duration,
    /// Training lost per idle month
    pub training_decay_per_month: f64,
    /// Temperament regained per idle month
    pub temperament_recovery_per_month: f64,
    /// Temperament does not recover past this level
    pub temperament_recovery_ceiling: f64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            witness_boost: 1.2,
            consistency_bonus: 1.1,
            consistency_min_actions: 10,
            consistency_min_success_rate: 0.8,
            novelty_multiplier: 1.5,
            diminishing_returns: vec![(0.8, 0.5), (0.6, 0.75)],
            history_limit: 100,
            decay_interval: Duration::days(30),
            training_decay_per_month: 0.001,
            temperament_recovery_per_month: 0.01,
            temperament_recovery_ceiling: 0.8,
        }
    }
}

/// Description of a finished action to be scored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub entity: EntityId,
    pub role: String,
    pub action_type: String,
    pub action_target: String,
    pub outcome: OutcomeType,
    #[serde(default)]
    pub witnesses: Vec<EntityId>,
    #[serde(default)]
    pub contributing_factors: Vec<serde_json::Value>,
    pub action_id: Option<String>,
}

impl ActionOutcome {
    pub fn new(entity: EntityId, role: impl Into<String>, outcome: OutcomeType) -> Self {
        Self {
            entity,
            role: role.into(),
            action_type: String::new(),
            action_target: String::new(),
            outcome,
            witnesses: Vec::new(),
            contributing_factors: Vec::new(),
            action_id: None,
        }
    }

    pub fn with_action(mut self, action_type: impl Into<String>, target: impl Into<String>) -> Self {
        self.action_type = action_type.into();
        self.action_target = target.into();
        self
    }

    pub fn with_witness(mut self, witness: EntityId) -> Self {
        self.witnesses.push(witness);
        self
    }

    pub fn with_factor(mut self, factor: serde_json::Value) -> Self {
        self.contributing_factors.push(factor);
        self
    }

    pub fn with_action_id(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }
}

/// Immutable effect of one outcome on a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationDelta {
    pub entity: EntityId,
    pub role: String,
    pub action_type: String,
    pub action_target: String,
    pub action_id: String,
    pub outcome: OutcomeType,
    pub timestamp: DateTime<Utc>,
    pub delta_talent: f64,
    pub delta_training: f64,
    pub delta_temperament: f64,
    pub delta_veracity: f64,
    pub delta_validity: f64,
    pub delta_value: f64,
    /// Combined multiplier applied to gains
    pub multiplier: f64,
    #[serde(default)]
    pub contributing_factors: Vec<serde_json::Value>,
    #[serde(default)]
    pub witnesses: Vec<EntityId>,
    pub reason: String,
}

impl ReputationDelta {
    /// Sum of the T3 components
    pub fn net_trust_change(&self) -> f64 {
        self.delta_talent + self.delta_training + self.delta_temperament
    }

    /// Sum of the V3 components
    pub fn net_value_change(&self) -> f64 {
        self.delta_veracity + self.delta_validity + self.delta_value
    }
}

/// Reputation of one entity acting in one role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustProfile {
    pub entity: EntityId,
    pub role: String,
    pub t3: T3Tensor,
    pub v3: V3Tensor,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_decay: Option<DateTime<Utc>>,
    pub total_actions: u64,
    pub successful_actions: u64,
    pub failed_actions: u64,
    pub history: VecDeque<ReputationDelta>,
}

impl TrustProfile {
    fn new(entity: EntityId, role: String, now: DateTime<Utc>) -> Self {
        Self {
            entity,
            role,
            t3: T3Tensor::default(),
            v3: V3Tensor::default(),
            created_at: now,
            last_activity: now,
            last_decay: None,
            total_actions: 0,
            successful_actions: 0,
            failed_actions: 0,
            history: VecDeque::new(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_actions == 0 {
            return 0.0;
        }
        self.successful_actions as f64 / self.total_actions as f64
    }

    pub fn trust_level(&self) -> TrustLevel {
        TrustLevel::from_score(self.t3.average())
    }
}

/// Suspicious patterns flagged by [`ReputationEngine::detect_gaming`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamingSignal {
    UnwitnessedSuccess,
    RapidGrowth,
    BalancedPattern,
}

impl GamingSignal {
    pub fn reason(self) -> &'static str {
        match self {
            Self::UnwitnessedSuccess => "Suspiciously high success rate without witnesses",
            Self::RapidGrowth => "Unusually rapid reputation growth",
            Self::BalancedPattern => "Suspiciously consistent 50/50 success pattern",
        }
    }
}

type ProfileKey = (EntityId, String);

/// Role-contextual reputation store and scoring rules
#[derive(Debug, Default)]
pub struct ReputationEngine {
    config: ReputationConfig,
    profiles: HashMap<ProfileKey, TrustProfile>,
}

impl ReputationEngine {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            config,
            profiles: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ReputationConfig {
        &self.config
    }

    /// Fetch a profile, creating a neutral one on first use
    pub fn get_or_create(&mut self, entity: &EntityId, role: &str) -> &mut TrustProfile {
        self.get_or_create_at(entity, role, Utc::now())
    }

    fn get_or_create_at(&mut self, entity: &EntityId, role: &str, now: DateTime<Utc>) -> &mut TrustProfile {
        self.profiles
            .entry((entity.clone(), role.to_string()))
            .or_insert_with(|| {
                debug!(entity = %entity, role, "created trust profile");
                TrustProfile::new(entity.clone(), role.to_string(), now)
            })
    }

    pub fn profile(&self, entity: &EntityId, role: &str) -> Option<&TrustProfile> {
        self.profiles.get(&(entity.clone(), role.to_string()))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &TrustProfile> {
        self.profiles.values()
    }

    /// T3 average, 0.5 for unknown profiles
    pub fn trust_score(&self, entity: &EntityId, role: &str) -> f64 {
        self.profile(entity, role).map_or(0.5, |p| p.t3.average())
    }

    /// V3 average, 0.5 for unknown profiles
    pub fn value_score(&self, entity: &EntityId, role: &str) -> f64 {
        self.profile(entity, role).map_or(0.5, |p| p.v3.average())
    }

    pub fn compute_delta(&mut self, action: &ActionOutcome) -> ReputationDelta {
        self.compute_delta_at(action, Utc::now())
    }

    /// Score an outcome without applying it
    ///
    /// Witness, consistency and novelty multipliers scale every component.
    /// The diminishing-returns factor scales positive components only, so
    /// penalties keep their full weight at any reputation level.
    pub fn compute_delta_at(&mut self, action: &ActionOutcome, now: DateTime<Utc>) -> ReputationDelta {
        let config = self.config.clone();
        let profile = self.get_or_create_at(&action.entity, &action.role, now);

        let mut multiplier = 1.0;
        if !action.witnesses.is_empty() {
            multiplier *= config.witness_boost;
        }
        if profile.total_actions >= config.consistency_min_actions
            && profile.success_rate() > config.consistency_min_success_rate
        {
            multiplier *= config.consistency_bonus;
        }
        if action.outcome == OutcomeType::NovelSuccess {
            multiplier *= config.novelty_multiplier;
        }

        let t3_avg = profile.t3.average();
        let diminishing = config
            .diminishing_returns
            .iter()
            .find(|(threshold, _)| t3_avg > *threshold)
            .map_or(1.0, |(_, factor)| *factor);

        let scale = |base: f64| {
            if base > 0.0 {
                base * multiplier * diminishing
            } else {
                base * multiplier
            }
        };

        let (talent, training, temperament) = action.outcome.t3_impact();
        let (veracity, validity, value) = action.outcome.v3_impact();
        let effective = multiplier * diminishing;

        ReputationDelta {
            entity: action.entity.clone(),
            role: action.role.clone(),
            action_type: action.action_type.clone(),
            action_target: action.action_target.clone(),
            action_id: action
                .action_id
                .clone()
                .unwrap_or_else(|| format!("action:{}", Uuid::new_v4())),
            outcome: action.outcome,
            timestamp: now,
            delta_talent: scale(talent),
            delta_training: scale(training),
            delta_temperament: scale(temperament),
            delta_veracity: scale(veracity),
            delta_validity: scale(validity),
            delta_value: scale(value),
            multiplier: effective,
            contributing_factors: action.contributing_factors.clone(),
            witnesses: action.witnesses.clone(),
            reason: reason_for(action.outcome, effective),
        }
    }

    /// Apply a delta, update counters and trim history
    pub fn apply_delta(&mut self, delta: &ReputationDelta) -> &TrustProfile {
        let limit = self.config.history_limit;
        let profile = self.get_or_create_at(&delta.entity, &delta.role, delta.timestamp);

        profile
            .t3
            .apply(delta.delta_talent, delta.delta_training, delta.delta_temperament);
        profile
            .v3
            .apply(delta.delta_veracity, delta.delta_validity, delta.delta_value);

        profile.total_actions += 1;
        if delta.outcome.is_success() {
            profile.successful_actions += 1;
        } else {
            profile.failed_actions += 1;
        }
        profile.last_activity = profile.last_activity.max(delta.timestamp);

        profile.history.push_back(delta.clone());
        while profile.history.len() > limit {
            profile.history.pop_front();
        }

        debug!(
            entity = %delta.entity,
            role = %delta.role,
            outcome = %delta.outcome,
            net_trust = delta.net_trust_change(),
            "applied reputation delta"
        );
        profile
    }

    /// Compute and apply in one step
    pub fn record_outcome_at(&mut self, action: &ActionOutcome, now: DateTime<Utc>) -> ReputationDelta {
        let delta = self.compute_delta_at(action, now);
        self.apply_delta(&delta);
        delta
    }

    /// Adjudicated penalty with no multipliers or dampening
    ///
    /// Every T3 component and veracity drop by `magnitude`.
    pub fn penalize_at(
        &mut self,
        entity: &EntityId,
        role: &str,
        magnitude: f64,
        reason: impl Into<String>,
        adjudicator: &EntityId,
        now: DateTime<Utc>,
    ) -> ReputationDelta {
        let magnitude = magnitude.abs();
        let delta = ReputationDelta {
            entity: entity.clone(),
            role: role.to_string(),
            action_type: "adjudication".into(),
            action_target: entity.to_string(),
            action_id: format!("penalty:{}", Uuid::new_v4()),
            outcome: OutcomeType::EthicsViolation,
            timestamp: now,
            delta_talent: -magnitude,
            delta_training: -magnitude,
            delta_temperament: -magnitude,
            delta_veracity: -magnitude,
            delta_validity: 0.0,
            delta_value: 0.0,
            multiplier: 1.0,
            contributing_factors: vec![serde_json::json!({ "adjudicator": adjudicator })],
            witnesses: vec![adjudicator.clone()],
            reason: reason.into(),
        };
        self.apply_delta(&delta);
        warn!(entity = %entity, role, magnitude, adjudicator = %adjudicator, "applied adjudicated penalty");
        delta
    }

    pub fn apply_decay(&mut self) -> usize {
        self.apply_decay_at(Utc::now())
    }

    /// Decay profiles idle for at least one decay interval
    ///
    /// Training erodes and low temperament recovers toward the ceiling in
    /// proportion to idle months. Talent never decays. Returns the number of
    /// profiles touched.
    pub fn apply_decay_at(&mut self, now: DateTime<Utc>) -> usize {
        let config = &self.config;
        let mut decayed = 0;

        for profile in self.profiles.values_mut() {
            let anchor = profile
                .last_decay
                .map_or(profile.last_activity, |d| d.max(profile.last_activity));
            let idle = now - anchor;
            if idle < config.decay_interval {
                continue;
            }

            let months = idle.num_seconds() as f64 / MONTH_SECS;
            profile.t3.training = (profile.t3.training - config.training_decay_per_month * months).max(0.0);
            if profile.t3.temperament < config.temperament_recovery_ceiling {
                profile.t3.temperament =
                    (profile.t3.temperament + config.temperament_recovery_per_month * months).min(1.0);
            }
            profile.last_decay = Some(now);
            decayed += 1;
        }

        if decayed > 0 {
            info!(profiles = decayed, "applied reputation decay");
        }
        decayed
    }

    /// Flag patterns typical of reputation farming
    ///
    /// Requires at least 10 recorded actions.
    pub fn detect_gaming(&self, entity: &EntityId, role: &str) -> Option<GamingSignal> {
        let profile = self.profile(entity, role)?;
        if profile.total_actions < 10 || profile.history.is_empty() {
            return None;
        }

        let recent: Vec<&ReputationDelta> = profile.history.iter().rev().take(20).collect();
        let witnessed = recent.iter().filter(|d| !d.witnesses.is_empty()).count();
        if profile.success_rate() > 0.95 && (witnessed as f64 / recent.len() as f64) < 0.2 {
            return Some(GamingSignal::UnwitnessedSuccess);
        }

        if profile.history.len() >= 10 {
            let growth: f64 = profile
                .history
                .iter()
                .rev()
                .take(10)
                .map(ReputationDelta::net_trust_change)
                .sum();
            if growth > 0.5 {
                return Some(GamingSignal::RapidGrowth);
            }
        }

        if profile.total_actions >= 20 && (profile.success_rate() - 0.5).abs() < 0.1 {
            return Some(GamingSignal::BalancedPattern);
        }

        None
    }
}

fn reason_for(outcome: OutcomeType, multiplier: f64) -> String {
    let base = outcome.describe();
    if multiplier > 1.5 {
        format!("{base} (with witnesses and proven consistency)")
    } else if multiplier > 1.2 {
        format!("{base} (witnessed by community)")
    } else if multiplier < 0.6 {
        format!("{base} (reputation approaching ceiling)")
    } else {
        base.to_string()
    }
}
