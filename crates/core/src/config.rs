//! Engine configuration file format.
//!
//! Every section is optional; missing fields take the component defaults.
//! Durations are expressed in whole seconds, days or milliseconds as the
//! field names say.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use trustgate_crypto::KeyStoreConfig;
use trustgate_trust::{BatcherConfig, ReputationConfig};
use trustgate_verify::ValidatorConfig;
use validator::{Validate, ValidationError};

use crate::accountability::AccountabilityConfig;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct KeySettings {
    #[validate(range(min = 0))]
    pub default_overlap_days: i64,
    #[validate(range(min = 0))]
    pub expired_key_grace_days: i64,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            default_overlap_days: 30,
            expired_key_grace_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DelegationSettings {
    #[validate(range(min = 1))]
    pub max_delegations_per_window: usize,
    #[validate(range(min = 1))]
    pub rate_window_secs: i64,
}

impl Default for DelegationSettings {
    fn default() -> Self {
        Self {
            max_delegations_per_window: 100,
            rate_window_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ReputationSettings {
    #[validate(range(min = 1.0))]
    pub witness_boost: f64,
    #[validate(range(min = 1.0))]
    pub consistency_bonus: f64,
    #[validate(range(min = 1.0))]
    pub novelty_multiplier: f64,
    #[validate(range(min = 1))]
    pub history_limit: usize,
    #[validate(range(min = 1))]
    pub decay_interval_days: i64,
}

impl Default for ReputationSettings {
    fn default() -> Self {
        Self {
            witness_boost: 1.2,
            consistency_bonus: 1.1,
            novelty_multiplier: 1.5,
            history_limit: 100,
            decay_interval_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "jitter_below_interval"))]
pub struct BatcherSettings {
    #[validate(range(min = 1))]
    pub flush_interval_secs: u64,
    pub flush_jitter_secs: u64,
    pub execution_noise_ms: u64,
    #[validate(range(min = 1))]
    pub max_batch_size: usize,
    #[validate(range(min = 1))]
    pub max_updates_per_minute: u32,
    #[validate(range(min = 1))]
    pub max_pending_total: usize,
    #[validate(range(min = 1))]
    pub max_pending_per_entity: u32,
    /// Seed for the flush jitter; fixed seeds make schedules reproducible
    pub jitter_seed: u64,
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: 60,
            flush_jitter_secs: 10,
            execution_noise_ms: 50,
            max_batch_size: 100,
            max_updates_per_minute: 60,
            max_pending_total: 10_000,
            max_pending_per_entity: 100,
            jitter_seed: 0,
        }
    }
}

fn jitter_below_interval(settings: &BatcherSettings) -> std::result::Result<(), ValidationError> {
    if settings.flush_jitter_secs >= settings.flush_interval_secs {
        return Err(ValidationError::new("flush_jitter_secs must be below flush_interval_secs"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AccountabilitySettings {
    #[validate(range(min = 0.0, max = 1.0))]
    pub penalty_magnitude: f64,
    #[validate(range(min = 1))]
    pub rate_limit_window_secs: i64,
}

impl Default for AccountabilitySettings {
    fn default() -> Self {
        Self {
            penalty_magnitude: 0.5,
            rate_limit_window_secs: 3600,
        }
    }
}

/// Aggregated configuration for an [`Authorizer`](crate::Authorizer)
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EngineConfig {
    #[validate]
    pub keys: KeySettings,
    #[validate]
    pub delegation: DelegationSettings,
    #[validate]
    pub reputation: ReputationSettings,
    #[validate]
    pub batcher: BatcherSettings,
    #[validate]
    pub accountability: AccountabilitySettings,
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn key_store_config(&self) -> KeyStoreConfig {
        KeyStoreConfig {
            default_overlap: Duration::days(self.keys.default_overlap_days),
            expired_key_grace: Duration::days(self.keys.expired_key_grace_days),
        }
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            max_delegations_per_window: self.delegation.max_delegations_per_window,
            rate_window: Duration::seconds(self.delegation.rate_window_secs),
        }
    }

    pub fn reputation_config(&self) -> ReputationConfig {
        ReputationConfig {
            witness_boost: self.reputation.witness_boost,
            consistency_bonus: self.reputation.consistency_bonus,
            novelty_multiplier: self.reputation.novelty_multiplier,
            history_limit: self.reputation.history_limit,
            decay_interval: Duration::days(self.reputation.decay_interval_days),
            ..ReputationConfig::default()
        }
    }

    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            flush_interval: StdDuration::from_secs(self.batcher.flush_interval_secs),
            flush_jitter: StdDuration::from_secs(self.batcher.flush_jitter_secs),
            execution_noise: StdDuration::from_millis(self.batcher.execution_noise_ms),
            max_batch_size: self.batcher.max_batch_size,
            max_updates_per_window: self.batcher.max_updates_per_minute,
            rate_window: Duration::seconds(60),
            max_pending_total: self.batcher.max_pending_total,
            max_pending_per_entity: self.batcher.max_pending_per_entity,
        }
    }

    pub fn accountability_config(&self) -> AccountabilityConfig {
        AccountabilityConfig {
            penalty_magnitude: self.accountability.penalty_magnitude,
            rate_limit_window: Duration::seconds(self.accountability.rate_limit_window_secs),
        }
    }
}
