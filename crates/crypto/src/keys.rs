//! Per-entity key version history.
//!
//! Every entity owns an ordered list of key versions. Rotation never deletes
//! the previous key: it is demoted to `overlapping` with a bounded expiry so
//! signatures issued before the rotation keep verifying. Revocation is
//! terminal and overrides any time window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};
use trustgate_types::EntityId;

use crate::{KeyStoreError, PrivateKey, PublicKey, Signature};

pub type KeyStoreResult<T> = std::result::Result<T, KeyStoreError>;

/// Lifecycle status of one key version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Generated but not yet in use
    Pending,
    /// The key currently used for signing
    Active,
    /// Superseded, still valid for verification until its expiry
    Overlapping,
    /// Past its window; kept for historical verification
    Expired,
    /// Compromised or withdrawn; never valid again
    Revoked,
}

/// One version of an entity's signing key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVersion {
    /// Owning entity
    pub entity: EntityId,
    /// Monotonic version number starting at 1
    pub version: u32,
    /// Verification key
    pub public_key: PublicKey,
    /// Signing key, only held locally and never serialized
    #[serde(skip)]
    pub private_key: Option<PrivateKey>,
    /// Current status
    pub status: KeyStatus,
    /// When the version was created
    pub created_at: DateTime<Utc>,
    /// Start of the validity window
    pub activated_at: DateTime<Utc>,
    /// Inclusive end of the validity window; `None` while open-ended
    pub expires_at: Option<DateTime<Utc>>,
    /// When the version was revoked
    pub revoked_at: Option<DateTime<Utc>>,
    /// Reason given when this version was created by rotation or revoked
    pub rotation_reason: Option<String>,
    /// Version that replaced this one
    pub superseded_by: Option<u32>,
}

impl KeyVersion {
    fn new(entity: EntityId, version: u32, private_key: PrivateKey, now: DateTime<Utc>) -> Self {
        Self {
            entity,
            version,
            public_key: private_key.public_key(),
            private_key: Some(private_key),
            status: KeyStatus::Active,
            created_at: now,
            activated_at: now,
            expires_at: None,
            revoked_at: None,
            rotation_reason: None,
            superseded_by: None,
        }
    }

    /// Whether `timestamp` falls inside the window and the key is not revoked
    pub fn is_valid_at(&self, timestamp: DateTime<Utc>) -> bool {
        if self.status == KeyStatus::Revoked {
            return false;
        }
        if timestamp < self.activated_at {
            return false;
        }
        self.expires_at.map_or(true, |expiry| timestamp <= expiry)
    }

    pub fn can_sign(&self) -> bool {
        self.status == KeyStatus::Active && self.private_key.is_some()
    }
}

/// Key store configuration
#[derive(Debug, Clone)]
pub struct KeyStoreConfig {
    /// Overlap applied when a rotation does not specify one
    pub default_overlap: Duration,
    /// How long expired keys are retained before cleanup removes them
    pub expired_key_grace: Duration,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            default_overlap: Duration::days(30),
            expired_key_grace: Duration::days(90),
        }
    }
}

/// Serializable view of the store without private keys
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyStoreSnapshot {
    pub entities: BTreeMap<EntityId, Vec<KeyVersion>>,
}

/// Versioned key history for every registered entity
#[derive(Debug, Default)]
pub struct KeyVersionStore {
    config: KeyStoreConfig,
    entities: HashMap<EntityId, Vec<KeyVersion>>,
}

impl KeyVersionStore {
    pub fn new(config: KeyStoreConfig) -> Self {
        Self {
            config,
            entities: HashMap::new(),
        }
    }

    pub fn config(&self) -> &KeyStoreConfig {
        &self.config
    }

    pub fn is_registered(&self, entity: &EntityId) -> bool {
        self.entities.contains_key(entity)
    }

    pub fn register_initial(
        &mut self,
        entity: &EntityId,
        private_key: PrivateKey,
    ) -> KeyStoreResult<KeyVersion> {
        self.register_initial_at(entity, private_key, Utc::now())
    }

    /// Register version 1 for a new entity
    pub fn register_initial_at(
        &mut self,
        entity: &EntityId,
        private_key: PrivateKey,
        now: DateTime<Utc>,
    ) -> KeyStoreResult<KeyVersion> {
        if self.entities.contains_key(entity) {
            return Err(KeyStoreError::AlreadyRegistered(entity.clone()));
        }

        let key = KeyVersion::new(entity.clone(), 1, private_key, now);
        info!(entity = %entity, public_key = %key.public_key, "registered initial key");
        self.entities.insert(entity.clone(), vec![key.clone()]);
        Ok(key)
    }

    pub fn rotate(
        &mut self,
        entity: &EntityId,
        new_private_key: PrivateKey,
        overlap: Option<Duration>,
        reason: impl Into<String>,
    ) -> KeyStoreResult<KeyVersion> {
        let overlap = overlap.unwrap_or(self.config.default_overlap);
        self.rotate_at(entity, new_private_key, overlap, reason, Utc::now())
    }

    /// Install a new active version and demote the current one
    ///
    /// The previous active version becomes `overlapping` and stays valid for
    /// verification until `now + overlap`. Negative overlaps are treated as
    /// zero.
    pub fn rotate_at(
        &mut self,
        entity: &EntityId,
        new_private_key: PrivateKey,
        overlap: Duration,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> KeyStoreResult<KeyVersion> {
        let versions = self
            .entities
            .get_mut(entity)
            .ok_or_else(|| KeyStoreError::EntityNotRegistered(entity.clone()))?;

        let overlap = overlap.max(Duration::zero());
        let next_version = versions.iter().map(|k| k.version).max().unwrap_or(0) + 1;
        let reason = reason.into();

        for key in versions.iter_mut().filter(|k| k.status == KeyStatus::Active) {
            key.status = KeyStatus::Overlapping;
            key.expires_at = Some(now + overlap);
            key.superseded_by = Some(next_version);
            debug!(entity = %entity, version = key.version, "demoted key to overlapping");
        }

        let mut key = KeyVersion::new(entity.clone(), next_version, new_private_key, now);
        key.rotation_reason = Some(reason.clone());
        versions.push(key.clone());

        info!(
            entity = %entity,
            version = next_version,
            overlap_secs = overlap.num_seconds(),
            reason = %reason,
            "rotated key"
        );
        Ok(key)
    }

    pub fn revoke(
        &mut self,
        entity: &EntityId,
        version: u32,
        reason: impl Into<String>,
    ) -> KeyStoreResult<()> {
        self.revoke_at(entity, version, reason, Utc::now())
    }

    /// Revoke one version regardless of its current status or window
    pub fn revoke_at(
        &mut self,
        entity: &EntityId,
        version: u32,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> KeyStoreResult<()> {
        let versions = self
            .entities
            .get_mut(entity)
            .ok_or_else(|| KeyStoreError::EntityNotRegistered(entity.clone()))?;
        let key = versions
            .iter_mut()
            .find(|k| k.version == version)
            .ok_or_else(|| KeyStoreError::VersionNotFound {
                entity: entity.clone(),
                version,
            })?;

        if key.status == KeyStatus::Revoked {
            return Ok(());
        }

        let reason = reason.into();
        key.status = KeyStatus::Revoked;
        key.revoked_at = Some(now);
        key.private_key = None;
        warn!(entity = %entity, version, reason = %reason, "revoked key");
        key.rotation_reason = Some(reason);
        Ok(())
    }

    /// Highest non-revoked version whose window contains `timestamp`
    pub fn key_valid_at(&self, entity: &EntityId, timestamp: DateTime<Utc>) -> Option<&KeyVersion> {
        self.entities
            .get(entity)?
            .iter()
            .filter(|k| k.is_valid_at(timestamp))
            .max_by_key(|k| k.version)
    }

    /// The version currently used for signing
    pub fn current_key(&self, entity: &EntityId) -> Option<&KeyVersion> {
        self.entities
            .get(entity)?
            .iter()
            .filter(|k| k.status == KeyStatus::Active)
            .max_by_key(|k| k.version)
    }

    /// Verify `signature` with the key that was valid at `timestamp`
    ///
    /// Returns `false` when the entity is unknown or no key covers the
    /// timestamp.
    pub fn verify_signature(
        &self,
        entity: &EntityId,
        data: &[u8],
        signature: &Signature,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let Some(key) = self.key_valid_at(entity, timestamp) else {
            debug!(entity = %entity, %timestamp, "no valid key at timestamp");
            return false;
        };

        let valid = key.public_key.verify(data, signature);
        if !valid {
            warn!(entity = %entity, version = key.version, "signature verification failed");
        }
        valid
    }

    /// Sign with the current active key, returning the version used
    pub fn sign(&self, entity: &EntityId, data: &[u8]) -> KeyStoreResult<(Signature, u32)> {
        if !self.is_registered(entity) {
            return Err(KeyStoreError::EntityNotRegistered(entity.clone()));
        }
        let key = self
            .current_key(entity)
            .ok_or_else(|| KeyStoreError::NoActiveKey(entity.clone()))?;
        let private_key =
            key.private_key
                .as_ref()
                .ok_or_else(|| KeyStoreError::PrivateKeyUnavailable {
                    entity: entity.clone(),
                    version: key.version,
                })?;
        Ok((private_key.sign(data), key.version))
    }

    /// All versions of an entity ordered by version
    pub fn key_history(&self, entity: &EntityId) -> Vec<&KeyVersion> {
        let mut history: Vec<&KeyVersion> = self
            .entities
            .get(entity)
            .map(|versions| versions.iter().collect())
            .unwrap_or_default();
        history.sort_by_key(|k| k.version);
        history
    }

    pub fn expire_elapsed(&mut self) -> usize {
        self.expire_elapsed_at(Utc::now())
    }

    /// Mark overlapping keys whose window has closed as expired
    pub fn expire_elapsed_at(&mut self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for key in self.entities.values_mut().flatten() {
            if key.status == KeyStatus::Overlapping && key.expires_at.is_some_and(|e| e < now) {
                key.status = KeyStatus::Expired;
                key.private_key = None;
                expired += 1;
            }
        }
        if expired > 0 {
            info!(count = expired, "expired overlapping keys");
        }
        expired
    }

    pub fn cleanup_expired(&mut self) -> usize {
        self.cleanup_expired_at(self.config.expired_key_grace, Utc::now())
    }

    /// Drop expired versions whose window closed more than `grace` ago
    ///
    /// Revoked versions are retained for audit.
    pub fn cleanup_expired_at(&mut self, grace: Duration, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for versions in self.entities.values_mut() {
            let before = versions.len();
            versions.retain(|k| {
                !(k.status == KeyStatus::Expired && k.expires_at.is_some_and(|e| e + grace < now))
            });
            removed += before - versions.len();
        }
        if removed > 0 {
            info!(count = removed, "removed expired keys past grace period");
        }
        removed
    }

    /// Export public key history; private keys are omitted
    pub fn snapshot(&self) -> KeyStoreSnapshot {
        KeyStoreSnapshot {
            entities: self
                .entities
                .iter()
                .map(|(entity, versions)| (entity.clone(), versions.clone()))
                .collect(),
        }
    }

    /// Rebuild a verification-only store from a snapshot
    pub fn from_snapshot(config: KeyStoreConfig, snapshot: KeyStoreSnapshot) -> Self {
        Self {
            config,
            entities: snapshot.entities.into_iter().collect(),
        }
    }
}
