//! Write-behind batching of trust deltas with Merkle anchoring.
//!
//! Updates accumulate per (entity, organization) under one mutex. A flush
//! drains the pending map, builds one Merkle leaf per entry, and commits the
//! whole batch in a single ledger transaction. A failed commit is retried
//! once; if it fails again the entries are merged back into pending so no
//! delta is lost.
//!
//! The background worker wakes on a jittered interval so flush timing does
//! not leak when updates happen.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trustgate_crypto::{canonical_bytes, MerkleProof, MerkleTree};
use trustgate_types::{EntityId, OrganizationId};

use crate::engine::ReputationDelta;
use crate::error::BatchError;
use crate::store::{LedgerUpdate, TrustLedgerStore};

pub type BatchResult<T> = std::result::Result<T, BatchError>;

/// Batcher configuration
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Nominal time between background flushes
    pub flush_interval: StdDuration,
    /// Uniform +/- jitter applied to every interval
    pub flush_jitter: StdDuration,
    /// Upper bound of the extra execution noise added to every interval
    pub execution_noise: StdDuration,
    /// Pending entries that trigger an early flush
    pub max_batch_size: usize,
    /// Updates accepted per entity per rate window
    pub max_updates_per_window: u32,
    /// Length of the per-entity rate window
    pub rate_window: Duration,
    /// Distinct pending entries across all entities
    pub max_pending_total: usize,
    /// Updates accumulated for one entry before further ones are refused
    pub max_pending_per_entity: u32,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval: StdDuration::from_secs(60),
            flush_jitter: StdDuration::from_secs(10),
            execution_noise: StdDuration::from_millis(50),
            max_batch_size: 100,
            max_updates_per_window: 60,
            rate_window: Duration::seconds(60),
            max_pending_total: 10_000,
            max_pending_per_entity: 100,
        }
    }
}

/// The six trust components carried by one update
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaFields {
    pub talent: f64,
    pub training: f64,
    pub temperament: f64,
    pub veracity: f64,
    pub validity: f64,
    pub value: f64,
    /// Counted toward the action total
    pub actions: u32,
    /// Counted toward the transaction total
    pub transactions: u32,
}

impl DeltaFields {
    pub fn t3(talent: f64, training: f64, temperament: f64) -> Self {
        Self {
            talent,
            training,
            temperament,
            actions: 1,
            ..Default::default()
        }
    }

    pub fn v3(veracity: f64, validity: f64, value: f64) -> Self {
        Self {
            veracity,
            validity,
            value,
            transactions: 1,
            ..Default::default()
        }
    }
}

impl From<&ReputationDelta> for DeltaFields {
    fn from(delta: &ReputationDelta) -> Self {
        Self {
            talent: delta.delta_talent,
            training: delta.delta_training,
            temperament: delta.delta_temperament,
            veracity: delta.delta_veracity,
            validity: delta.delta_validity,
            value: delta.delta_value,
            actions: 1,
            transactions: 1,
        }
    }
}

/// Accumulated, not yet committed deltas for one (entity, organization)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelta {
    pub fields: DeltaFields,
    /// Number of `record` calls folded into this entry
    pub updates: u32,
    pub first_update: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl PendingDelta {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            fields: DeltaFields::default(),
            updates: 0,
            first_update: now,
            last_update: now,
        }
    }

    fn accumulate(&mut self, fields: &DeltaFields, now: DateTime<Utc>) {
        self.fields.talent += fields.talent;
        self.fields.training += fields.training;
        self.fields.temperament += fields.temperament;
        self.fields.veracity += fields.veracity;
        self.fields.validity += fields.validity;
        self.fields.value += fields.value;
        self.fields.actions += fields.actions;
        self.fields.transactions += fields.transactions;
        self.updates += 1;
        self.last_update = self.last_update.max(now);
    }

    fn merge(&mut self, other: &PendingDelta) {
        self.fields.talent += other.fields.talent;
        self.fields.training += other.fields.training;
        self.fields.temperament += other.fields.temperament;
        self.fields.veracity += other.fields.veracity;
        self.fields.validity += other.fields.validity;
        self.fields.value += other.fields.value;
        self.fields.actions += other.fields.actions;
        self.fields.transactions += other.fields.transactions;
        self.updates += other.updates;
        self.first_update = self.first_update.min(other.first_update);
        self.last_update = self.last_update.max(other.last_update);
    }
}

/// Result of a successful `record`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordReceipt {
    /// Distinct pending entries after this update
    pub pending_entries: usize,
    /// The batch reached its size limit and an early flush was signalled
    pub flush_due: bool,
}

/// Summary of a committed flush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushReport {
    pub merkle_root: String,
    pub entries: usize,
    pub flushed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_updates_recorded: u64,
    pub total_flushes: u64,
    pub total_entities_flushed: u64,
    pub flush_errors: u64,
    pub commit_retries: u64,
    pub rate_limit_rejections: u64,
    pub pending_limit_rejections: u64,
    pub merkle_roots_generated: u64,
    pub last_flush_time: Option<DateTime<Utc>>,
    pub pending_count: usize,
}

type EntryKey = (EntityId, OrganizationId);

#[derive(Debug)]
struct AnchoredFlush {
    tree: MerkleTree,
    keys: Vec<EntryKey>,
}

#[derive(Debug, Default)]
struct BatchState {
    pending: BTreeMap<EntryKey, PendingDelta>,
    rate_windows: HashMap<EntityId, (u32, DateTime<Utc>)>,
    stats: BatchStats,
    last_flush: Option<AnchoredFlush>,
    roots: Vec<String>,
}

/// Deterministic flush timing source
///
/// Each delay is `interval ± jitter` plus `[0, noise]`, drawn from a seeded
/// ChaCha8 stream so a given seed always yields the same schedule.
#[derive(Debug, Clone)]
pub struct JitterSchedule {
    rng: ChaCha8Rng,
    interval_ms: i64,
    jitter_ms: i64,
    noise_ms: i64,
}

impl JitterSchedule {
    pub fn new(config: &BatcherConfig, seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            interval_ms: duration_ms(config.flush_interval),
            jitter_ms: duration_ms(config.flush_jitter),
            noise_ms: duration_ms(config.execution_noise),
        }
    }

    pub fn next_delay(&mut self) -> StdDuration {
        let jitter = self.rng.gen_range(-self.jitter_ms..=self.jitter_ms);
        let noise = self.rng.gen_range(0..=self.noise_ms);
        let total = (self.interval_ms + jitter + noise).max(0);
        StdDuration::from_millis(total as u64)
    }
}

fn duration_ms(d: StdDuration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX / 4)
}

/// Accumulates trust deltas and commits them in anchored batches
pub struct TrustUpdateBatcher {
    config: BatcherConfig,
    store: Arc<dyn TrustLedgerStore>,
    state: Mutex<BatchState>,
    flush_signal: Notify,
    flush_lock: tokio::sync::Mutex<()>,
}

impl TrustUpdateBatcher {
    pub fn new(config: BatcherConfig, store: Arc<dyn TrustLedgerStore>) -> Self {
        Self {
            config,
            store,
            state: Mutex::new(BatchState::default()),
            flush_signal: Notify::new(),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(
        &self,
        entity: &EntityId,
        organization: &OrganizationId,
        fields: DeltaFields,
    ) -> BatchResult<RecordReceipt> {
        self.record_at(entity, organization, fields, Utc::now())
    }

    /// Accumulate one update in memory
    ///
    /// Rejects with a retriable limit error when the entity exceeded its
    /// rate window or a pending cap would be exceeded.
    pub fn record_at(
        &self,
        entity: &EntityId,
        organization: &OrganizationId,
        fields: DeltaFields,
        now: DateTime<Utc>,
    ) -> BatchResult<RecordReceipt> {
        let mut state = self.lock_state();

        if !self.rate_available(&mut state, entity, now) {
            state.stats.rate_limit_rejections += 1;
            warn!(entity = %entity, "trust update rate limit exceeded");
            return Err(BatchError::RateLimited(entity.clone()));
        }

        let key = (entity.clone(), organization.clone());
        let within_limits = match state.pending.get(&key) {
            Some(existing) => existing.updates < self.config.max_pending_per_entity,
            None => state.pending.len() < self.config.max_pending_total,
        };
        if !within_limits {
            state.stats.pending_limit_rejections += 1;
            warn!(entity = %entity, organization = %organization, "pending trust limit exceeded");
            return Err(BatchError::PendingLimit {
                entity: entity.clone(),
                organization: organization.clone(),
            });
        }

        if let Some(window) = state.rate_windows.get_mut(entity) {
            window.0 += 1;
        }
        Ok(self.accumulate(state, key, &fields, now))
    }

    /// Accumulate an adjudicated update, bypassing rate and pending limits
    ///
    /// Penalties must reach the ledger even when the entity has exhausted its
    /// update allowance.
    pub fn record_adjudicated_at(
        &self,
        entity: &EntityId,
        organization: &OrganizationId,
        fields: DeltaFields,
        now: DateTime<Utc>,
    ) -> RecordReceipt {
        let state = self.lock_state();
        debug!(entity = %entity, organization = %organization, "recording adjudicated trust update");
        self.accumulate(state, (entity.clone(), organization.clone()), &fields, now)
    }

    fn accumulate(
        &self,
        mut state: MutexGuard<'_, BatchState>,
        key: EntryKey,
        fields: &DeltaFields,
        now: DateTime<Utc>,
    ) -> RecordReceipt {
        state
            .pending
            .entry(key)
            .or_insert_with(|| PendingDelta::new(now))
            .accumulate(fields, now);
        state.stats.total_updates_recorded += 1;

        let pending_entries = state.pending.len();
        let flush_due = pending_entries >= self.config.max_batch_size;
        drop(state);

        if flush_due {
            debug!(pending_entries, "batch full, signalling early flush");
            self.flush_signal.notify_one();
        }

        RecordReceipt {
            pending_entries,
            flush_due,
        }
    }

    /// Roll the entity's window forward if it elapsed and report whether a
    /// slot is free; the slot is only taken once the update is accepted
    fn rate_available(&self, state: &mut BatchState, entity: &EntityId, now: DateTime<Utc>) -> bool {
        let window = state
            .rate_windows
            .entry(entity.clone())
            .or_insert((0, now));
        if now - window.1 >= self.config.rate_window {
            *window = (0, now);
        }
        window.0 < self.config.max_updates_per_window
    }

    fn prune_rate_windows(&self, state: &mut BatchState, now: DateTime<Utc>) {
        let rate_window = self.config.rate_window;
        state
            .rate_windows
            .retain(|_, (_, started)| now - *started < rate_window);
    }

    pub async fn flush(&self) -> BatchResult<Option<FlushReport>> {
        self.flush_at(Utc::now()).await
    }

    /// Commit everything pending as one anchored batch
    ///
    /// Returns `Ok(None)` without touching root history when nothing is
    /// pending.
    pub async fn flush_at(&self, now: DateTime<Utc>) -> BatchResult<Option<FlushReport>> {
        let _flushing = self.flush_lock.lock().await;

        let batch = {
            let mut state = self.lock_state();
            self.prune_rate_windows(&mut state, now);
            if state.pending.is_empty() {
                return Ok(None);
            }
            std::mem::take(&mut state.pending)
        };

        let updates: Vec<LedgerUpdate> = batch
            .iter()
            .map(|((entity, organization), pending)| LedgerUpdate {
                entity: entity.clone(),
                organization: organization.clone(),
                talent: pending.fields.talent,
                training: pending.fields.training,
                temperament: pending.fields.temperament,
                veracity: pending.fields.veracity,
                validity: pending.fields.validity,
                value: pending.fields.value,
                action_count: pending.fields.actions,
                transaction_count: pending.fields.transactions,
                flushed_at: now,
            })
            .collect();

        let leaves = match updates.iter().map(canonical_bytes).collect::<Result<Vec<_>, _>>() {
            Ok(leaves) => leaves,
            Err(e) => {
                self.requeue(batch);
                return Err(e.into());
            }
        };
        let tree = MerkleTree::from_data(&leaves);

        let mut attempt_result = self.store.commit_batch(&updates).await;
        if let Err(e) = &attempt_result {
            warn!(error = %e, entries = updates.len(), "trust commit failed, retrying once");
            self.lock_state().stats.commit_retries += 1;
            attempt_result = self.store.commit_batch(&updates).await;
        }

        if let Err(source) = attempt_result {
            error!(error = %source, entries = updates.len(), "trust commit failed, requeueing batch");
            self.requeue(batch);
            return Err(BatchError::CommitFailed {
                attempts: 2,
                source,
            });
        }

        let report = FlushReport {
            merkle_root: tree.root_hex(),
            entries: updates.len(),
            flushed_at: now,
        };

        let mut state = self.lock_state();
        state.stats.total_flushes += 1;
        state.stats.total_entities_flushed += updates.len() as u64;
        state.stats.merkle_roots_generated += 1;
        state.stats.last_flush_time = Some(now);
        state.roots.push(report.merkle_root.clone());
        state.last_flush = Some(AnchoredFlush {
            tree,
            keys: batch.into_keys().collect(),
        });
        drop(state);

        info!(entries = report.entries, root = %report.merkle_root, "flushed trust updates");
        Ok(Some(report))
    }

    fn requeue(&self, batch: BTreeMap<EntryKey, PendingDelta>) {
        let mut state = self.lock_state();
        state.stats.flush_errors += 1;
        for (key, pending) in batch {
            match state.pending.get_mut(&key) {
                Some(existing) => existing.merge(&pending),
                None => {
                    state.pending.insert(key, pending);
                }
            }
        }
    }

    /// Inclusion proof for an entry of the most recent flush only
    pub fn get_proof(&self, entity: &EntityId, organization: &OrganizationId) -> Option<MerkleProof> {
        let state = self.lock_state();
        let last = state.last_flush.as_ref()?;
        let index = last
            .keys
            .iter()
            .position(|(e, o)| e == entity && o == organization)?;
        last.tree.proof(index)
    }

    pub fn last_root(&self) -> Option<String> {
        self.lock_state().roots.last().cloned()
    }

    /// Every root produced so far, oldest first
    pub fn merkle_roots(&self) -> Vec<String> {
        self.lock_state().roots.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn pending_entry(&self, entity: &EntityId, organization: &OrganizationId) -> Option<PendingDelta> {
        self.lock_state()
            .pending
            .get(&(entity.clone(), organization.clone()))
            .cloned()
    }

    pub fn stats(&self) -> BatchStats {
        let state = self.lock_state();
        BatchStats {
            pending_count: state.pending.len(),
            ..state.stats.clone()
        }
    }

    /// Start the background flush worker
    pub fn spawn(self: &Arc<Self>, mut schedule: JitterSchedule) -> BatcherHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let batcher = Arc::clone(self);

        let task = tokio::spawn(async move {
            loop {
                let delay = schedule.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = batcher.flush_signal.notified() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if let Err(e) = batcher.flush().await {
                    error!(error = %e, "background trust flush failed");
                }
            }
            debug!("trust flush worker stopped");
        });

        BatcherHandle {
            batcher: Arc::clone(self),
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }
}

/// Handle to a running flush worker
pub struct BatcherHandle {
    batcher: Arc<TrustUpdateBatcher>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl BatcherHandle {
    pub fn batcher(&self) -> &Arc<TrustUpdateBatcher> {
        &self.batcher
    }

    /// Cancel the timer, wait for the worker and run one final flush
    pub async fn stop(mut self) -> BatchResult<Option<FlushReport>> {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| BatchError::Worker(e.to_string()))?;
        }
        self.batcher.flush().await
    }
}

impl Drop for BatcherHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{InMemoryTrustLedger, MockTrustLedgerStore};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn batcher_with(config: BatcherConfig) -> (TrustUpdateBatcher, Arc<InMemoryTrustLedger>) {
        let ledger = Arc::new(InMemoryTrustLedger::new());
        (TrustUpdateBatcher::new(config, ledger.clone()), ledger)
    }

    fn ids(entity: &str) -> (EntityId, OrganizationId) {
        (EntityId::new(entity), OrganizationId::new("org"))
    }

    #[tokio::test]
    async fn test_accumulates_per_entry() {
        let (batcher, _) = batcher_with(BatcherConfig::default());
        let (e, o) = ids("alice");
        batcher.record_at(&e, &o, DeltaFields::t3(0.01, 0.0, 0.0), t0()).unwrap();
        batcher.record_at(&e, &o, DeltaFields::t3(0.02, 0.0, 0.0), t0()).unwrap();
        batcher.record_at(&e, &o, DeltaFields::v3(0.0, 0.0, 0.5), t0()).unwrap();

        let pending = batcher.pending_entry(&e, &o).unwrap();
        assert!((pending.fields.talent - 0.03).abs() < 1e-12);
        assert_eq!(pending.fields.actions, 2);
        assert_eq!(pending.fields.transactions, 1);
        assert_eq!(pending.updates, 3);
        assert_eq!(batcher.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_flush_keeps_root_history() {
        let (batcher, _) = batcher_with(BatcherConfig::default());
        assert_eq!(batcher.flush_at(t0()).await.unwrap(), None);
        assert!(batcher.merkle_roots().is_empty());
        assert_eq!(batcher.stats().total_flushes, 0);
    }

    #[tokio::test]
    async fn test_flush_commits_and_anchors() {
        let (batcher, ledger) = batcher_with(BatcherConfig::default());
        for name in ["alice", "bob", "carol"] {
            let (e, o) = ids(name);
            batcher.record_at(&e, &o, DeltaFields::t3(0.1, 0.0, 0.0), t0()).unwrap();
        }

        let report = batcher.flush_at(t0()).await.unwrap().unwrap();
        assert_eq!(report.entries, 3);
        assert_eq!(batcher.pending_count(), 0);
        assert_eq!(batcher.merkle_roots(), vec![report.merkle_root.clone()]);

        let (e, o) = ids("bob");
        let row = ledger.row(&e, &o).unwrap();
        assert!((row.t3.talent - 0.6).abs() < 1e-12);

        let proof = batcher.get_proof(&e, &o).unwrap();
        assert!(proof.verify());
        assert_eq!(proof.root_hex(), report.merkle_root);
        assert!(batcher.get_proof(&EntityId::new("zed"), &o).is_none());
    }

    #[tokio::test]
    async fn test_proofs_only_for_latest_flush() {
        let (batcher, _) = batcher_with(BatcherConfig::default());
        let (a, o) = ids("alice");
        let (b, _) = ids("bob");
        batcher.record_at(&a, &o, DeltaFields::t3(0.1, 0.0, 0.0), t0()).unwrap();
        batcher.flush_at(t0()).await.unwrap();
        batcher.record_at(&b, &o, DeltaFields::t3(0.1, 0.0, 0.0), t0()).unwrap();
        batcher.flush_at(t0()).await.unwrap();

        assert!(batcher.get_proof(&a, &o).is_none());
        assert!(batcher.get_proof(&b, &o).is_some());
        assert_eq!(batcher.merkle_roots().len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_per_entity() {
        let (batcher, _) = batcher_with(BatcherConfig {
            max_updates_per_window: 3,
            ..Default::default()
        });
        let (e, o) = ids("alice");
        for _ in 0..3 {
            batcher.record_at(&e, &o, DeltaFields::t3(0.0, 0.0, 0.01), t0()).unwrap();
        }
        let err = batcher.record_at(&e, &o, DeltaFields::t3(0.0, 0.0, 0.01), t0()).unwrap_err();
        assert!(matches!(err, BatchError::RateLimited(_)));
        assert!(trustgate_types::Classify::is_retriable(&err));

        // Other entities are unaffected
        let (other, _) = ids("bob");
        assert!(batcher.record_at(&other, &o, DeltaFields::t3(0.0, 0.0, 0.01), t0()).is_ok());

        // Window resets
        let later = t0() + Duration::seconds(61);
        assert!(batcher.record_at(&e, &o, DeltaFields::t3(0.0, 0.0, 0.01), later).is_ok());
        assert_eq!(batcher.stats().rate_limit_rejections, 1);
    }

    #[tokio::test]
    async fn test_pending_caps() {
        let (batcher, _) = batcher_with(BatcherConfig {
            max_pending_total: 2,
            max_pending_per_entity: 2,
            ..Default::default()
        });
        let o = OrganizationId::new("org");
        batcher.record_at(&EntityId::new("a"), &o, DeltaFields::t3(0.0, 0.0, 0.0), t0()).unwrap();
        batcher.record_at(&EntityId::new("b"), &o, DeltaFields::t3(0.0, 0.0, 0.0), t0()).unwrap();
        assert!(matches!(
            batcher.record_at(&EntityId::new("c"), &o, DeltaFields::t3(0.0, 0.0, 0.0), t0()),
            Err(BatchError::PendingLimit { .. })
        ));

        batcher.record_at(&EntityId::new("a"), &o, DeltaFields::t3(0.0, 0.0, 0.0), t0()).unwrap();
        assert!(matches!(
            batcher.record_at(&EntityId::new("a"), &o, DeltaFields::t3(0.0, 0.0, 0.0), t0()),
            Err(BatchError::PendingLimit { .. })
        ));
        assert_eq!(batcher.stats().pending_limit_rejections, 2);
    }

    #[tokio::test]
    async fn test_pending_rejection_keeps_rate_slot() {
        let (batcher, _) = batcher_with(BatcherConfig {
            max_updates_per_window: 2,
            max_pending_total: 1,
            ..Default::default()
        });
        let o = OrganizationId::new("org");
        let b = EntityId::new("b");
        batcher.record_at(&EntityId::new("a"), &o, DeltaFields::default(), t0()).unwrap();
        assert!(matches!(
            batcher.record_at(&b, &o, DeltaFields::default(), t0()),
            Err(BatchError::PendingLimit { .. })
        ));

        batcher.flush_at(t0()).await.unwrap();
        batcher.record_at(&b, &o, DeltaFields::default(), t0()).unwrap();
        assert!(matches!(
            batcher.record_at(&b, &o, DeltaFields::default(), t0()),
            Err(BatchError::PendingLimit { .. })
        ));
        assert_eq!(batcher.stats().rate_limit_rejections, 0);

        batcher.flush_at(t0()).await.unwrap();
        batcher.record_at(&b, &o, DeltaFields::default(), t0()).unwrap();
        assert!(matches!(
            batcher.record_at(&b, &o, DeltaFields::default(), t0()),
            Err(BatchError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_flush_prunes_elapsed_rate_windows() {
        let (batcher, _) = batcher_with(BatcherConfig::default());
        let (a, o) = ids("alice");
        let (b, _) = ids("bob");
        batcher.record_at(&a, &o, DeltaFields::default(), t0()).unwrap();
        batcher.record_at(&b, &o, DeltaFields::default(), t0() + Duration::seconds(30)).unwrap();

        batcher.flush_at(t0() + Duration::seconds(61)).await.unwrap();
        let state = batcher.lock_state();
        assert_eq!(state.rate_windows.len(), 1);
        assert!(state.rate_windows.contains_key(&b));
    }

    #[tokio::test]
    async fn test_adjudicated_update_bypasses_limits() {
        let (batcher, ledger) = batcher_with(BatcherConfig {
            max_updates_per_window: 1,
            max_pending_per_entity: 1,
            ..Default::default()
        });
        let (e, o) = ids("mallory");
        batcher.record_at(&e, &o, DeltaFields::t3(0.1, 0.0, 0.0), t0()).unwrap();
        assert!(batcher.record_at(&e, &o, DeltaFields::t3(0.1, 0.0, 0.0), t0()).is_err());

        batcher.record_adjudicated_at(&e, &o, DeltaFields::t3(-0.5, -0.5, -0.5), t0());
        assert_eq!(batcher.pending_entry(&e, &o).unwrap().updates, 2);

        batcher.flush_at(t0()).await.unwrap();
        let row = ledger.row(&e, &o).unwrap();
        assert!((row.t3.talent - 0.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_full_batch_signals_flush() {
        let (batcher, _) = batcher_with(BatcherConfig {
            max_batch_size: 2,
            ..Default::default()
        });
        let o = OrganizationId::new("org");
        let first = batcher.record_at(&EntityId::new("a"), &o, DeltaFields::default(), t0()).unwrap();
        assert!(!first.flush_due);
        let second = batcher.record_at(&EntityId::new("b"), &o, DeltaFields::default(), t0()).unwrap();
        assert!(second.flush_due);
    }

    #[tokio::test]
    async fn test_commit_retried_once_then_succeeds() {
        let mut store = MockTrustLedgerStore::new();
        let mut calls = 0;
        store.expect_commit_batch().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(StoreError("deadlock".into()))
            } else {
                Ok(())
            }
        });

        let batcher = TrustUpdateBatcher::new(BatcherConfig::default(), Arc::new(store));
        let (e, o) = ids("alice");
        batcher.record_at(&e, &o, DeltaFields::t3(0.1, 0.0, 0.0), t0()).unwrap();

        assert!(batcher.flush_at(t0()).await.unwrap().is_some());
        assert_eq!(batcher.stats().commit_retries, 1);
        assert_eq!(batcher.stats().flush_errors, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_requeues_and_merges() {
        let mut store = MockTrustLedgerStore::new();
        store
            .expect_commit_batch()
            .times(2)
            .returning(|_| Err(StoreError("unavailable".into())));

        let batcher = TrustUpdateBatcher::new(BatcherConfig::default(), Arc::new(store));
        let (e, o) = ids("alice");
        batcher.record_at(&e, &o, DeltaFields::t3(0.1, 0.0, 0.0), t0()).unwrap();

        let err = batcher.flush_at(t0()).await.unwrap_err();
        assert!(matches!(err, BatchError::CommitFailed { attempts: 2, .. }));
        assert!(trustgate_types::Classify::is_retriable(&err));
        assert!(batcher.merkle_roots().is_empty());

        // Requeued entry merges with new updates
        batcher
            .record_at(&e, &o, DeltaFields::t3(0.2, 0.0, 0.0), t0() + Duration::seconds(1))
            .unwrap();
        let pending = batcher.pending_entry(&e, &o).unwrap();
        assert!((pending.fields.talent - 0.3).abs() < 1e-12);
        assert_eq!(pending.updates, 2);
        assert_eq!(pending.first_update, t0());
        assert_eq!(batcher.stats().flush_errors, 1);
    }

    #[test]
    fn test_jitter_schedule_is_seeded_and_bounded() {
        let config = BatcherConfig::default();
        let mut a = JitterSchedule::new(&config, 7);
        let mut b = JitterSchedule::new(&config, 7);
        for _ in 0..50 {
            let delay = a.next_delay();
            assert_eq!(delay, b.next_delay());
            assert!(delay >= StdDuration::from_secs(50));
            assert!(delay <= StdDuration::from_millis(70_050));
        }
    }

    #[tokio::test]
    async fn test_worker_flushes_early_and_on_stop() {
        let ledger = Arc::new(InMemoryTrustLedger::new());
        let batcher = Arc::new(TrustUpdateBatcher::new(
            BatcherConfig {
                max_batch_size: 1,
                ..Default::default()
            },
            ledger.clone(),
        ));
        let handle = batcher.spawn(JitterSchedule::new(batcher.config(), 1));

        let (e, o) = ids("alice");
        let receipt = batcher.record(&e, &o, DeltaFields::t3(0.1, 0.0, 0.0)).unwrap();
        assert!(receipt.flush_due);

        for _ in 0..100 {
            if ledger.row(&e, &o).is_some() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert!(ledger.row(&e, &o).is_some());

        let (b, _) = ids("bob");
        batcher.record(&b, &o, DeltaFields::t3(0.1, 0.0, 0.0)).unwrap();
        let _ = handle.stop().await.unwrap();
        assert!(ledger.row(&b, &o).is_some());
        assert_eq!(batcher.pending_count(), 0);
    }
}
