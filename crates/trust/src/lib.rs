//! Trust accounting for trustgate
//!
//! This crate implements:
//! - T3 (talent, training, temperament) and V3 (veracity, validity, value) tensors
//! - Outcome scoring with witness, consistency and novelty multipliers
//! - Diminishing returns, idle decay and gaming detection
//! - Write-behind batching of trust deltas anchored in Merkle roots

pub mod batcher;
pub mod engine;
mod error;
mod score;
pub mod store;

pub use batcher::{
    BatchStats, BatcherConfig, BatcherHandle, DeltaFields, FlushReport, JitterSchedule,
    PendingDelta, RecordReceipt, TrustUpdateBatcher,
};
pub use engine::{
    ActionOutcome, GamingSignal, ReputationConfig, ReputationDelta, ReputationEngine, TrustProfile,
};
pub use error::{BatchError, StoreError, TrustError};
pub use score::{OutcomeType, T3Tensor, V3Tensor};
pub use store::{InMemoryTrustLedger, LedgerRow, LedgerUpdate, TrustLedgerStore};

/// Result type for trust operations
pub type Result<T> = std::result::Result<T, TrustError>;
