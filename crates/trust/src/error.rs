use thiserror::Error;
use trustgate_types::{Classify, EntityId, ErrorClass, OrganizationId};

/// Errors that can occur during trust operations
#[derive(Error, Debug)]
pub enum TrustError {
    #[error("Invalid trust score: {0}")]
    InvalidTrustScore(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for TrustError {
    fn from(err: serde_json::Error) -> Self {
        TrustError::InternalError(err.to_string())
    }
}

impl From<trustgate_crypto::CryptoError> for TrustError {
    fn from(err: trustgate_crypto::CryptoError) -> Self {
        TrustError::InternalError(err.to_string())
    }
}

impl Classify for TrustError {
    fn class(&self) -> ErrorClass {
        match self {
            TrustError::InternalError(_) => ErrorClass::State,
            _ => ErrorClass::Validation,
        }
    }
}

/// Failure reported by a trust ledger backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Storage failure: {0}")]
pub struct StoreError(pub String);

/// Errors raised by the update batcher
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Rate limit exceeded for {0}")]
    RateLimited(EntityId),

    #[error("Pending limit exceeded for {entity}:{organization}")]
    PendingLimit {
        entity: EntityId,
        organization: OrganizationId,
    },

    #[error("Commit failed after {attempts} attempts, updates requeued: {source}")]
    CommitFailed {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Leaf encoding failed: {0}")]
    Encoding(#[from] trustgate_crypto::CryptoError),

    #[error("Flush worker failed: {0}")]
    Worker(String),
}

impl Classify for BatchError {
    fn class(&self) -> ErrorClass {
        match self {
            BatchError::RateLimited(_) | BatchError::PendingLimit { .. } => ErrorClass::Limit,
            BatchError::CommitFailed { .. } => ErrorClass::Transaction,
            BatchError::Encoding(_) => ErrorClass::Validation,
            BatchError::Worker(_) => ErrorClass::State,
        }
    }
}
