use thiserror::Error;
use trustgate_crypto::KeyStoreError;
use trustgate_trust::{BatchError, TrustError};
use trustgate_types::{Classify, ErrorClass};
use trustgate_verify::VerifyError;

/// Errors surfaced by the engine facade
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] validator::ValidationErrors),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Verify(#[from] VerifyError),
}

impl Classify for CoreError {
    fn class(&self) -> ErrorClass {
        match self {
            CoreError::Config(_) | CoreError::InvalidConfig(_) | CoreError::Serialization(_) => {
                ErrorClass::Validation
            }
            CoreError::Persistence(_) => ErrorClass::Transaction,
            CoreError::KeyStore(e) => e.class(),
            CoreError::Trust(e) => e.class(),
            CoreError::Batch(e) => e.class(),
            CoreError::Verify(e) => e.class(),
        }
    }
}
