use thiserror::Error;
use trustgate_crypto::{CryptoError, KeyStoreError};
use trustgate_types::{Classify, ErrorClass};

/// Errors that can occur during verification
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Delegation not found: {0}")]
    DelegationNotFound(String),

    #[error("Delegation already exists: {0}")]
    DuplicateDelegation(String),

    #[error("Delegation {id} is not in effect: {reason}")]
    DelegationInactive { id: String, reason: String },

    #[error("Budget exceeded for {id}: requested {requested}, remaining {remaining}")]
    BudgetExceeded {
        id: String,
        requested: u64,
        remaining: u64,
    },

    #[error("Invalid resource pattern: {0}")]
    InvalidPattern(String),

    #[error("Audit sink error: {0}")]
    AuditSink(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

impl Classify for VerifyError {
    fn class(&self) -> ErrorClass {
        match self {
            VerifyError::DelegationNotFound(_) | VerifyError::DuplicateDelegation(_) => {
                ErrorClass::State
            }
            VerifyError::DelegationInactive { .. }
            | VerifyError::BudgetExceeded { .. }
            | VerifyError::InvalidPattern(_) => ErrorClass::Validation,
            VerifyError::AuditSink(_) => ErrorClass::Transaction,
            VerifyError::Crypto(e) => e.class(),
            VerifyError::KeyStore(e) => e.class(),
        }
    }
}
