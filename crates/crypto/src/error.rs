use thiserror::Error;
use trustgate_types::{Classify, EntityId, ErrorClass};

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<ed25519_dalek::ed25519::Error> for CryptoError {
    fn from(err: ed25519_dalek::ed25519::Error) -> Self {
        CryptoError::InvalidSignature(err.to_string())
    }
}

impl From<hex::FromHexError> for CryptoError {
    fn from(err: hex::FromHexError) -> Self {
        CryptoError::EncodingError(err.to_string())
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::EncodingError(err.to_string())
    }
}

impl Classify for CryptoError {
    fn class(&self) -> ErrorClass {
        match self {
            CryptoError::InternalError(_) => ErrorClass::State,
            _ => ErrorClass::Validation,
        }
    }
}

/// Errors raised by the key version store
#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("Entity not registered: {0}")]
    EntityNotRegistered(EntityId),

    #[error("Entity already registered: {0}")]
    AlreadyRegistered(EntityId),

    #[error("Key version {version} not found for {entity}")]
    VersionNotFound { entity: EntityId, version: u32 },

    #[error("No active key for {0}")]
    NoActiveKey(EntityId),

    #[error("Private key not available for {entity} v{version}")]
    PrivateKeyUnavailable { entity: EntityId, version: u32 },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl Classify for KeyStoreError {
    fn class(&self) -> ErrorClass {
        match self {
            KeyStoreError::Crypto(e) => e.class(),
            _ => ErrorClass::State,
        }
    }
}
