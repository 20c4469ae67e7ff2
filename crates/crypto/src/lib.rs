//! Cryptographic building blocks for trustgate
//!
//! This crate provides:
//! - Ed25519 key material with hex exchange formats
//! - Detached signatures over canonical JSON bytes
//! - A per-entity key version store answering "which key was valid at T"
//! - Domain-separated Merkle trees with inclusion proofs

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

pub mod canonical;
mod error;
pub mod keys;
pub mod merkle;
mod signatures;

pub use canonical::{canonical_bytes, canonical_string};
pub use error::{CryptoError, KeyStoreError};
pub use keys::{KeyStatus, KeyStoreConfig, KeyVersion, KeyVersionStore};
pub use merkle::{MerkleProof, MerkleTree, Position, ProofStep};
pub use signatures::Signature;

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// A key pair consisting of a public and private key
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// The public key component
    pub public_key: PublicKey,
    /// The private key component
    pub private_key: PrivateKey,
}

/// A public key used for verification
///
/// Exchanged as 64 lowercase hex characters over the raw 32 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

/// A private key used for signing
#[derive(Clone)]
pub struct PrivateKey {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        PrivateKey::generate().into()
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Get the private key
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }
}

impl From<PrivateKey> for KeyPair {
    fn from(private_key: PrivateKey) -> Self {
        Self {
            public_key: private_key.public_key(),
            private_key,
        }
    }
}

impl PublicKey {
    /// Create a public key from its raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyFormat("Public key must be 32 bytes".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        Ok(Self { verifying_key })
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(encoded)?)
    }

    /// Get the raw key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify a signature; a mismatch is `false`, never an error
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        signature.verify(message, self)
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        PublicKey::from_hex(&encoded).map_err(de::Error::custom)
    }
}

impl PrivateKey {
    /// Generate a fresh private key from the OS random source
    pub fn generate() -> Self {
        let mut secret_key_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut secret_key_bytes);
        Self {
            signing_key: SigningKey::from_bytes(&secret_key_bytes),
        }
    }

    /// Create a private key from its 32-byte seed
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyFormat("Private key must be 32 bytes".into()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Sign raw bytes
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message).into()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
