use ed25519_dalek::{Signature as Ed25519Signature, Verifier};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::{CryptoError, PublicKey};

/// A detached Ed25519 signature, exchanged as 128 lowercase hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    inner: Ed25519Signature,
}

impl Signature {
    /// Create a new signature from bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature("Invalid signature length".into()))?;
        Ok(Self {
            inner: Ed25519Signature::from_bytes(&bytes),
        })
    }

    pub fn from_hex(encoded: &str) -> crate::Result<Self> {
        Self::from_bytes(&hex::decode(encoded)?)
    }

    /// Get the raw signature bytes
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify this signature against a message and public key
    pub fn verify(&self, message: &[u8], public_key: &PublicKey) -> bool {
        public_key
            .verifying_key()
            .verify(message, &self.inner)
            .is_ok()
    }
}

impl From<Ed25519Signature> for Signature {
    fn from(sig: Ed25519Signature) -> Self {
        Self { inner: sig }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Signature::from_hex(&encoded).map_err(de::Error::custom)
    }
}
