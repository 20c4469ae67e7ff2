//! Shared types and traits for the trustgate engine
//!
//! Identifiers, the trust level scale and the error taxonomy every other
//! crate classifies its failures into.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Opaque identifier of an entity that holds keys and delegations
    EntityId
);

string_id!(
    /// Identifier of the organization a delegation or trust row belongs to
    OrganizationId
);

/// Coarse error classes shared by every crate in the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Caller-correctable input problem
    Validation,
    /// A rate or capacity limit was hit; retry after backoff
    Limit,
    /// A storage commit failed; pending work was requeued
    Transaction,
    /// Lookup of something that must exist failed
    State,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Limit => write!(f, "limit"),
            Self::Transaction => write!(f, "transaction"),
            Self::State => write!(f, "state"),
        }
    }
}

/// Implemented by every error type so callers can branch on the class
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_retriable(&self) -> bool {
        matches!(self.class(), ErrorClass::Limit | ErrorClass::Transaction)
    }
}

/// Error for malformed identifiers and enum strings
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("Empty identifier")]
    EmptyIdentifier,
    #[error("Unknown variant: {0}")]
    UnknownVariant(String),
}

impl Classify for TypesError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

pub type Result<T> = std::result::Result<T, TypesError>;

/// Rejects identifiers that are empty or whitespace-only
pub fn parse_entity_id(raw: &str) -> Result<EntityId> {
    if raw.trim().is_empty() {
        return Err(TypesError::EmptyIdentifier);
    }
    Ok(EntityId::new(raw.trim()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// No trust established
    None,
    /// Basic trust level
    Low,
    /// Moderate trust level
    Medium,
    /// High trust level
    High,
    /// Very high trust level
    VeryHigh,
}

impl TrustLevel {
    /// Bucket a composite score in [0, 1]
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.9 => Self::VeryHigh,
            s if s >= 0.8 => Self::High,
            s if s >= 0.6 => Self::Medium,
            s if s >= 0.3 => Self::Low,
            _ => Self::None,
        }
    }
}

impl Default for TrustLevel {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::VeryHigh => write!(f, "Very High"),
        }
    }
}
