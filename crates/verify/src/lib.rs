//! Delegation validation and resource authorization for trustgate
//!
//! This crate implements:
//! - Allow/deny resource patterns with ordered permission levels
//! - Permission claims held by entities within an organization
//! - Signed, optionally witnessed delegations validated against their chain
//! - A registry of accepted delegations with lazy revocation and ATP budgets

pub mod audit;
pub mod claims;
pub mod delegation;
mod error;
pub mod resource;
pub mod validator;

pub use audit::{AuditEventType, AuditLog, AuditRecord, AuditSink};
pub use claims::{claim_hash, ClaimStatus, PermissionClaim, PermissionClaimStore};
pub use delegation::{
    Delegation, DelegationRecord, DelegationRegistry, DelegationStatus, WitnessSignature,
};
pub use error::VerifyError;
pub use resource::{AccessDecision, PermissionLevel, ResourceMatcher};
pub use validator::{DelegationRejection, DelegationValidator, ValidationOutcome, ValidatorConfig};

/// Result type for verification operations
pub type Result<T> = std::result::Result<T, VerifyError>;
