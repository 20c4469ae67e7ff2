//! Core of the trustgate delegation and trust-accounting engine.
//!
//! This crate wires the key store, delegation validator, reputation engine
//! and update batcher behind a single [`Authorizer`], and adds the
//! accountability layer that turns adjudicated misbehavior into operational
//! constraints.

pub mod accountability;
pub mod authorizer;
pub mod config;
mod error;

pub use accountability::{
    AccountabilityConfig, AccountabilityEvent, AccountabilityEventType, AccountabilityLayer,
    AccountabilityStore, Constraint, ConstraintDecision, ConstraintType, MisbehaviorReport,
    TrustSnapshot,
};
pub use authorizer::{AuthorizationDecision, AuthorizationRequest, Authorizer};
pub use config::EngineConfig;
pub use error::CoreError;

/// Result type for the engine facade
pub type Result<T> = std::result::Result<T, CoreError>;
