//! Basic flow tests for the core crate.
//! These tests exercise one component at a time through the public API.

mod delegation_flows;
mod key_flows;
mod trust_flows;
