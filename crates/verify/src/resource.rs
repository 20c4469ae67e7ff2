//! Resource pattern authorization.
//!
//! Patterns containing `*`, `?` or `[` are shell-style globs; anything else
//! must match the resource string exactly. Denials always win, and the first
//! matching allow pattern (in insertion order) decides the granted level.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use trustgate_types::TypesError;

use crate::error::VerifyError;
use crate::Result;

/// Ordered permission levels, `Read < Write < Admin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Read => "read",
            PermissionLevel::Write => "write",
            PermissionLevel::Admin => "admin",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = TypesError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "read" => Ok(PermissionLevel::Read),
            "write" => Ok(PermissionLevel::Write),
            "admin" => Ok(PermissionLevel::Admin),
            other => Err(TypesError::UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Glob(Pattern),
}

impl Matcher {
    fn parse(pattern: &str) -> Result<Self> {
        if pattern.contains(['*', '?', '[']) {
            Pattern::new(pattern)
                .map(Matcher::Glob)
                .map_err(|e| VerifyError::InvalidPattern(format!("{pattern}: {e}")))
        } else {
            Ok(Matcher::Exact(pattern.to_string()))
        }
    }

    fn matches(&self, resource: &str) -> bool {
        match self {
            Matcher::Exact(exact) => exact == resource,
            Matcher::Glob(pattern) => pattern.matches(resource),
        }
    }
}

#[derive(Debug, Clone)]
struct AllowRule {
    source: String,
    matcher: Matcher,
    level: PermissionLevel,
}

#[derive(Debug, Clone)]
struct DenyRule {
    source: String,
    matcher: Matcher,
}

/// Result of a resource check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
}

impl AccessDecision {
    fn allow(reason: String) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Allow/deny pattern set for one grant
#[derive(Debug, Clone, Default)]
pub struct ResourceMatcher {
    allowed: Vec<AllowRule>,
    denied: Vec<DenyRule>,
}

impl ResourceMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_allowed(&mut self, pattern: &str, level: PermissionLevel) -> Result<()> {
        let matcher = Matcher::parse(pattern)?;
        self.allowed.push(AllowRule {
            source: pattern.to_string(),
            matcher,
            level,
        });
        Ok(())
    }

    pub fn add_denied(&mut self, pattern: &str) -> Result<()> {
        let matcher = Matcher::parse(pattern)?;
        self.denied.push(DenyRule {
            source: pattern.to_string(),
            matcher,
        });
        Ok(())
    }

    /// Builder form of [`add_allowed`](Self::add_allowed)
    pub fn with_allowed(mut self, pattern: &str, level: PermissionLevel) -> Result<Self> {
        self.add_allowed(pattern, level)?;
        Ok(self)
    }

    /// Builder form of [`add_denied`](Self::add_denied)
    pub fn with_denied(mut self, pattern: &str) -> Result<Self> {
        self.add_denied(pattern)?;
        Ok(self)
    }

    pub fn is_authorized(&self, resource: &str, required: PermissionLevel) -> AccessDecision {
        if let Some(rule) = self.denied.iter().find(|r| r.matcher.matches(resource)) {
            return AccessDecision::deny(format!(
                "Resource {resource} denied by pattern {}",
                rule.source
            ));
        }

        if self.allowed.is_empty() {
            return AccessDecision::deny("No allowed resources configured".to_string());
        }

        match self.allowed.iter().find(|r| r.matcher.matches(resource)) {
            Some(rule) if rule.level >= required => AccessDecision::allow(format!(
                "Resource {resource} allowed by pattern {} at {}",
                rule.source, rule.level
            )),
            Some(rule) => AccessDecision::deny(format!(
                "Insufficient permission for {resource}: pattern {} grants {}, {} required",
                rule.source, rule.level, required
            )),
            None => AccessDecision::deny(format!(
                "Resource {resource} does not match any allowed pattern"
            )),
        }
    }
}
