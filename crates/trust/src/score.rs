use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use trustgate_types::TypesError;

/// Capability and character tensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct T3Tensor {
    /// Natural aptitude (0.0 to 1.0)
    pub talent: f64,
    /// Learned skill (0.0 to 1.0)
    pub training: f64,
    /// Reliability (0.0 to 1.0)
    pub temperament: f64,
}

impl T3Tensor {
    pub fn new(talent: f64, training: f64, temperament: f64) -> crate::Result<Self> {
        for (name, v) in [("talent", talent), ("training", training), ("temperament", temperament)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(crate::TrustError::InvalidTrustScore(format!(
                    "{name} must be between 0.0 and 1.0, got {v}"
                )));
            }
        }
        Ok(Self {
            talent,
            training,
            temperament,
        })
    }

    /// Add deltas, clamping every component to [0, 1]
    pub fn apply(&mut self, talent: f64, training: f64, temperament: f64) {
        self.talent = clamp_unit(self.talent + talent);
        self.training = clamp_unit(self.training + training);
        self.temperament = clamp_unit(self.temperament + temperament);
    }

    pub fn average(&self) -> f64 {
        (self.talent + self.training + self.temperament) / 3.0
    }
}

impl Default for T3Tensor {
    fn default() -> Self {
        Self {
            talent: 0.5,
            training: 0.5,
            temperament: 0.5,
        }
    }
}

/// Output quality tensor
///
/// `value` is floored at zero but may exceed one; only its contribution to
/// the average is capped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct V3Tensor {
    /// Truthfulness (0.0 to 1.0)
    pub veracity: f64,
    /// Soundness (0.0 to 1.0)
    pub validity: f64,
    /// Delivered utility (>= 0.0)
    pub value: f64,
}

impl V3Tensor {
    pub fn new(veracity: f64, validity: f64, value: f64) -> crate::Result<Self> {
        if !(0.0..=1.0).contains(&veracity) || !(0.0..=1.0).contains(&validity) {
            return Err(crate::TrustError::InvalidTrustScore(
                "veracity and validity must be between 0.0 and 1.0".into(),
            ));
        }
        if value < 0.0 {
            return Err(crate::TrustError::InvalidTrustScore(
                "value must not be negative".into(),
            ));
        }
        Ok(Self {
            veracity,
            validity,
            value,
        })
    }

    pub fn apply(&mut self, veracity: f64, validity: f64, value: f64) {
        self.veracity = clamp_unit(self.veracity + veracity);
        self.validity = clamp_unit(self.validity + validity);
        self.value = (self.value + value).max(0.0);
    }

    pub fn average(&self) -> f64 {
        (self.veracity + self.validity + self.value.min(1.0)) / 3.0
    }
}

impl Default for V3Tensor {
    fn default() -> Self {
        Self {
            veracity: 0.5,
            validity: 0.5,
            value: 0.5,
        }
    }
}

fn clamp_unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Classified result of one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    /// Creative, exceptional result
    NovelSuccess,
    /// Expected good result
    StandardSuccess,
    /// Reasonable attempt that failed
    ExpectedFailure,
    /// Should have succeeded but did not
    UnexpectedFailure,
    /// Violated rules or trust
    EthicsViolation,
    /// Above expectations
    ExceptionalQuality,
    DeadlineMet,
    DeadlineMissed,
    /// Under budget
    ResourceEfficient,
    /// Over budget
    ResourceWasteful,
}

impl OutcomeType {
    pub const ALL: [OutcomeType; 10] = [
        OutcomeType::NovelSuccess,
        OutcomeType::StandardSuccess,
        OutcomeType::ExpectedFailure,
        OutcomeType::UnexpectedFailure,
        OutcomeType::EthicsViolation,
        OutcomeType::ExceptionalQuality,
        OutcomeType::DeadlineMet,
        OutcomeType::DeadlineMissed,
        OutcomeType::ResourceEfficient,
        OutcomeType::ResourceWasteful,
    ];

    /// Base (talent, training, temperament) impact
    pub fn t3_impact(self) -> (f64, f64, f64) {
        match self {
            Self::NovelSuccess => (0.03, 0.02, 0.01),
            Self::StandardSuccess => (0.0, 0.01, 0.005),
            Self::ExpectedFailure => (-0.01, 0.0, 0.0),
            Self::UnexpectedFailure => (-0.02, -0.01, -0.02),
            Self::EthicsViolation => (-0.05, 0.0, -0.10),
            Self::ExceptionalQuality => (0.02, 0.01, 0.01),
            Self::DeadlineMet => (0.0, 0.0, 0.01),
            Self::DeadlineMissed => (0.0, 0.0, -0.02),
            Self::ResourceEfficient => (0.01, 0.005, 0.005),
            Self::ResourceWasteful => (-0.01, 0.0, -0.01),
        }
    }

    /// Base (veracity, validity, value) impact
    pub fn v3_impact(self) -> (f64, f64, f64) {
        match self {
            Self::NovelSuccess => (0.01, 0.01, 0.02),
            Self::StandardSuccess => (0.005, 0.005, 0.01),
            Self::ExpectedFailure => (0.0, 0.0, 0.0),
            Self::UnexpectedFailure => (-0.01, -0.01, -0.01),
            Self::EthicsViolation => (-0.10, -0.05, -0.05),
            Self::ExceptionalQuality => (0.02, 0.01, 0.03),
            Self::DeadlineMet => (0.0, 0.0, 0.01),
            Self::DeadlineMissed => (0.0, 0.0, -0.01),
            Self::ResourceEfficient => (0.0, 0.01, 0.02),
            Self::ResourceWasteful => (0.0, -0.01, -0.02),
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::NovelSuccess
                | Self::StandardSuccess
                | Self::ExceptionalQuality
                | Self::DeadlineMet
                | Self::ResourceEfficient
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::NovelSuccess => "Demonstrated exceptional creativity and problem-solving",
            Self::StandardSuccess => "Completed task successfully as expected",
            Self::ExpectedFailure => "Attempted challenging task but didn't succeed",
            Self::UnexpectedFailure => "Failed task that should have been achievable",
            Self::EthicsViolation => "Violated ethical standards or trust",
            Self::ExceptionalQuality => "Exceeded quality expectations significantly",
            Self::DeadlineMet => "Completed work on time",
            Self::DeadlineMissed => "Failed to meet deadline",
            Self::ResourceEfficient => "Completed task efficiently under budget",
            Self::ResourceWasteful => "Used excessive resources for task",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NovelSuccess => "novel_success",
            Self::StandardSuccess => "standard_success",
            Self::ExpectedFailure => "expected_failure",
            Self::UnexpectedFailure => "unexpected_failure",
            Self::EthicsViolation => "ethics_violation",
            Self::ExceptionalQuality => "exceptional_quality",
            Self::DeadlineMet => "deadline_met",
            Self::DeadlineMissed => "deadline_missed",
            Self::ResourceEfficient => "resource_efficient",
            Self::ResourceWasteful => "resource_wasteful",
        }
    }
}

impl fmt::Display for OutcomeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| TypesError::UnknownVariant(s.to_string()))
    }
}
