//! Error taxonomy for the betting engine.
//!
//! Only contract violations live here. Audit outcomes, including the
//! inconclusive ones, are reported through [`crate::martingale::TestH0Status`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("population mean under the null must be positive, got {mui}")]
    InvalidPopulationMean { mui: f64 },
    #[error("maximum bet must be positive, got {max_bet}")]
    InvalidMaxBet { max_bet: f64 },
    #[error("estimated error rates sum past 1 (p0 = {p0})")]
    RatesExceedOne { p0: f64 },
    #[error("max samples {max_samples} exceeds population size {population}")]
    MaxSamplesExceedPopulation { max_samples: usize, population: usize },
    #[error("assort value {value} does not match any error category (noerror = {noerror})")]
    UnknownCategory { value: f64, noerror: f64 },
    #[error("sample value {value} outside [0, {upper}]")]
    SampleOutOfBounds { value: f64, upper: f64 },
    #[error("no samples left for contest {contest_id}")]
    NoSamplesLeft { contest_id: u32 },
    #[error("reset not allowed for contest {contest_id}")]
    ResetNotAllowed { contest_id: u32 },
    #[error("bet optimizer did not converge after {iterations} iterations")]
    OptimizerFailed { iterations: usize },
    #[error("snapshot {path} fingerprint mismatch: expected {expected}, found {actual}")]
    SnapshotMismatch { path: String, expected: String, actual: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;

impl AuditError {
    /// True for the upstream contract violations that must never be mistaken
    /// for a statistical outcome.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AuditError::InvalidPopulationMean { .. }
                | AuditError::InvalidMaxBet { .. }
                | AuditError::RatesExceedOne { .. }
                | AuditError::MaxSamplesExceedPopulation { .. }
                | AuditError::OptimizerFailed { .. }
                | AuditError::InvalidConfig(_)
        )
    }
}
