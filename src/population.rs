//! Population descriptor and the null-hypothesis mean for sampling without
//! replacement.

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};
use crate::tracker::SampleTracker;

/// The null-hypothesis mean of an assorter.
pub const NULL_MEAN: f64 = 0.5;

/// What the engine needs to know about the contest's ballot population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    /// Ballots that could bear the contest.
    pub n_population: usize,
    /// Ballots assumed to exist but never available to audit.
    pub n_phantoms: usize,
    /// Upper bound of the comparison assort values.
    pub upper_bound: f64,
    /// Comparison assort value when paper and record agree; `0` when the
    /// draws are plain assort values.
    pub noerror: f64,
}

impl Population {
    pub fn new(n_population: usize, n_phantoms: usize, upper_bound: f64, noerror: f64) -> Self {
        Self { n_population, n_phantoms, upper_bound, noerror }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_population == 0 {
            return Err(AuditError::InvalidConfig("population size must be positive".into()));
        }
        if self.n_phantoms > self.n_population {
            return Err(AuditError::InvalidConfig(format!(
                "phantoms {} exceed population {}",
                self.n_phantoms, self.n_population
            )));
        }
        if !(self.upper_bound > NULL_MEAN) {
            return Err(AuditError::InvalidConfig(format!(
                "upper bound must exceed 1/2, got {}",
                self.upper_bound
            )));
        }
        if !(self.noerror >= 0.0) {
            return Err(AuditError::InvalidConfig(format!(
                "noerror must not be negative, got {}",
                self.noerror
            )));
        }
        Ok(())
    }

    /// Largest value a draw can take. Comparison assort values reach
    /// `2 * noerror` when the record understated the winner by the most.
    pub fn sample_upper(&self) -> f64 {
        if self.noerror > 0.0 {
            2.0 * self.noerror
        } else {
            self.upper_bound
        }
    }

    /// Floor on the phantom-category rate.
    pub fn phantom_rate(&self) -> f64 {
        self.n_phantoms as f64 / self.n_population as f64
    }
}

/// `mu_t = (N/2 - S_{t-1}) / (N - t + 1)` where `t - 1` draws summing to
/// `S_{t-1}` have been seen. `1/2` before any draw, or with replacement.
pub fn population_mean_if_h0(n_population: usize, without_replacement: bool, prev: &dyn SampleTracker) -> f64 {
    let sample_num = prev.number_of_samples();
    if sample_num == 0 || !without_replacement {
        return NULL_MEAN;
    }
    (n_population as f64 * NULL_MEAN - prev.sum()) / (n_population as f64 - sample_num as f64)
}
