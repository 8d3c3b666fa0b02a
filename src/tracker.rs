//! Running statistics over the draws already consumed by a sequential test.
//!
//! A freshly drawn value is wrapped in a [`Draw`]. The only way a draw enters
//! the statistics is [`ErrorTracker::record`], which consumes it, and the test
//! calls that only after the bet for that draw has been settled. Estimators
//! borrow the tracker, so they see previous draws and never the current one.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};
use crate::error_counts::ClcaErrorCounts;
use crate::numeric::{double_is_close, Welford};
use crate::taus::{TauCategory, Taus};

/// Read-only view of previously drawn samples.
pub trait SampleTracker {
    fn number_of_samples(&self) -> usize;
    fn sum(&self) -> f64;
    fn mean(&self) -> f64;
    fn variance(&self) -> f64;
    fn last(&self) -> Option<f64>;
}

/// A value just drawn from a sampler, not yet folded into any statistics.
#[derive(Debug, PartialEq)]
#[must_use]
pub struct Draw {
    value: f64,
    track_error: bool,
}

impl Draw {
    pub fn new(value: f64, track_error: bool) -> Self {
        Self { value, track_error }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// False for ballots resolved through a pooled average; they feed the
    /// test statistic but not the per-ballot error rates.
    pub fn tracks_error(&self) -> bool {
        self.track_error
    }
}

/// Append-only accumulator: count, sum, Welford state and a per-category
/// error histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTracker {
    noerror: f64,
    upper: f64,
    last: Option<f64>,
    sum: f64,
    welford: Welford,
    counts: BTreeMap<TauCategory, usize>,
    noerror_count: usize,
    tracked: usize,
}

impl ErrorTracker {
    pub fn new(noerror: f64, upper: f64) -> Self {
        Self {
            noerror,
            upper,
            last: None,
            sum: 0.0,
            welford: Welford::new(),
            counts: BTreeMap::new(),
            noerror_count: 0,
            tracked: 0,
        }
    }

    pub fn noerror(&self) -> f64 {
        self.noerror
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Fold a draw into the statistics.
    ///
    /// A tracked draw that matches no category is an upstream assorter bug
    /// and is rejected before anything is updated.
    pub fn record(&mut self, draw: Draw) -> Result<()> {
        let category = if draw.track_error && self.noerror != 0.0 {
            Some(self.classify(draw.value)?)
        } else {
            None
        };

        self.last = Some(draw.value);
        self.sum += draw.value;
        self.welford.update(draw.value);

        if draw.track_error {
            self.tracked += 1;
        }
        match category {
            Some(TauCategory::NoError) => self.noerror_count += 1,
            Some(cat) => *self.counts.entry(cat).or_insert(0) += 1,
            None => {}
        }
        Ok(())
    }

    fn classify(&self, value: f64) -> Result<TauCategory> {
        if double_is_close(value, self.noerror) {
            return Ok(TauCategory::NoError);
        }
        Taus::new(self.upper)
            .category_of(value / self.noerror)
            .ok_or(AuditError::UnknownCategory { value, noerror: self.noerror })
    }

    /// Forget everything, for a restarted round.
    pub fn reset(&mut self) {
        *self = Self::new(self.noerror, self.upper);
    }

    /// Snapshot of the error counts over the draws that track errors.
    pub fn error_counts(&self) -> ClcaErrorCounts {
        ClcaErrorCounts::new(self.counts.clone(), self.tracked, self.noerror, self.upper)
    }

    pub fn noerror_count(&self) -> usize {
        self.noerror_count
    }

    pub fn tracked_samples(&self) -> usize {
        self.tracked
    }

    pub fn welford(&self) -> &Welford {
        &self.welford
    }
}

impl SampleTracker for ErrorTracker {
    fn number_of_samples(&self) -> usize {
        self.welford.count()
    }

    fn sum(&self) -> f64 {
        self.sum
    }

    fn mean(&self) -> f64 {
        self.welford.mean()
    }

    fn variance(&self) -> f64 {
        self.welford.variance()
    }

    fn last(&self) -> Option<f64> {
        self.last
    }
}

impl fmt::Display for ErrorTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ErrorTracker(noerror={}, n={}, tracked={}, noerrorCount={}, errors={})",
            self.noerror,
            self.number_of_samples(),
            self.tracked,
            self.noerror_count,
            self.error_counts().show()
        )
    }
}
