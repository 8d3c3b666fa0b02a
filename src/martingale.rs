//! Betting martingale test of `H0: population mean <= 1/2`.
//!
//! Each draw multiplies the test statistic by `t_j = 1 + lambda_j (x_j - mu_j)`.
//! Under the null the statistic is a nonnegative supermartingale, so
//! `min(1, 1/T_j)` is an anytime-valid p-value.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::betting::BettingFn;
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::logging;
use crate::numeric::double_is_close;
use crate::population::{population_mean_if_h0, Population, NULL_MEAN};
use crate::sampler::SamplerTracker;
use crate::tracker::{Draw, ErrorTracker, SampleTracker};

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestH0Status {
    InProgress,

    // success: the reported outcome is confirmed
    NoLosers,
    NoWinners,
    StatRejectNull,
    SampleSumRejectNull,

    // failure: escalate
    ContestMisformed,
    MinMargin,
    TooManyPhantoms,
    FailMaxSamplesAllowed,
    AuditorRemoved,
    AcceptNull,

    // inconclusive: sample more next round
    LimitReached,
}

impl TestH0Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestH0Status::InProgress => "InProgress",
            TestH0Status::NoLosers => "NoLosers",
            TestH0Status::NoWinners => "NoWinners",
            TestH0Status::StatRejectNull => "StatRejectNull",
            TestH0Status::SampleSumRejectNull => "SampleSumRejectNull",
            TestH0Status::ContestMisformed => "ContestMisformed",
            TestH0Status::MinMargin => "MinMargin",
            TestH0Status::TooManyPhantoms => "TooManyPhantoms",
            TestH0Status::FailMaxSamplesAllowed => "FailMaxSamplesAllowed",
            TestH0Status::AuditorRemoved => "AuditorRemoved",
            TestH0Status::AcceptNull => "AcceptNull",
            TestH0Status::LimitReached => "LimitReached",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TestH0Status::NoLosers
                | TestH0Status::NoWinners
                | TestH0Status::StatRejectNull
                | TestH0Status::SampleSumRejectNull
        )
    }

    pub fn is_fail(&self) -> bool {
        matches!(
            self,
            TestH0Status::ContestMisformed
                | TestH0Status::MinMargin
                | TestH0Status::TooManyPhantoms
                | TestH0Status::FailMaxSamplesAllowed
                | TestH0Status::AuditorRemoved
                | TestH0Status::AcceptNull
        )
    }

    /// No further sampling can change the outcome.
    pub fn is_complete(&self) -> bool {
        self.is_success() || self.is_fail()
    }
}

impl fmt::Display for TestH0Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Debugging sequences
// =============================================================================

/// Per-draw record of `(x_j, lambda_j, mu_j, t_j, T_j)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebuggingSequences {
    pub xs: Vec<f64>,
    pub bets: Vec<f64>,
    pub mjs: Vec<f64>,
    pub tjs: Vec<f64>,
    pub test_statistics: Vec<f64>,
}

impl DebuggingSequences {
    fn add(&mut self, x: f64, bet: f64, mj: f64, tj: f64, statistic: f64) {
        self.xs.push(x);
        self.bets.push(bet);
        self.mjs.push(mj);
        self.tjs.push(tj);
        self.test_statistics.push(statistic);
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    pub fn pvalues(&self) -> Vec<f64> {
        self.test_statistics.iter().map(|t| pvalue(*t)).collect()
    }
}

fn pvalue(statistic: f64) -> f64 {
    (1.0 / statistic).min(1.0)
}

// =============================================================================
// Result
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestH0Result {
    pub status: TestH0Status,
    /// Draws consumed by this test.
    pub sample_count: usize,
    /// One-based index of the first draw whose p-value fell under the risk limit.
    pub sample_first_under_limit: Option<usize>,
    pub pvalue_min: f64,
    pub pvalue_last: f64,
    pub tracker: ErrorTracker,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequences: Option<DebuggingSequences>,
}

impl fmt::Display for TestH0Result {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TestH0Result status={} sampleCount={} pvalueMin={:.6} pvalueLast={:.6} errors={}",
            self.status,
            self.sample_count,
            self.pvalue_min,
            self.pvalue_last,
            self.tracker.error_counts().show()
        )
    }
}

// =============================================================================
// Betting martingale
// =============================================================================

pub struct BettingMart<B: BettingFn> {
    betting_fn: B,
    n_population: usize,
    without_replacement: bool,
    risk_limit: f64,
    upper: f64,
    assort_upper: f64,
    noerror: f64,
    terminate_on_reject: bool,
    record_sequences: bool,
}

impl<B: BettingFn> BettingMart<B> {
    pub fn new(betting_fn: B, population: &Population, config: &AuditConfig) -> Result<Self> {
        config.validate()?;
        population.validate()?;
        Ok(Self {
            betting_fn,
            n_population: population.n_population,
            without_replacement: config.without_replacement,
            risk_limit: config.risk_limit,
            upper: population.sample_upper(),
            assort_upper: population.upper_bound,
            noerror: population.noerror,
            terminate_on_reject: config.terminate_on_reject,
            record_sequences: false,
        })
    }

    /// Attach the per-draw sequences to every result from now on.
    pub fn record_sequences(&mut self) {
        self.record_sequences = true;
    }

    pub fn betting_fn(&self) -> &B {
        &self.betting_fn
    }

    /// Run the test over draws from `sampler`.
    pub fn test_sampler(
        &mut self,
        max_samples: usize,
        starting_statistic: f64,
        sampler: &mut dyn SamplerTracker,
    ) -> Result<TestH0Result> {
        self.test_h0(max_samples, starting_statistic, || sampler.sample())
    }

    /// Draw until the risk estimate falls under the limit (when configured to
    /// stop there), the null is settled by the sample sum, or `max_samples`
    /// draws have been consumed.
    pub fn test_h0<F>(&mut self, max_samples: usize, starting_statistic: f64, mut draw: F) -> Result<TestH0Result>
    where
        F: FnMut() -> Result<Draw>,
    {
        if self.without_replacement && max_samples > self.n_population {
            return Err(AuditError::MaxSamplesExceedPopulation {
                max_samples,
                population: self.n_population,
            });
        }

        let mut tracker = ErrorTracker::new(self.noerror, self.assort_upper);
        let mut sequences = self.record_sequences.then(DebuggingSequences::default);

        let mut sample_number = 0usize;
        let mut statistic = starting_statistic;
        let mut mj = NULL_MEAN;
        let mut pvalue_last = 1.0;
        let mut pvalue_min = 1.0;
        let mut first_under_limit = None;
        let mut sum_rejects = false;

        while sample_number < max_samples {
            mj = population_mean_if_h0(self.n_population, self.without_replacement, &tracker);
            if mj > self.upper || mj < 0.0 {
                break;
            }

            // the bet is settled before the draw is seen
            let uninformative = double_is_close(0.0, mj) || double_is_close(self.upper, mj);
            let wager = if uninformative {
                None
            } else {
                Some(self.betting_fn.bet(&tracker)?)
            };

            let sample = draw()?;
            let xj = sample.value();
            if !(0.0..=self.upper).contains(&xj) {
                return Err(AuditError::SampleOutOfBounds { value: xj, upper: self.upper });
            }
            sample_number += 1;

            let tj = match wager {
                Some(w) => {
                    let tj = w.term(xj, mj, self.upper);
                    if double_is_close(tj, 0.0) {
                        logging::log_stall(sample_number, xj, w.value(), mj);
                    }
                    tj
                }
                None => 1.0,
            };
            statistic *= tj;

            tracker.record(sample)?;
            pvalue_last = pvalue(statistic);
            if pvalue_last < pvalue_min {
                pvalue_min = pvalue_last;
            }
            if first_under_limit.is_none() && pvalue_last < self.risk_limit {
                first_under_limit = Some(sample_number);
            }

            logging::log_draw(sample_number, xj, mj, tj, statistic, pvalue_last);
            if let Some(seq) = sequences.as_mut() {
                let bet = wager.map(|w| w.as_lambda(mj, self.upper)).unwrap_or(0.0);
                seq.add(xj, bet, mj, tj, statistic);
            }

            if self.without_replacement && tracker.sum() > self.n_population as f64 * NULL_MEAN {
                sum_rejects = true;
                break;
            }
            if self.terminate_on_reject && pvalue_last < self.risk_limit {
                break;
            }
        }

        let status = if self.without_replacement && sample_number == self.n_population {
            if tracker.sum() > self.n_population as f64 * NULL_MEAN {
                TestH0Status::SampleSumRejectNull
            } else {
                TestH0Status::AcceptNull
            }
        } else if pvalue_last < self.risk_limit {
            TestH0Status::StatRejectNull
        } else if mj > self.upper {
            TestH0Status::AcceptNull
        } else if mj < 0.0 || sum_rejects {
            TestH0Status::SampleSumRejectNull
        } else {
            TestH0Status::LimitReached
        };

        logging::log_test_result(
            status.as_str(),
            sample_number,
            pvalue_min,
            pvalue_last,
            &tracker.error_counts().show(),
        );

        Ok(TestH0Result {
            status,
            sample_count: sample_number,
            sample_first_under_limit: first_under_limit,
            pvalue_min,
            pvalue_last,
            tracker,
            sequences,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::betting::{FixedBet, GeneralAdaptiveBetting};
    use crate::error_counts::ClcaErrorCounts;

    fn repeat(value: f64, track: bool) -> impl FnMut() -> Result<Draw> {
        move || Ok(Draw::new(value, track))
    }

    #[test]
    fn test_status_groups() {
        assert!(TestH0Status::StatRejectNull.is_success());
        assert!(TestH0Status::AcceptNull.is_fail());
        assert!(!TestH0Status::LimitReached.is_complete());
        assert!(!TestH0Status::InProgress.is_complete());
        assert_eq!(TestH0Status::MinMargin.to_string(), "MinMargin");
    }

    #[test]
    fn test_noerror_draws_reject() {
        let population = Population::new(1000, 0, 1.0, 1.0);
        let config = AuditConfig::default();
        let betting = GeneralAdaptiveBetting::new(&population, ClcaErrorCounts::empty(1.0, 1.0), None, &config);
        let mut mart = BettingMart::new(betting, &population, &config).unwrap();
        mart.record_sequences();

        let result = mart.test_h0(50, 1.0, repeat(1.0, true)).unwrap();
        assert_eq!(result.status, TestH0Status::StatRejectNull);
        assert!(result.sample_count < 50);
        assert!(result.pvalue_min < 0.05);
        assert_eq!(result.sample_first_under_limit, Some(result.sample_count));

        let pvalues = result.sequences.as_ref().unwrap().pvalues();
        assert_eq!(pvalues.len(), result.sample_count);
        for w in pvalues.windows(2) {
            assert!(w[1] < w[0]);
        }
    }

    #[test]
    fn test_limit_reached_without_termination() {
        let population = Population::new(1000, 0, 1.0, 1.0);
        let config = AuditConfig { terminate_on_reject: false, ..AuditConfig::default() };
        let mut mart = BettingMart::new(FixedBet::lambda(0.5), &population, &config).unwrap();
        let result = mart.test_h0(20, 1.0, repeat(0.5, false)).unwrap();
        assert_eq!(result.sample_count, 20);
        assert_eq!(result.status, TestH0Status::LimitReached);
    }

    #[test]
    fn test_sum_exceeds_half_population() {
        let population = Population::new(10, 0, 1.0, 1.0);
        let config = AuditConfig { terminate_on_reject: false, ..AuditConfig::default() };
        let mut mart = BettingMart::new(FixedBet::lambda(0.1), &population, &config).unwrap();
        let result = mart.test_h0(10, 1.0, repeat(1.0, false)).unwrap();
        assert_eq!(result.status, TestH0Status::SampleSumRejectNull);
        assert_eq!(result.sample_count, 6);
    }

    #[test]
    fn test_whole_population_accepts() {
        let population = Population::new(8, 0, 1.0, 1.0);
        let config = AuditConfig { terminate_on_reject: false, ..AuditConfig::default() };
        let mut mart = BettingMart::new(FixedBet::lambda(0.1), &population, &config).unwrap();
        let mut n = 0;
        let result = mart
            .test_h0(8, 1.0, || {
                n += 1;
                Ok(Draw::new(if n % 2 == 0 { 0.5 } else { 0.4 }, false))
            })
            .unwrap();
        assert_eq!(result.sample_count, 8);
        assert_eq!(result.status, TestH0Status::AcceptNull);
    }

    #[test]
    fn test_with_replacement_n_draws_leave_population_unsettled() {
        let population = Population::new(8, 0, 1.0, 1.0);
        let config = AuditConfig {
            terminate_on_reject: false,
            without_replacement: false,
            ..AuditConfig::default()
        };
        let mut mart = BettingMart::new(FixedBet::lambda(0.1), &population, &config).unwrap();
        let result = mart.test_h0(8, 1.0, repeat(0.6, false)).unwrap();
        assert_eq!(result.sample_count, 8);
        assert!(result.tracker.sum() > 4.0);
        assert_eq!(result.status, TestH0Status::LimitReached);

        let mut mart = BettingMart::new(FixedBet::lambda(0.1), &population, &config).unwrap();
        let result = mart.test_h0(8, 1.0, repeat(0.4, false)).unwrap();
        assert_eq!(result.status, TestH0Status::LimitReached);
    }

    #[test]
    fn test_configuration_errors() {
        let population = Population::new(10, 0, 1.0, 1.0);
        let config = AuditConfig::default();
        let mut mart = BettingMart::new(FixedBet::lambda(0.1), &population, &config).unwrap();
        assert!(matches!(
            mart.test_h0(11, 1.0, repeat(1.0, false)),
            Err(AuditError::MaxSamplesExceedPopulation { .. })
        ));
        assert!(matches!(
            mart.test_h0(5, 1.0, repeat(2.5, false)),
            Err(AuditError::SampleOutOfBounds { .. })
        ));
        let bad = AuditConfig { risk_limit: 2.0, ..AuditConfig::default() };
        assert!(BettingMart::new(FixedBet::lambda(0.1), &population, &bad).is_err());
    }

    #[test]
    fn test_sampler_errors_propagate() {
        let population = Population::new(100, 0, 1.0, 1.0);
        let mut mart = BettingMart::new(FixedBet::lambda(0.1), &population, &AuditConfig::default()).unwrap();
        let r = mart.test_h0(5, 1.0, || Err(AuditError::NoSamplesLeft { contest_id: 3 }));
        assert!(matches!(r, Err(AuditError::NoSamplesLeft { contest_id: 3 })));
    }

    #[test]
    fn test_eta_wager() {
        let population = Population::new(1000, 0, 1.0, 1.0);
        let mut mart = BettingMart::new(FixedBet::eta(0.9), &population, &AuditConfig::default()).unwrap();
        let result = mart.test_h0(100, 1.0, repeat(1.0, false)).unwrap();
        assert_eq!(result.status, TestH0Status::StatRejectNull);
    }
}
