//! Betting functions.
//!
//! A betting function prices the next draw from the draws already recorded
//! in the tracker. It either names a fraction `lambda` of the statistic to
//! stake, or an estimate `eta` of the population mean (the ALPHA
//! parametrisation). Both are converted into the same betting term
//! `t_j = 1 + lambda (x_j - mu_j)`.

use serde::{Deserialize, Serialize};

use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::error_counts::ClcaErrorCounts;
use crate::estimator::{PoolAssortRates, RateEstimator};
use crate::logging;
use crate::numeric::{maximize, EPS};
use crate::population::{population_mean_if_h0, Population, NULL_MEAN};
use crate::tracker::{ErrorTracker, SampleTracker};

/// Absolute tolerance of the Kelly search in `lambda`.
pub const KELLY_TOLERANCE: f64 = 1.0e-6;

/// A `p0` this close to zero is the rounding of rates that sum to exactly one.
pub const P0_ROUNDING: f64 = 1.0e-12;

// =============================================================================
// Wagers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Wager {
    /// Fraction of the current statistic staked on the draw.
    Lambda(f64),
    /// Estimated population mean.
    Eta(f64),
}

impl Wager {
    pub fn value(&self) -> f64 {
        match *self {
            Wager::Lambda(v) | Wager::Eta(v) => v,
        }
    }

    /// Betting term for draw `x` against null mean `mu` with assort upper bound `upper`.
    pub fn term(&self, x: f64, mu: f64, upper: f64) -> f64 {
        match *self {
            Wager::Lambda(lambda) => 1.0 + lambda * (x - mu),
            Wager::Eta(eta) => (x * eta / mu + (upper - x) * (upper - eta) / (upper - mu)) / upper,
        }
    }

    /// The equivalent `lambda`.
    pub fn as_lambda(&self, mu: f64, upper: f64) -> f64 {
        match *self {
            Wager::Lambda(lambda) => lambda,
            Wager::Eta(eta) => eta_to_lambda(eta, mu, upper),
        }
    }
}

/// `eta = mu (1 + lambda (u - mu))`
pub fn lambda_to_eta(lambda: f64, mu: f64, upper: f64) -> f64 {
    mu * (1.0 + lambda * (upper - mu))
}

/// `lambda = (eta / mu - 1) / (u - mu)`
pub fn eta_to_lambda(eta: f64, mu: f64, upper: f64) -> f64 {
    (eta / mu - 1.0) / (upper - mu)
}

/// Chooses the wager for the next draw.
///
/// Implementations see only the draws already recorded in `prev`.
pub trait BettingFn {
    fn bet(&mut self, prev: &ErrorTracker) -> Result<Wager>;
}

// =============================================================================
// Fixed Bets
// =============================================================================

/// The same wager on every draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedBet(Wager);

impl FixedBet {
    pub fn lambda(lambda: f64) -> Self {
        Self(Wager::Lambda(lambda))
    }

    pub fn eta(eta: f64) -> Self {
        Self(Wager::Eta(eta))
    }
}

impl BettingFn for FixedBet {
    fn bet(&mut self, _prev: &ErrorTracker) -> Result<Wager> {
        Ok(self.0)
    }
}

// =============================================================================
// Kelly Optimal Lambda
// =============================================================================

/// Kelly objective over a discrete distribution of assort values:
///
/// `g(lambda) = p0 ln(1 + lambda (noerror - mu)) + sum_v rate(v) ln(1 + lambda (v - mu))`
///
/// where `p0` is what the error (and pooled) rates leave for `noerror`.
#[derive(Debug, Clone)]
pub struct OptimalLambda {
    noerror: f64,
    clca_rates: Vec<(f64, f64)>,
    pool_rates: Vec<(f64, f64)>,
    mui: f64,
    max_bet: f64,
    p0: f64,
}

impl OptimalLambda {
    /// `clca_rates` and `pool_rates` are `(assort value, rate)` pairs.
    pub fn new(
        noerror: f64,
        clca_rates: Vec<(f64, f64)>,
        pools: Option<&PoolAssortRates>,
        mui: f64,
        max_bet: f64,
    ) -> Result<Self> {
        if !(mui > 0.0) {
            return Err(AuditError::InvalidPopulationMean { mui });
        }
        if !(max_bet > 0.0) {
            return Err(AuditError::InvalidMaxBet { max_bet });
        }
        let pool_rates: Vec<(f64, f64)> = pools.map(|p| p.terms().collect()).unwrap_or_default();
        let clca_sum: f64 = clca_rates.iter().map(|(_, r)| r).sum();
        let pool_sum: f64 = pool_rates.iter().map(|(_, r)| r).sum();
        let mut p0 = 1.0 - clca_sum - pool_sum;
        if p0.abs() <= P0_ROUNDING {
            p0 = 0.0;
        }
        if p0 < 0.0 {
            return Err(AuditError::RatesExceedOne { p0 });
        }

        Ok(Self {
            noerror,
            clca_rates: clca_rates.into_iter().filter(|(_, r)| *r != 0.0).collect(),
            pool_rates,
            mui,
            max_bet,
            p0,
        })
    }

    pub fn p0(&self) -> f64 {
        self.p0
    }

    pub fn max_bet(&self) -> f64 {
        self.max_bet
    }

    pub fn expected_log_growth(&self, lambda: f64) -> f64 {
        let term = |value: f64, rate: f64| (1.0 + lambda * (value - self.mui)).ln() * rate;
        let noerror_term = term(self.noerror, self.p0);
        let clca: f64 = self.clca_rates.iter().map(|&(v, r)| term(v, r)).sum();
        let pools: f64 = self.pool_rates.iter().map(|&(v, r)| term(v, r)).sum();
        noerror_term + clca + pools
    }

    /// The growth-maximising bet in `[0, max_bet]`.
    pub fn solve(&self) -> Result<f64> {
        let best = maximize(|lambda| self.expected_log_growth(lambda), 0.0, self.max_bet, KELLY_TOLERANCE)?;
        Ok(best.x)
    }
}

// =============================================================================
// Adaptive Kelly Betting
// =============================================================================

/// Kelly bet against error rates re-estimated before every draw.
#[derive(Debug, Clone)]
pub struct GeneralAdaptiveBetting {
    n_population: usize,
    without_replacement: bool,
    max_loss: f64,
    estimator: RateEstimator,
    pools: Option<PoolAssortRates>,
    last_bet: Option<f64>,
}

impl GeneralAdaptiveBetting {
    /// `prior` carries the error counts of earlier rounds (empty for a first round).
    pub fn new(
        population: &Population,
        prior: ClcaErrorCounts,
        pools: Option<PoolAssortRates>,
        config: &AuditConfig,
    ) -> Self {
        let estimator = RateEstimator::new(prior, config.shrinkage_weight, population, pools.as_ref());
        Self {
            n_population: population.n_population,
            without_replacement: config.without_replacement,
            max_loss: config.max_loss,
            estimator,
            pools,
            last_bet: None,
        }
    }

    pub fn estimator(&self) -> &RateEstimator {
        &self.estimator
    }

    pub fn last_bet(&self) -> Option<f64> {
        self.last_bet
    }
}

impl BettingFn for GeneralAdaptiveBetting {
    fn bet(&mut self, prev: &ErrorTracker) -> Result<Wager> {
        let measured = prev.error_counts();
        let taus = measured.taus();
        let estimates = self.estimator.estimate(&measured);

        let clca_rates: Vec<(f64, f64)> = estimates
            .iter()
            .filter_map(|(cat, rate)| measured.bassort_value(*cat).map(|v| (v, *rate)))
            .collect();

        let mui = population_mean_if_h0(self.n_population, self.without_replacement, prev);
        let max_bet = self.max_loss / mui;
        let kelly = OptimalLambda::new(prev.noerror(), clca_rates, self.pools.as_ref(), mui, max_bet)?;
        let bet = kelly.solve()?;

        let sample_number = prev.number_of_samples() + 1;
        let named: Vec<(&str, f64)> = estimates.iter().map(|(cat, r)| (taus.name(*cat), *r)).collect();
        logging::log_estimate(sample_number, &named);
        logging::log_bet("kelly", sample_number, bet, mui, &[("p0", kelly.p0()), ("max_bet", max_bet)]);

        self.last_bet = Some(bet);
        Ok(Wager::Lambda(bet))
    }
}

/// Consecutive `noerror` draws needed before the risk estimate drops under
/// `risk_limit`, betting the largest allowed `lambda` against `mu = 1/2`.
/// `None` when such draws never grow the statistic.
pub fn samples_needed_no_errors(noerror: f64, max_loss: f64, risk_limit: f64) -> Option<usize> {
    let lambda = max_loss / NULL_MEAN;
    let term = 1.0 + lambda * (noerror - NULL_MEAN);
    if !(term > 1.0) || !(risk_limit > 0.0 && risk_limit < 1.0) {
        return None;
    }
    let n = (1.0 / risk_limit).ln() / term.ln();
    Some(n.floor() as usize + 1)
}

// =============================================================================
// ALPHA Truncated Shrinkage
// =============================================================================

/// Shrink the running sample mean toward `eta0` and truncate it to
/// `[mu_j + c / sqrt(d + j - 1), upper (1 - eps)]`.
///
/// With `f > 0` the estimate is also pulled toward `upper` in proportion to
/// `f / sd`, where `sd` is the sample standard deviation floored at `minsd`.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncShrinkage {
    n_population: usize,
    without_replacement: bool,
    upper: f64,
    minsd: f64,
    eta0: f64,
    c: f64,
    d: f64,
    f: f64,
}

impl TruncShrinkage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n_population: usize,
        without_replacement: bool,
        upper: f64,
        minsd: f64,
        eta0: f64,
        c: f64,
        d: f64,
        f: f64,
    ) -> Result<Self> {
        if !(upper > 0.0) {
            return Err(AuditError::InvalidConfig(format!("upper must be positive, got {}", upper)));
        }
        if !(c > 0.0) {
            return Err(AuditError::InvalidConfig(format!("c must be positive, got {}", c)));
        }
        if !(d > 0.0) {
            return Err(AuditError::InvalidConfig(format!("d must be positive, got {}", d)));
        }
        Ok(Self { n_population, without_replacement, upper, minsd, eta0, c, d, f })
    }

    /// The usual choice of `c`: half the distance from `eta0` to the null mean.
    pub fn default_c(eta0: f64) -> f64 {
        EPS.max((eta0 - NULL_MEAN) / 2.0)
    }

    pub fn eta(&self, prev: &dyn SampleTracker) -> f64 {
        let last_j = prev.number_of_samples();
        let dj1 = self.d + last_j as f64;
        let shrunk = (self.d * self.eta0 + prev.sum()) / dj1;

        let est = if self.f == 0.0 {
            shrunk
        } else {
            let sd = if last_j < 2 { 1.0 } else { prev.variance().sqrt().max(self.minsd) };
            (shrunk + self.upper * self.f / sd) / (1.0 + self.f / sd)
        };

        let mean = population_mean_if_h0(self.n_population, self.without_replacement, prev);
        let cap_below = mean + self.c / dj1.sqrt();
        let cap_above = self.upper * (1.0 - EPS);
        est.max(cap_below).min(cap_above)
    }
}

impl BettingFn for TruncShrinkage {
    fn bet(&mut self, prev: &ErrorTracker) -> Result<Wager> {
        let eta = self.eta(prev);
        let mu = population_mean_if_h0(self.n_population, self.without_replacement, prev);
        logging::log_bet("eta", prev.number_of_samples() + 1, eta, mu, &[]);
        Ok(Wager::Eta(eta))
    }
}

// =============================================================================
// Tests
// =============================================================================
