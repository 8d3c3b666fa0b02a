//! Per-category error rate estimation.
//!
//! Each error category's rate is a shrink-trunc blend of an a-priori rate
//! (carried over from earlier rounds) and the rate measured so far in this
//! round. The phantom category is floored at `nphantoms / N`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error_counts::ClcaErrorCounts;
use crate::population::Population;
use crate::taus::TauCategory;

/// `(d * apriori + count) / (d + n - 1)`, or `apriori` when `n == 0`.
///
/// `count` is the number of the `n` measured draws that fell in the category.
/// `d` weighs the prior; the estimate moves from the prior to `count / n`
/// as `n` grows.
pub fn shrink_trunc_estimate(apriori: f64, count: usize, n: usize, d: f64) -> f64 {
    if n == 0 {
        return apriori;
    }
    (d * apriori + count as f64) / (d + n as f64 - 1.0)
}

/// Assort values of ballots resolved through pooled (batch) averages and the
/// rate at which each occurs in the population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolAssortRates {
    pub total_in_pools: usize,
    pub rates: Vec<(f64, f64)>,
}

impl PoolAssortRates {
    pub fn sum_rates(&self) -> f64 {
        self.rates.iter().map(|(_, r)| r).sum()
    }

    /// Nonzero `(value, rate)` terms.
    pub fn terms(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.rates.iter().copied().filter(|(_, r)| *r != 0.0)
    }
}

#[derive(Debug, Clone)]
pub struct RateEstimator {
    prior: ClcaErrorCounts,
    shrinkage: f64,
    phantom_rate: f64,
    scale: f64,
}

impl RateEstimator {
    pub fn new(prior: ClcaErrorCounts, shrinkage: f64, population: &Population, pools: Option<&PoolAssortRates>) -> Self {
        let n = population.n_population as f64;
        let scale = match pools {
            Some(p) => (n - p.total_in_pools as f64) / n,
            None => 1.0,
        };
        Self {
            prior,
            shrinkage,
            phantom_rate: population.phantom_rate(),
            scale,
        }
    }

    pub fn prior(&self) -> &ClcaErrorCounts {
        &self.prior
    }

    /// Fraction of the population subject to per-ballot error tracking.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Estimated rate of every error category given this round's measurements.
    pub fn estimate(&self, measured: &ClcaErrorCounts) -> BTreeMap<TauCategory, f64> {
        let taus = measured.taus();
        let phantom = taus.phantom_category();
        let n = measured.total_samples();

        taus.error_categories()
            .map(|cat| {
                let mut rate = self.scale
                    * shrink_trunc_estimate(self.prior.rate(cat), measured.count(cat), n, self.shrinkage);
                if cat == phantom {
                    rate = rate.max(self.phantom_rate);
                }
                (cat, rate)
            })
            .collect()
    }

    /// Estimates before any draw of this round.
    pub fn starting_rates(&self) -> BTreeMap<TauCategory, f64> {
        self.estimate(&ClcaErrorCounts::empty(self.prior.noerror(), self.prior.upper()))
    }
}
