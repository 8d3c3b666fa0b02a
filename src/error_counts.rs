//! Immutable snapshot of observed comparison errors.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};
use crate::taus::{TauCategory, Taus};

/// Counts of each error category over `total_samples` draws.
///
/// `noerror` draws are not stored; they are whatever the error counts leave
/// of `total_samples`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClcaErrorCounts {
    counts: BTreeMap<TauCategory, usize>,
    total_samples: usize,
    noerror: f64,
    upper: f64,
}

impl ClcaErrorCounts {
    pub fn new(counts: BTreeMap<TauCategory, usize>, total_samples: usize, noerror: f64, upper: f64) -> Self {
        let counts = counts
            .into_iter()
            .filter(|(cat, _)| cat.is_error())
            .collect();
        Self { counts, total_samples, noerror, upper }
    }

    pub fn empty(noerror: f64, upper: f64) -> Self {
        Self::new(BTreeMap::new(), 0, noerror, upper)
    }

    /// Build from raw assort values. Values classified as `noerror` are dropped.
    pub fn from_values(values: &[(f64, usize)], total_samples: usize, noerror: f64, upper: f64) -> Result<Self> {
        let taus = Taus::new(upper);
        let mut counts = BTreeMap::new();
        for (value, count) in values {
            let cat = taus
                .category_of(value / noerror)
                .ok_or(AuditError::UnknownCategory { value: *value, noerror })?;
            *counts.entry(cat).or_insert(0) += count;
        }
        Ok(Self::new(counts, total_samples, noerror, upper))
    }

    pub fn taus(&self) -> Taus {
        Taus::new(self.upper)
    }

    pub fn counts(&self) -> &BTreeMap<TauCategory, usize> {
        &self.counts
    }

    pub fn count(&self, cat: TauCategory) -> usize {
        self.counts.get(&cat).copied().unwrap_or(0)
    }

    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    pub fn noerror(&self) -> f64 {
        self.noerror
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn rate(&self, cat: TauCategory) -> f64 {
        if self.total_samples == 0 {
            0.0
        } else {
            self.count(cat) as f64 / self.total_samples as f64
        }
    }

    /// Per-category error rate (zero when there are no samples).
    pub fn rates(&self) -> BTreeMap<TauCategory, f64> {
        self.counts.keys().map(|cat| (*cat, self.rate(*cat))).collect()
    }

    pub fn sum_rates(&self) -> f64 {
        self.counts.keys().map(|cat| self.rate(*cat)).sum()
    }

    /// Fraction of samples that were errors of any kind.
    pub fn clca_error_rate(&self) -> f64 {
        self.sum_rates()
    }

    pub fn bassort_value(&self, cat: TauCategory) -> Option<f64> {
        self.taus().ratio(cat).map(|tau| tau * self.noerror)
    }

    /// `tau * noerror` for every category, ascending.
    pub fn bassort_values(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.taus().values().iter().map(|tau| tau * self.noerror).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values
    }

    /// `(assort value, count)` for each observed error category.
    pub fn error_values(&self) -> Vec<(f64, usize)> {
        let taus = self.taus();
        self.counts
            .iter()
            .filter_map(|(cat, n)| taus.ratio(*cat).map(|tau| (tau * self.noerror, *n)))
            .collect()
    }

    pub fn category_of_value(&self, value: f64) -> Option<TauCategory> {
        self.taus().category_of(value / self.noerror)
    }

    /// True when `value` falls in the category phantom ballots produce.
    pub fn is_phantom(&self, value: f64) -> bool {
        self.taus().is_phantom(value / self.noerror)
    }

    /// Expected log growth of one betting term at bet `lambda` against null mean `mu`:
    /// `sum_c rate(c) ln(1 + lambda (value(c) - mu)) + p0 ln(1 + lambda (noerror - mu))`.
    pub fn expected_log_growth(&self, lambda: f64, mu: f64) -> f64 {
        let p0 = 1.0 - self.sum_rates();
        let noerror_term = (1.0 + lambda * (self.noerror - mu)).ln() * p0;
        let error_terms: f64 = self
            .counts
            .keys()
            .filter_map(|cat| {
                let value = self.bassort_value(*cat)?;
                Some((1.0 + lambda * (value - mu)).ln() * self.rate(*cat))
            })
            .sum();
        noerror_term + error_terms
    }

    /// One-line `[name=count, ...]` summary.
    pub fn show(&self) -> String {
        if self.counts.is_empty() {
            return "no errors".to_string();
        }
        let taus = self.taus();
        let parts: Vec<String> = self
            .counts
            .iter()
            .map(|(cat, n)| format!("{}={}", taus.name(*cat), n))
            .collect();
        format!("[{}]", parts.join(", "))
    }
}

impl fmt::Display for ClcaErrorCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClcaErrorCounts(totalSamples={}, noerror={}, upper={}) {}",
            self.total_samples,
            self.noerror,
            self.upper,
            self.show()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_counts() -> ClcaErrorCounts {
        let mut counts = BTreeMap::new();
        counts.insert(TauCategory::WinLos, 2);
        counts.insert(TauCategory::OthLos, 5);
        counts.insert(TauCategory::LosWin, 3);
        counts.insert(TauCategory::NoError, 990);
        ClcaErrorCounts::new(counts, 1000, 0.52, 1.3)
    }

    #[test]
    fn test_noerror_not_stored() {
        let c = sample_counts();
        assert_eq!(c.count(TauCategory::NoError), 0);
        assert_eq!(c.counts().len(), 3);
    }

    #[test]
    fn test_rates_and_sum() {
        let c = sample_counts();
        assert!((c.rate(TauCategory::OthLos) - 0.005).abs() < 1e-15);
        assert!((c.sum_rates() - 0.01).abs() < 1e-12);
        assert!(c.sum_rates() <= 1.0);
        assert_eq!(ClcaErrorCounts::empty(0.52, 1.3).sum_rates(), 0.0);
    }

    #[test]
    fn test_sum_rates_for_every_category() {
        let upper = 10.0;
        let noerror = 1.0 / (2.0 - 0.02 / upper);
        let taus = Taus::new(upper);
        let counts = taus.error_categories().map(|c| (c, 10)).collect();
        let c = ClcaErrorCounts::new(counts, 1000, noerror, upper);
        assert!((c.sum_rates() - 0.06).abs() < 1e-12);
    }

    #[test]
    fn test_bassort_values_scaled_by_noerror() {
        let c = sample_counts();
        let values = c.bassort_values();
        assert_eq!(values.len(), 7);
        assert_eq!(values[0], 0.0);
        assert!((values[3] - 0.52).abs() < 1e-12);
        assert!((values[6] - 1.04).abs() < 1e-12);
    }

    #[test]
    fn test_from_values_classifies() {
        let noerror = 0.42;
        let values = [(2.0 * noerror, 2), (1.5 * noerror, 1), (0.5 * noerror, 1), (0.0, 1), (noerror, 1)];
        let c = ClcaErrorCounts::from_values(&values, 6, noerror, 1.0).unwrap();
        assert_eq!(c.count(TauCategory::LosWin), 2);
        assert_eq!(c.count(TauCategory::LosOth), 1);
        assert_eq!(c.count(TauCategory::WinOth), 1);
        assert_eq!(c.count(TauCategory::WinLos), 1);
        assert_eq!(c.show(), "[p2o=1, p1o=1, p1u=1, p2u=2]");

        let bad = ClcaErrorCounts::from_values(&[(0.3, 1)], 1, noerror, 1.0);
        assert!(matches!(bad, Err(AuditError::UnknownCategory { .. })));
    }

    #[test]
    fn test_is_phantom() {
        let c = sample_counts();
        let oth_los = c.bassort_value(TauCategory::OthLos).unwrap();
        assert!(c.is_phantom(oth_los));
        assert!(!c.is_phantom(0.0));
    }

    #[test]
    fn test_expected_log_growth_matches_raw_samples() {
        let noerror = 0.55;
        let upper = 1.3;
        let c = ClcaErrorCounts::new(
            [(TauCategory::WinLos, 3), (TauCategory::OthWin, 4), (TauCategory::WinOth, 1)]
                .into_iter()
                .collect(),
            200,
            noerror,
            upper,
        );
        let mut raw = Vec::new();
        for (value, n) in c.error_values() {
            raw.extend(std::iter::repeat(value).take(n));
        }
        raw.extend(std::iter::repeat(noerror).take(200 - raw.len()));

        let mu = 0.5;
        for lambda in [0.0, 0.3, 1.0, 1.7] {
            let direct: f64 =
                raw.iter().map(|x| (1.0 + lambda * (x - mu)).ln()).sum::<f64>() / raw.len() as f64;
            let agg = c.expected_log_growth(lambda, mu);
            assert!((direct - agg).abs() < 1e-12, "lambda={} {} vs {}", lambda, direct, agg);
        }
        assert_eq!(c.expected_log_growth(0.0, mu), 0.0);
    }

    #[test]
    fn test_expected_log_growth_without_samples() {
        let c = ClcaErrorCounts::new([(TauCategory::WinLos, 3)].into_iter().collect(), 0, 0.55, 1.0);
        assert_eq!(c.sum_rates(), 0.0);
        let growth = c.expected_log_growth(0.8, 0.5);
        assert!(growth.is_finite());
        assert!((growth - (1.0 + 0.8 * 0.05f64).ln()).abs() < 1e-12);
    }
}
