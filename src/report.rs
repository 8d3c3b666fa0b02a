//! Plain-text summaries for audit reports.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::error_counts::ClcaErrorCounts;
use crate::martingale::TestH0Result;
use crate::taus::{TauCategory, Taus};
use crate::tracker::SampleTracker;

/// One row per category: name, assort value, count, rate.
pub fn error_counts_table(counts: &ClcaErrorCounts) -> String {
    let taus = counts.taus();
    let mut out = String::new();
    let _ = writeln!(out, "{:>10} {:>10} {:>8} {:>10}", "category", "assort", "count", "rate");
    let _ = writeln!(out, "{}", "-".repeat(41));
    for cat in taus.error_categories() {
        let value = counts.bassort_value(cat).unwrap_or(0.0);
        let _ = writeln!(
            out,
            "{:>10} {:>10.4} {:>8} {:>10.6}",
            taus.name(cat),
            value,
            counts.count(cat),
            counts.rate(cat)
        );
    }
    let _ = writeln!(
        out,
        "{:>10} {:>10.4} {:>8} {:>10.6}",
        taus.name(TauCategory::NoError),
        counts.noerror(),
        counts.total_samples().saturating_sub(counts.counts().values().sum()),
        1.0 - counts.sum_rates()
    );
    out
}

/// `name=rate` pairs for estimated rates.
pub fn rates_line(taus: &Taus, rates: &BTreeMap<TauCategory, f64>) -> String {
    let parts: Vec<String> = rates
        .iter()
        .map(|(cat, r)| format!("{}={:.6}", taus.name(*cat), r))
        .collect();
    parts.join(" ")
}

pub fn result_summary(contest_id: u32, result: &TestH0Result, risk_limit: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "contest {}: {}", contest_id, result.status);
    let _ = writeln!(out, "  samples used:     {}", result.sample_count);
    if let Some(first) = result.sample_first_under_limit {
        let _ = writeln!(out, "  first under {:.3}: sample {}", risk_limit, first);
    }
    let _ = writeln!(out, "  pvalue min/last:  {:.6} / {:.6}", result.pvalue_min, result.pvalue_last);
    let _ = writeln!(out, "  sample mean:      {:.6}", result.tracker.mean());
    let _ = writeln!(out, "  errors:           {}", result.tracker.error_counts().show());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_counts_table_lists_all_categories() {
        let counts = ClcaErrorCounts::new([(TauCategory::WinLos, 2)].into_iter().collect(), 100, 0.52, 1.0);
        let table = error_counts_table(&counts);
        for name in ["p2o", "p1o", "p1u", "p2u", "noerror"] {
            assert!(table.contains(name), "{}", table);
        }
        assert!(table.contains("0.020000"));
        assert!(table.contains("98"));
    }

    #[test]
    fn test_rates_line() {
        let taus = Taus::new(1.3);
        let rates: BTreeMap<TauCategory, f64> = [(TauCategory::OthLos, 0.01)].into_iter().collect();
        assert_eq!(rates_line(&taus, &rates), "oth-los=0.010000");
    }
}
