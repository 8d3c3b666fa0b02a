//! Error taxonomy for comparison audits.
//!
//! A comparison assort value divided by `noerror` is a ratio tau = 1 - o/u,
//! where `o` is the overstatement (recorded assort minus manual assort) and
//! `u` the assorter upper bound. Because the assorter only takes the values
//! `{0, 1/2, u}`, tau can only take seven values:
//!
//! | recorded - found | tau      | category  | SHANGRLA |
//! |------------------|----------|-----------|----------|
//! | winner - loser   | 0        | win-los   | p2o      |
//! | winner - other   | 1/2u     | win-oth   | p1o      |
//! | other - loser    | 1-1/2u   | oth-los   | p1o      |
//! | any agreement    | 1        | noerror   |          |
//! | loser - other    | 1+1/2u   | los-oth   | p1u      |
//! | other - winner   | 2-1/2u   | oth-win   | p1u      |
//! | loser - winner   | 2        | los-win   | p2u      |
//!
//! When `u == 1` the pairs collapse and only the five SHANGRLA categories remain.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};
use crate::error_counts::ClcaErrorCounts;
use crate::numeric::double_is_close;

/// One of the seven discrepancy categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TauCategory {
    #[serde(rename = "win-los")]
    WinLos,
    #[serde(rename = "win-oth")]
    WinOth,
    #[serde(rename = "oth-los")]
    OthLos,
    #[serde(rename = "noerror")]
    NoError,
    #[serde(rename = "los-oth")]
    LosOth,
    #[serde(rename = "oth-win")]
    OthWin,
    #[serde(rename = "los-win")]
    LosWin,
}

impl TauCategory {
    pub const ALL: [TauCategory; 7] = [
        TauCategory::WinLos,
        TauCategory::WinOth,
        TauCategory::OthLos,
        TauCategory::NoError,
        TauCategory::LosOth,
        TauCategory::OthWin,
        TauCategory::LosWin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TauCategory::WinLos => "win-los",
            TauCategory::WinOth => "win-oth",
            TauCategory::OthLos => "oth-los",
            TauCategory::NoError => "noerror",
            TauCategory::LosOth => "los-oth",
            TauCategory::OthWin => "oth-win",
            TauCategory::LosWin => "los-win",
        }
    }

    /// SHANGRLA name used when the taxonomy has five categories.
    pub fn shangrla_name(&self) -> Option<&'static str> {
        match self {
            TauCategory::WinLos => Some("p2o"),
            TauCategory::WinOth => Some("p1o"),
            TauCategory::NoError => Some("noerror"),
            TauCategory::LosOth => Some("p1u"),
            TauCategory::LosWin => Some("p2u"),
            TauCategory::OthLos | TauCategory::OthWin => None,
        }
    }

    /// Accepts both the seven-category names and the SHANGRLA aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        let cat = match name {
            "win-los" | "p2o" => TauCategory::WinLos,
            "win-oth" | "p1o" => TauCategory::WinOth,
            "oth-los" => TauCategory::OthLos,
            "noerror" => TauCategory::NoError,
            "los-oth" | "p1u" => TauCategory::LosOth,
            "oth-win" => TauCategory::OthWin,
            "los-win" | "p2u" => TauCategory::LosWin,
            _ => return None,
        };
        Some(cat)
    }

    pub fn is_error(&self) -> bool {
        *self != TauCategory::NoError
    }
}

impl fmt::Display for TauCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const UNKNOWN: &str = "unknown";

/// Fixed lookup table of `(category, ratio)` for one upper bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Taus {
    upper: f64,
    five: bool,
    table: Vec<(TauCategory, f64)>,
}

impl Taus {
    pub fn new(upper: f64) -> Self {
        Self::build(upper, false)
    }

    /// Always use seven categories, even when `upper == 1`.
    pub fn with_seven(upper: f64) -> Self {
        Self::build(upper, true)
    }

    fn build(upper: f64, force_seven: bool) -> Self {
        // upper > 1/2 so u12 < 1
        let u12 = 1.0 / (2.0 * upper);
        let five = upper == 1.0 && !force_seven;
        let table = if five {
            vec![
                (TauCategory::WinLos, 0.0),
                (TauCategory::WinOth, 0.5),
                (TauCategory::NoError, 1.0),
                (TauCategory::LosOth, 1.5),
                (TauCategory::LosWin, 2.0),
            ]
        } else {
            vec![
                (TauCategory::WinLos, 0.0),
                (TauCategory::WinOth, u12),
                (TauCategory::OthLos, 1.0 - u12),
                (TauCategory::NoError, 1.0),
                (TauCategory::LosOth, 1.0 + u12),
                (TauCategory::OthWin, 2.0 - u12),
                (TauCategory::LosWin, 2.0),
            ]
        };
        Self { upper, five, table }
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn is_five(&self) -> bool {
        self.five
    }

    /// Nearest category within floating tolerance.
    pub fn category_of(&self, ratio: f64) -> Option<TauCategory> {
        self.table
            .iter()
            .find(|(_, tau)| double_is_close(*tau, ratio))
            .map(|(cat, _)| *cat)
    }

    /// Category label for `ratio`, or `"unknown"`.
    pub fn name_of(&self, ratio: f64) -> &'static str {
        match self.category_of(ratio) {
            Some(cat) => self.name(cat),
            None => UNKNOWN,
        }
    }

    /// Label of a category in this taxonomy's naming.
    pub fn name(&self, cat: TauCategory) -> &'static str {
        if self.five {
            cat.shangrla_name().unwrap_or(cat.as_str())
        } else {
            cat.as_str()
        }
    }

    pub fn ratio(&self, cat: TauCategory) -> Option<f64> {
        self.table.iter().find(|(c, _)| *c == cat).map(|(_, tau)| *tau)
    }

    /// Ratio for a category name (either naming), 0 when the name is unknown.
    pub fn value_of(&self, name: &str) -> f64 {
        TauCategory::from_name(name)
            .and_then(|cat| self.ratio(cat))
            .unwrap_or(0.0)
    }

    pub fn is_error(&self, ratio: f64) -> bool {
        self.category_of(ratio).map(|c| c.is_error()).unwrap_or(false)
    }

    /// The worst-case-for-winner category that phantom ballots produce.
    pub fn phantom_category(&self) -> TauCategory {
        if self.five {
            TauCategory::WinOth
        } else {
            TauCategory::OthLos
        }
    }

    pub fn is_phantom(&self, ratio: f64) -> bool {
        self.category_of(ratio) == Some(self.phantom_category())
    }

    pub fn categories(&self) -> impl Iterator<Item = TauCategory> + '_ {
        self.table.iter().map(|(cat, _)| *cat)
    }

    pub fn error_categories(&self) -> impl Iterator<Item = TauCategory> + '_ {
        self.categories().filter(|c| c.is_error())
    }

    pub fn values(&self) -> Vec<f64> {
        self.table.iter().map(|(_, tau)| *tau).collect()
    }
}

impl fmt::Display for Taus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .table
            .iter()
            .map(|(cat, tau)| format!("{}={:.4}", self.name(*cat), tau))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

// =============================================================================
// Named rates
// =============================================================================

/// Per-category rates over a population, keyed by category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TausRates {
    rates: Vec<(TauCategory, f64)>,
}

impl TausRates {
    pub fn new(rates: Vec<(TauCategory, f64)>) -> Self {
        Self { rates }
    }

    /// Parse `(name, rate)` pairs; names may be SHANGRLA aliases.
    pub fn from_named(named: &[(&str, f64)]) -> Result<Self> {
        let mut rates = Vec::with_capacity(named.len());
        for (name, rate) in named {
            let cat = TauCategory::from_name(name).ok_or_else(|| {
                AuditError::InvalidConfig(format!("unknown tau category name '{}'", name))
            })?;
            rates.push((cat, *rate));
        }
        Ok(Self { rates })
    }

    pub fn noerror_rate(&self) -> f64 {
        1.0 - self
            .rates
            .iter()
            .filter(|(c, _)| c.is_error())
            .map(|(_, r)| r)
            .sum::<f64>()
    }

    pub fn rate(&self, cat: TauCategory) -> Option<f64> {
        if cat == TauCategory::NoError {
            return Some(self.noerror_rate());
        }
        self.rates.iter().find(|(c, _)| *c == cat).map(|(_, r)| *r)
    }

    /// Error counts for `total_samples` draws: count = floor(rate * total),
    /// keyed by the category's assort value `tau * noerror`.
    pub fn make_error_counts(&self, total_samples: usize, noerror: f64, upper: f64) -> ClcaErrorCounts {
        self.scaled_error_counts(1.0, total_samples, noerror, upper)
    }

    fn scaled_error_counts(&self, scale: f64, total_samples: usize, noerror: f64, upper: f64) -> ClcaErrorCounts {
        let taus = Taus::new(upper);
        let counts = taus
            .error_categories()
            .filter_map(|cat| {
                self.rate(cat)
                    .map(|rate| (cat, (total_samples as f64 * rate * scale) as usize))
            })
            .collect();
        ClcaErrorCounts::new(counts, total_samples, noerror, upper)
    }
}

// =============================================================================
// Historical rate table
// =============================================================================

/// Normalized per-category error rates observed when fuzzing simulated
/// elections, by number of candidates (2..=10). Multiply by a fuzz percentage
/// to get error rates. Read-only.
pub struct TausRateTable;

// win-los, win-oth, oth-los, los-oth, oth-win, los-win
const NORMALIZED_RATES: [[f64; 6]; 9] = [
    [0.21339818181818182, 0.2664109090909091, 0.2664109090909091, 0.2591127272727273, 0.2591127272727273, 0.20853636363636363],
    [0.13128727272727272, 0.3697027272727273, 0.3697027272727273, 0.26815272727272726, 0.26815272727272726, 0.0780790909090909],
    [0.08808363636363636, 0.3794666666666667, 0.3794666666666667, 0.23896242424242425, 0.23896242424242425, 0.04194484848484849],
    [0.062468636363636365, 0.3578081818181818, 0.3578081818181818, 0.20814772727272726, 0.20814772727272726, 0.025486818181818183],
    [0.048581454545454546, 0.3369643636363636, 0.3369643636363636, 0.19450036363636364, 0.19450036363636364, 0.02000618181818182],
    [0.039082121212121214, 0.32060333333333335, 0.32060333333333335, 0.16815060606060606, 0.16815060606060606, 0.013656969696969697],
    [0.03302077922077922, 0.30717766233766236, 0.30717766233766236, 0.15172103896103897, 0.15172103896103897, 0.010150649350649351],
    [0.028155909090909093, 0.29654977272727273, 0.29654977272727273, 0.14481227272727273, 0.14481227272727273, 0.008987727272727272],
    [0.02313131313131313, 0.2760222222222222, 0.2760222222222222, 0.1349258585858586, 0.1349258585858586, 0.007379595959595959],
];

const TABLE_CATEGORIES: [TauCategory; 6] = [
    TauCategory::WinLos,
    TauCategory::WinOth,
    TauCategory::OthLos,
    TauCategory::LosOth,
    TauCategory::OthWin,
    TauCategory::LosWin,
];

impl TausRateTable {
    pub const MIN_CANDIDATES: usize = 2;
    pub const MAX_CANDIDATES: usize = 10;

    /// Normalized rates for `ncandidates`, clamped to the table's range.
    pub fn rates(ncandidates: usize) -> TausRates {
        let n = ncandidates.clamp(Self::MIN_CANDIDATES, Self::MAX_CANDIDATES);
        let row = &NORMALIZED_RATES[n - Self::MIN_CANDIDATES];
        TausRates::new(TABLE_CATEGORIES.iter().copied().zip(row.iter().copied()).collect())
    }

    /// Expected error counts for a fuzzed sample of `total_samples` ballots.
    pub fn make_error_counts(
        ncandidates: usize,
        fuzz_pct: f64,
        total_samples: usize,
        noerror: f64,
        upper: f64,
    ) -> ClcaErrorCounts {
        Self::rates(ncandidates).scaled_error_counts(fuzz_pct, total_samples, noerror, upper)
    }
}
