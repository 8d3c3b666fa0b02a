//! Simulated ballots, a plurality comparison assorter, and random sample
//! generators for exercising the engine.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::betting::GeneralAdaptiveBetting;
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::error_counts::ClcaErrorCounts;
use crate::martingale::{BettingMart, TestH0Result};
use crate::population::Population;
use crate::sampler::{Card, ClcaSamplerErrorTracker, ComparisonAssorter, SamplerTracker};
use crate::taus::TausRateTable;
use crate::tracker::Draw;

// =============================================================================
// Ballots
// =============================================================================

/// A ballot card or its manual interpretation. `votes[contest]` is the
/// candidate voted for, or `None` for an undervote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub votes: BTreeMap<u32, Option<u32>>,
    pub phantom: bool,
    pub pool_id: Option<u32>,
}

impl Ballot {
    pub fn vote(contest_id: u32, candidate: Option<u32>) -> Self {
        Self {
            votes: [(contest_id, candidate)].into_iter().collect(),
            phantom: false,
            pool_id: None,
        }
    }

    pub fn phantom(contest_id: u32) -> Self {
        Self {
            votes: [(contest_id, None)].into_iter().collect(),
            phantom: true,
            pool_id: None,
        }
    }

    pub fn choice(&self, contest_id: u32) -> Option<u32> {
        self.votes.get(&contest_id).copied().flatten()
    }
}

impl Card for Ballot {
    fn has_contest(&self, contest_id: u32) -> bool {
        self.votes.contains_key(&contest_id)
    }

    fn pool_id(&self) -> Option<u32> {
        self.pool_id
    }
}

// =============================================================================
// Plurality comparison assorter
// =============================================================================

/// Assorter for "winner beats loser": 1 for a winner vote, 0 for a loser
/// vote, 1/2 otherwise (upper bound 1), lifted to a comparison assorter with
/// `noerror = 1 / (2 - v)` for reported assorter margin `v`.
#[derive(Debug, Clone, PartialEq)]
pub struct PluralityAssorter {
    contest_id: u32,
    winner: u32,
    loser: u32,
    noerror: f64,
}

impl PluralityAssorter {
    pub fn new(contest_id: u32, winner: u32, loser: u32, reported_margin: f64) -> Result<Self> {
        if !(reported_margin > 0.0 && reported_margin <= 1.0) {
            return Err(AuditError::InvalidConfig(format!(
                "reported margin must be in (0, 1], got {}",
                reported_margin
            )));
        }
        Ok(Self {
            contest_id,
            winner,
            loser,
            noerror: 1.0 / (2.0 - reported_margin),
        })
    }

    /// Margin taken from the card records themselves.
    pub fn from_cards(contest_id: u32, winner: u32, loser: u32, cards: &[Ballot]) -> Result<Self> {
        let mut probe = Self { contest_id, winner, loser, noerror: 1.0 };
        let n = cards.len() as f64;
        let mean = cards.iter().map(|c| probe.cvr_assort(c)).sum::<f64>() / n;
        probe = Self::new(contest_id, winner, loser, 2.0 * mean - 1.0)?;
        Ok(probe)
    }

    pub fn assort(&self, ballot: &Ballot) -> f64 {
        match ballot.choice(self.contest_id) {
            Some(c) if c == self.winner => 1.0,
            Some(c) if c == self.loser => 0.0,
            _ => 0.5,
        }
    }

    fn cvr_assort(&self, card: &Ballot) -> f64 {
        if card.phantom {
            0.5
        } else {
            self.assort(card)
        }
    }

    fn mvr_assort(&self, mvr: &Ballot) -> f64 {
        if mvr.phantom || !mvr.has_contest(self.contest_id) {
            0.0
        } else {
            self.assort(mvr)
        }
    }

    /// Reported assorter margin `v = 2 * mean - 1`.
    pub fn reported_margin(&self) -> f64 {
        2.0 - 1.0 / self.noerror
    }
}

impl ComparisonAssorter<Ballot, Ballot> for PluralityAssorter {
    fn bassort(&self, mvr: &Ballot, card: &Ballot) -> f64 {
        let overstatement = self.cvr_assort(card) - self.mvr_assort(mvr);
        (1.0 - overstatement / self.upper_bound()) * self.noerror
    }

    fn noerror(&self) -> f64 {
        self.noerror
    }

    fn upper_bound(&self) -> f64 {
        1.0
    }
}

// =============================================================================
// Generators
// =============================================================================

/// Shuffled cards: `votes[c]` votes for candidate `c`, then undervotes and phantoms.
pub fn make_cards<R: Rng>(
    contest_id: u32,
    votes: &[usize],
    undervotes: usize,
    phantoms: usize,
    rng: &mut R,
) -> Vec<Ballot> {
    let mut cards = Vec::with_capacity(votes.iter().sum::<usize>() + undervotes + phantoms);
    for (candidate, n) in votes.iter().enumerate() {
        cards.extend((0..*n).map(|_| Ballot::vote(contest_id, Some(candidate as u32))));
    }
    cards.extend((0..undervotes).map(|_| Ballot::vote(contest_id, None)));
    cards.extend((0..phantoms).map(|_| Ballot::phantom(contest_id)));
    cards.shuffle(rng);
    cards
}

/// Manual interpretations that disagree with the card on a fraction
/// `fuzz_pct` of ballots. A fuzzed ballot moves to a different candidate or
/// to an undervote, uniformly. Phantoms stay phantoms.
pub fn fuzz_mvrs<R: Rng>(
    cards: &[Ballot],
    contest_id: u32,
    ncandidates: u32,
    fuzz_pct: f64,
    rng: &mut R,
) -> Vec<Ballot> {
    cards
        .iter()
        .map(|card| {
            if card.phantom || !rng.gen_bool(fuzz_pct.clamp(0.0, 1.0)) {
                return card.clone();
            }
            let current = card.choice(contest_id);
            let mut options: Vec<Option<u32>> = (0..ncandidates).map(Some).collect();
            options.push(None);
            options.retain(|o| *o != current);
            let mut mvr = card.clone();
            if let Some(choice) = options.choose(rng) {
                mvr.votes.insert(contest_id, *choice);
            }
            mvr
        })
        .collect()
}

/// A population of `n` values in `{0, 1}` whose mean is exactly 1/2 (for even `n`).
pub fn null_population<R: Rng>(n: usize, rng: &mut R) -> Vec<f64> {
    let mut values: Vec<f64> = (0..n).map(|i| if i < n / 2 { 1.0 } else { 0.0 }).collect();
    values.shuffle(rng);
    values
}

/// `n` comparison assort values drawn independently with the category
/// rates of `counts` (the rest are `noerror`).
pub fn sample_error_counts<R: Rng>(counts: &ClcaErrorCounts, n: usize, rng: &mut R) -> Vec<f64> {
    let errors = counts.error_values();
    let total = counts.total_samples().max(1) as f64;
    (0..n)
        .map(|_| {
            let mut u: f64 = rng.gen();
            for (value, count) in &errors {
                let rate = *count as f64 / total;
                if u < rate {
                    return *value;
                }
                u -= rate;
            }
            counts.noerror()
        })
        .collect()
}

// =============================================================================
// Simulated audits
// =============================================================================

/// A two-or-more candidate plurality contest to audit against fuzzed mvrs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSpec {
    pub contest_id: u32,
    /// Reported votes per candidate.
    pub votes: Vec<usize>,
    pub undervotes: usize,
    pub phantoms: usize,
    /// Fraction of ballots whose manual interpretation differs from the record.
    pub fuzz_pct: f64,
    pub max_samples: usize,
}

impl SimulationSpec {
    /// Reported winner and runner-up.
    pub fn winner_loser(&self) -> Result<(u32, u32)> {
        if self.votes.len() < 2 {
            return Err(AuditError::InvalidConfig("need at least two candidates".into()));
        }
        let mut ranked: Vec<(usize, u32)> = self.votes.iter().enumerate().map(|(i, v)| (*v, i as u32)).collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        Ok((ranked[0].1, ranked[1].1))
    }
}

/// Run one audit round of `spec` with the adaptive Kelly bet.
pub fn run_simulated_audit(spec: &SimulationSpec, config: &AuditConfig, seed: u64) -> Result<TestH0Result> {
    let mut rng = StdRng::seed_from_u64(seed);
    let (winner, loser) = spec.winner_loser()?;
    let cards = make_cards(spec.contest_id, &spec.votes, spec.undervotes, spec.phantoms, &mut rng);
    let mvrs = fuzz_mvrs(&cards, spec.contest_id, spec.votes.len() as u32, spec.fuzz_pct, &mut rng);

    let assorter = PluralityAssorter::from_cards(spec.contest_id, winner, loser, &cards)?;
    let population = Population::new(cards.len(), spec.phantoms, assorter.upper_bound(), assorter.noerror());
    let prior = ClcaErrorCounts::empty(assorter.noerror(), assorter.upper_bound());

    let pairs: Vec<(Ballot, Ballot)> = mvrs.into_iter().zip(cards).collect();
    let mut sampler =
        ClcaSamplerErrorTracker::new(spec.contest_id, pairs, assorter, config.allow_reset, None).with_seed(seed);

    let betting = GeneralAdaptiveBetting::new(&population, prior, None, config);
    let mut mart = BettingMart::new(betting, &population, config)?;
    let max_samples = spec.max_samples.min(sampler.max_samples());
    let result = mart.test_sampler(max_samples, 1.0, &mut sampler)?;
    sampler.done();
    Ok(result)
}

/// Run one audit round of `spec` over comparison values drawn with the
/// historical error rates for its number of candidates, scaled by
/// `spec.fuzz_pct`. No ballots are built.
pub fn run_rate_table_audit(spec: &SimulationSpec, config: &AuditConfig, seed: u64) -> Result<TestH0Result> {
    let mut rng = StdRng::seed_from_u64(seed);
    let (winner, loser) = spec.winner_loser()?;
    let n = spec.votes.iter().sum::<usize>() + spec.undervotes + spec.phantoms;
    let margin = (spec.votes[winner as usize] as f64 - spec.votes[loser as usize] as f64) / n as f64;

    let assorter = PluralityAssorter::new(spec.contest_id, winner, loser, margin)?;
    let (noerror, upper) = (assorter.noerror(), assorter.upper_bound());
    let population = Population::new(n, spec.phantoms, upper, noerror);
    let counts = TausRateTable::make_error_counts(spec.votes.len(), spec.fuzz_pct, n, noerror, upper);
    let values = sample_error_counts(&counts, n, &mut rng);

    let betting = GeneralAdaptiveBetting::new(&population, ClcaErrorCounts::empty(noerror, upper), None, config);
    let mut mart = BettingMart::new(betting, &population, config)?;
    let mut draws = values.into_iter();
    mart.test_h0(spec.max_samples.min(n), 1.0, || {
        draws
            .next()
            .map(|value| Draw::new(value, true))
            .ok_or(AuditError::NoSamplesLeft { contest_id: spec.contest_id })
    })
}

/// `q`-quantile of sorted sample counts (nearest rank).
pub fn quantile(sorted: &[usize], q: f64) -> Option<usize> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (q.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taus::{TauCategory, Taus};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bassort_categories() {
        let a = PluralityAssorter::new(1, 0, 1, 0.1).unwrap();
        let taus = Taus::new(a.upper_bound());
        let winner = Ballot::vote(1, Some(0));
        let loser = Ballot::vote(1, Some(1));
        let under = Ballot::vote(1, None);
        let phantom = Ballot::phantom(1);

        let name = |mvr: &Ballot, card: &Ballot| taus.name_of(a.bassort(mvr, card) / a.noerror());
        assert_eq!(name(&winner, &winner), "noerror");
        assert_eq!(name(&loser, &winner), "p2o");
        assert_eq!(name(&under, &winner), "p1o");
        assert_eq!(name(&under, &loser), "p1u");
        assert_eq!(name(&winner, &loser), "p2u");
        assert_eq!(name(&phantom, &phantom), "p1o");
        assert!((a.reported_margin() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_from_cards_margin() {
        let mut rng = StdRng::seed_from_u64(11);
        let cards = make_cards(3, &[600, 400], 0, 0, &mut rng);
        let a = PluralityAssorter::from_cards(3, 0, 1, &cards).unwrap();
        assert!((a.reported_margin() - 0.2).abs() < 1e-12);
        assert!(PluralityAssorter::from_cards(3, 1, 0, &cards).is_err());
    }

    #[test]
    fn test_fuzz_rate() {
        let mut rng = StdRng::seed_from_u64(5);
        let cards = make_cards(1, &[5000, 5000], 0, 10, &mut rng);
        let mvrs = fuzz_mvrs(&cards, 1, 2, 0.05, &mut rng);
        let changed = cards.iter().zip(&mvrs).filter(|(c, m)| c != m).count();
        assert!((350..650).contains(&changed), "changed={}", changed);
        assert!(mvrs.iter().filter(|m| m.phantom).count() == 10);
    }

    #[test]
    fn test_null_population_mean() {
        let mut rng = StdRng::seed_from_u64(1);
        let values = null_population(100, &mut rng);
        assert_eq!(values.iter().sum::<f64>(), 50.0);
    }

    #[test]
    fn test_winner_loser() {
        let spec = SimulationSpec {
            contest_id: 1,
            votes: vec![300, 500, 200],
            undervotes: 0,
            phantoms: 0,
            fuzz_pct: 0.0,
            max_samples: 10,
        };
        assert_eq!(spec.winner_loser().unwrap(), (1, 0));
        let one = SimulationSpec { votes: vec![10], ..spec };
        assert!(one.winner_loser().is_err());
    }

    #[test]
    fn test_quantile() {
        let v = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(quantile(&v, 0.5), Some(5));
        assert_eq!(quantile(&v, 0.9), Some(9));
        assert_eq!(quantile(&v, 1.0), Some(10));
        assert_eq!(quantile(&v, 0.0), Some(1));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_sample_error_counts_rates() {
        let mut rng = StdRng::seed_from_u64(2);
        let counts = ClcaErrorCounts::new([(TauCategory::WinLos, 100)].into_iter().collect(), 1000, 0.5, 1.0);
        let values = sample_error_counts(&counts, 20_000, &mut rng);
        let zeros = values.iter().filter(|v| **v == 0.0).count() as f64 / 20_000.0;
        assert!((zeros - 0.1).abs() < 0.01, "{}", zeros);
        assert!(values.iter().all(|v| *v == 0.0 || *v == 0.5));
    }

    #[test]
    fn test_rate_table_audit() {
        let spec = SimulationSpec {
            contest_id: 2,
            votes: vec![600, 400],
            undervotes: 0,
            phantoms: 0,
            fuzz_pct: 0.01,
            max_samples: 1000,
        };
        let config = AuditConfig::default();
        let result = run_rate_table_audit(&spec, &config, 9).unwrap();
        assert!(result.status.is_success(), "{:?}", result.status);
        assert_eq!(result.tracker.tracked_samples(), result.sample_count);
        assert!(result.sample_count < 200);

        let again = run_rate_table_audit(&spec, &config, 9).unwrap();
        assert_eq!(again.sample_count, result.sample_count);

        let clean = SimulationSpec { fuzz_pct: 0.0, ..spec };
        let result = run_rate_table_audit(&clean, &config, 9).unwrap();
        assert!(result.tracker.error_counts().counts().is_empty());
    }
}
