//! Samplers over `(mvr, card)` pairs.
//!
//! A sampler walks a fixed (or reshuffled) list of manual-interpretation /
//! card-record pairs, skipping cards that do not carry the contest, and hands
//! out each comparison assort value as a [`Draw`]. Its own running statistics
//! lag one draw behind: the value just handed out is folded in on the next
//! `sample()` call, or by `done()`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{AuditError, Result};
use crate::error_counts::ClcaErrorCounts;
use crate::logging;
use crate::numeric::Welford;
use crate::tracker::{Draw, ErrorTracker};

/// What a sampler needs to know about a card.
pub trait Card {
    fn has_contest(&self, contest_id: u32) -> bool;

    /// Batch the card belongs to when its record is a pooled average.
    fn pool_id(&self) -> Option<u32> {
        None
    }
}

/// Maps an `(mvr, card)` pair to a comparison assort value in `[0, 2 * noerror]`.
pub trait ComparisonAssorter<M, C> {
    fn bassort(&self, mvr: &M, card: &C) -> f64;
    fn noerror(&self) -> f64;
    /// Upper bound `u` of the underlying assorter.
    fn upper_bound(&self) -> f64;
}

pub trait SamplerTracker {
    /// Next assort value. Fails with `NoSamplesLeft` when the list is used up.
    fn sample(&mut self) -> Result<Draw>;
    /// Start over with a fresh permutation.
    fn reset(&mut self) -> Result<()>;
    /// Cards available to this contest.
    fn max_samples(&self) -> usize;
    /// Position in the pair list just past the last card used.
    fn max_sample_index_used(&self) -> usize;
    fn nmvrs(&self) -> usize;
    /// Draws folded into `welford()`; one behind until `done()`.
    fn number_of_samples(&self) -> usize;
    fn welford(&self) -> &Welford;
    /// Fold in the last value handed out.
    fn done(&mut self);
}

// =============================================================================
// Cursor over a permuted pair list
// =============================================================================

#[derive(Debug, Clone)]
struct Cursor {
    contest_id: u32,
    permuted: Vec<usize>,
    idx: usize,
    max_sample_index: usize,
    max_samples: usize,
    allow_reset: bool,
    welford: Welford,
    last: Option<f64>,
    rng: StdRng,
}

impl Cursor {
    fn new<M, C: Card>(
        contest_id: u32,
        pairs: &[(M, C)],
        allow_reset: bool,
        max_sample_index: Option<usize>,
    ) -> Self {
        let max_sample_index = max_sample_index.map_or(pairs.len(), |m| m.min(pairs.len()));
        let permuted: Vec<usize> = (0..pairs.len()).collect();
        let mut cursor = Self {
            contest_id,
            permuted,
            idx: 0,
            max_sample_index,
            max_samples: 0,
            allow_reset,
            welford: Welford::new(),
            last: None,
            rng: StdRng::from_entropy(),
        };
        cursor.max_samples = cursor.count_available(pairs);
        cursor
    }

    fn count_available<M, C: Card>(&self, pairs: &[(M, C)]) -> usize {
        self.permuted[..self.max_sample_index]
            .iter()
            .filter(|&&i| pairs[i].1.has_contest(self.contest_id))
            .count()
    }

    fn next_pair<'a, M, C: Card>(&mut self, pairs: &'a [(M, C)]) -> Result<&'a (M, C)> {
        while self.idx < self.max_sample_index {
            let pair = &pairs[self.permuted[self.idx]];
            self.idx += 1;
            if pair.1.has_contest(self.contest_id) {
                return Ok(pair);
            }
        }
        logging::log_sampler_exhausted(self.contest_id, self.welford.count(), self.max_samples);
        Err(AuditError::NoSamplesLeft { contest_id: self.contest_id })
    }

    fn push(&mut self, value: f64) {
        if let Some(prev) = self.last.replace(value) {
            self.welford.update(prev);
        }
    }

    fn done(&mut self) {
        if let Some(prev) = self.last.take() {
            self.welford.update(prev);
        }
    }

    fn reset<M, C: Card>(&mut self, pairs: &[(M, C)]) -> Result<()> {
        if !self.allow_reset {
            return Err(AuditError::ResetNotAllowed { contest_id: self.contest_id });
        }
        self.permuted.shuffle(&mut self.rng);
        self.idx = 0;
        self.max_samples = self.count_available(pairs);
        self.welford = Welford::new();
        self.last = None;
        logging::log_sampler_reset(self.contest_id, self.max_samples);
        Ok(())
    }
}

// =============================================================================
// Plain CLCA sampler
// =============================================================================

/// Every draw counts toward error tracking.
#[derive(Debug, Clone)]
pub struct ClcaSamplerTracker<M, C, A> {
    pairs: Vec<(M, C)>,
    assorter: A,
    cursor: Cursor,
}

impl<M, C: Card, A: ComparisonAssorter<M, C>> ClcaSamplerTracker<M, C, A> {
    pub fn new(
        contest_id: u32,
        pairs: Vec<(M, C)>,
        assorter: A,
        allow_reset: bool,
        max_sample_index: Option<usize>,
    ) -> Self {
        let cursor = Cursor::new(contest_id, &pairs, allow_reset, max_sample_index);
        Self { pairs, assorter, cursor }
    }

    /// Reshuffle with a reproducible generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.cursor.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn last(&self) -> Option<f64> {
        self.cursor.last
    }

    pub fn assorter(&self) -> &A {
        &self.assorter
    }
}

impl<M, C: Card, A: ComparisonAssorter<M, C>> SamplerTracker for ClcaSamplerTracker<M, C, A> {
    fn sample(&mut self) -> Result<Draw> {
        let (mvr, card) = self.cursor.next_pair(&self.pairs)?;
        let value = self.assorter.bassort(mvr, card);
        self.cursor.push(value);
        Ok(Draw::new(value, true))
    }

    fn reset(&mut self) -> Result<()> {
        self.cursor.reset(&self.pairs)
    }

    fn max_samples(&self) -> usize {
        self.cursor.max_samples
    }

    fn max_sample_index_used(&self) -> usize {
        self.cursor.idx
    }

    fn nmvrs(&self) -> usize {
        self.pairs.len()
    }

    fn number_of_samples(&self) -> usize {
        self.cursor.welford.count()
    }

    fn welford(&self) -> &Welford {
        &self.cursor.welford
    }

    fn done(&mut self) {
        self.cursor.done();
    }
}

// =============================================================================
// CLCA sampler with error tracking
// =============================================================================

/// Also keeps per-category error counts of what it has handed out. Cards
/// resolved through a pool are consumed but not tracked as errors.
#[derive(Debug, Clone)]
pub struct ClcaSamplerErrorTracker<M, C, A> {
    pairs: Vec<(M, C)>,
    assorter: A,
    cursor: Cursor,
    errors: ErrorTracker,
}

impl<M, C: Card, A: ComparisonAssorter<M, C>> ClcaSamplerErrorTracker<M, C, A> {
    pub fn new(
        contest_id: u32,
        pairs: Vec<(M, C)>,
        assorter: A,
        allow_reset: bool,
        max_sample_index: Option<usize>,
    ) -> Self {
        let cursor = Cursor::new(contest_id, &pairs, allow_reset, max_sample_index);
        let errors = ErrorTracker::new(assorter.noerror(), assorter.upper_bound());
        Self { pairs, assorter, cursor, errors }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.cursor.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn measured_error_counts(&self) -> ClcaErrorCounts {
        self.errors.error_counts()
    }

    pub fn noerror(&self) -> f64 {
        self.errors.noerror()
    }

    /// Cards carrying the contest that are not pooled, over the usable list.
    pub fn count_not_pooled(&self) -> usize {
        let contest_id = self.cursor.contest_id;
        self.cursor.permuted[..self.cursor.max_sample_index]
            .iter()
            .map(|&i| &self.pairs[i].1)
            .filter(|card| card.has_contest(contest_id) && card.pool_id().is_none())
            .count()
    }
}

impl<M, C: Card, A: ComparisonAssorter<M, C>> SamplerTracker for ClcaSamplerErrorTracker<M, C, A> {
    fn sample(&mut self) -> Result<Draw> {
        let start = self.cursor.idx;
        let (mvr, card) = self.cursor.next_pair(&self.pairs)?;
        let value = self.assorter.bassort(mvr, card);
        let track_error = card.pool_id().is_none();
        // an unclassifiable card stays next in line
        if let Err(err) = self.errors.record(Draw::new(value, track_error)) {
            self.cursor.idx = start;
            return Err(err);
        }
        self.cursor.push(value);
        Ok(Draw::new(value, track_error))
    }

    fn reset(&mut self) -> Result<()> {
        self.cursor.reset(&self.pairs)?;
        self.errors.reset();
        Ok(())
    }

    fn max_samples(&self) -> usize {
        self.cursor.max_samples
    }

    fn max_sample_index_used(&self) -> usize {
        self.cursor.idx
    }

    fn nmvrs(&self) -> usize {
        self.pairs.len()
    }

    fn number_of_samples(&self) -> usize {
        self.cursor.welford.count()
    }

    fn welford(&self) -> &Welford {
        &self.cursor.welford
    }

    fn done(&mut self) {
        self.cursor.done();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct TestCard {
        contest: u32,
        pool: Option<u32>,
    }

    impl Card for TestCard {
        fn has_contest(&self, contest_id: u32) -> bool {
            self.contest == contest_id
        }

        fn pool_id(&self) -> Option<u32> {
            self.pool
        }
    }

    /// The mvr is the assort value itself.
    struct Identity;

    impl ComparisonAssorter<f64, TestCard> for Identity {
        fn bassort(&self, mvr: &f64, _card: &TestCard) -> f64 {
            *mvr
        }

        fn noerror(&self) -> f64 {
            0.5
        }

        fn upper_bound(&self) -> f64 {
            1.0
        }
    }

    fn pairs() -> Vec<(f64, TestCard)> {
        vec![
            (0.5, TestCard { contest: 1, pool: None }),
            (0.9, TestCard { contest: 2, pool: None }),
            (0.0, TestCard { contest: 1, pool: None }),
            (0.25, TestCard { contest: 1, pool: Some(4) }),
            (1.0, TestCard { contest: 1, pool: None }),
        ]
    }

    #[test]
    fn test_skips_other_contests_and_lags() {
        let mut s = ClcaSamplerTracker::new(1, pairs(), Identity, true, None);
        assert_eq!(s.max_samples(), 4);
        assert_eq!(s.nmvrs(), 5);

        assert_eq!(s.sample().unwrap().value(), 0.5);
        assert_eq!(s.number_of_samples(), 0);
        assert_eq!(s.sample().unwrap().value(), 0.0);
        assert_eq!(s.max_sample_index_used(), 3);
        assert_eq!(s.number_of_samples(), 1);
        assert_eq!(s.last(), Some(0.0));

        s.done();
        assert_eq!(s.number_of_samples(), 2);
        assert!((s.welford().mean() - 0.25).abs() < 1e-15);
    }

    #[test]
    fn test_exhaustion() {
        let mut s = ClcaSamplerTracker::new(1, pairs(), Identity, true, Some(3));
        assert_eq!(s.max_samples(), 2);
        let _ = s.sample().unwrap();
        let _ = s.sample().unwrap();
        assert!(matches!(s.sample(), Err(AuditError::NoSamplesLeft { contest_id: 1 })));
    }

    #[test]
    fn test_reset() {
        let mut s = ClcaSamplerTracker::new(1, pairs(), Identity, true, None).with_seed(7);
        let _ = s.sample().unwrap();
        s.reset().unwrap();
        assert_eq!(s.max_sample_index_used(), 0);
        assert_eq!(s.number_of_samples(), 0);
        assert_eq!(s.max_samples(), 4);

        let mut seen: Vec<f64> = (0..4).map(|_| s.sample().unwrap().value()).collect();
        seen.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(seen, vec![0.0, 0.25, 0.5, 1.0]);

        let mut fixed = ClcaSamplerTracker::new(1, pairs(), Identity, false, None);
        assert!(matches!(fixed.reset(), Err(AuditError::ResetNotAllowed { contest_id: 1 })));
    }

    #[test]
    fn test_pooled_cards_not_tracked() {
        let mut s = ClcaSamplerErrorTracker::new(1, pairs(), Identity, true, None);
        let draws: Vec<bool> = (0..4).map(|_| s.sample().unwrap().tracks_error()).collect();
        assert_eq!(draws, vec![true, true, false, true]);
        assert_eq!(s.count_not_pooled(), 3);

        let counts = s.measured_error_counts();
        assert_eq!(counts.total_samples(), 3);
        assert_eq!(counts.counts().values().sum::<usize>(), 2);

        s.reset().unwrap();
        assert_eq!(s.measured_error_counts().total_samples(), 0);
    }

    #[test]
    fn test_unclassifiable_card_is_not_consumed() {
        let pairs = vec![
            (0.5, TestCard { contest: 1, pool: None }),
            (0.9, TestCard { contest: 2, pool: None }),
            (0.3, TestCard { contest: 1, pool: None }),
            (1.0, TestCard { contest: 1, pool: None }),
        ];
        let mut s = ClcaSamplerErrorTracker::new(1, pairs, Identity, true, None);
        assert_eq!(s.sample().unwrap().value(), 0.5);
        assert_eq!(s.max_sample_index_used(), 1);

        for _ in 0..2 {
            assert!(matches!(s.sample(), Err(AuditError::UnknownCategory { .. })));
            assert_eq!(s.max_sample_index_used(), 1);
            assert_eq!(s.cursor.last, Some(0.5));
            assert_eq!(s.number_of_samples(), 0);
            assert_eq!(s.measured_error_counts().total_samples(), 1);
        }

        s.done();
        assert_eq!(s.number_of_samples(), 1);
        assert!((s.welford().mean() - 0.5).abs() < 1e-15);
    }
}
