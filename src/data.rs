//! # DataSource: the recorded bit stream behind every generated value
//!
//! All randomness used to build a test input flows through [`DataSource::bits`].
//! Each call is recorded as a [`DrawRecord`] so that the exact input can be
//! rebuilt later from the resulting [`DrawSequence`] alone.
//!
//! ## Replay
//!
//! A source created with [`DataSource::for_replay`] answers draws from a
//! supplied prefix first. Once the prefix runs out it keeps going with fresh
//! output from its seeded ChaCha8 generator, so a shrink candidate that is
//! shorter than what the test asks for still produces a complete input.
//! Replaying the same prefix with the same seed is bit-for-bit deterministic.
//!
//! ## Termination
//!
//! Every source has a draw budget (`max_draws`). Once it is used up each
//! further draw fails with [`FailedDraw::Overrun`], which bounds rejection
//! loops and list generation no matter what the prefix contains.

use std::collections::BTreeMap;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::error::FailedDraw;

/// Default draw budget for a single test case.
pub const MAX_DRAWS: usize = 8 * 1024;

/// Mask selecting the low `n_bits` bits of a `u64`.
pub fn mask(n_bits: u8) -> u64 {
    if n_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << n_bits) - 1
    }
}

fn bit_length(value: u64) -> u8 {
    (64 - value.leading_zeros()) as u8
}

/// One primitive draw: how many bits were requested and what came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawRecord {
    pub n_bits: u8,
    pub value: u64,
}

impl DrawRecord {
    pub fn new(n_bits: u8, value: u64) -> Self {
        let n_bits = n_bits.min(64);
        DrawRecord {
            n_bits,
            value: value & mask(n_bits),
        }
    }
}

/// An immutable, ordered record of the draws one test case consumed.
///
/// Sequences are compared in shortlex order: fewer draws is simpler, and
/// between sequences of equal length the lexicographically smaller list of
/// values is simpler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DrawSequence {
    draws: Vec<DrawRecord>,
}

impl DrawSequence {
    pub fn new(draws: Vec<DrawRecord>) -> Self {
        DrawSequence { draws }
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = u64> + '_ {
        self.draws.iter().map(|d| d.value)
    }

    pub fn sort_key(&self) -> (usize, Vec<u64>) {
        (self.draws.len(), self.values().collect())
    }

    /// True if `self` is strictly simpler than `other`.
    pub fn is_simpler_than(&self, other: &DrawSequence) -> bool {
        self.sort_key() < other.sort_key()
    }

    /// Copy with the draw at `index` replaced by `value` (masked to its width).
    pub fn with_value(&self, index: usize, value: u64) -> DrawSequence {
        let mut draws = self.draws.clone();
        if let Some(draw) = draws.get_mut(index) {
            *draw = DrawRecord::new(draw.n_bits, value);
        }
        DrawSequence { draws }
    }

    /// Copy with the draws in `start..end` removed.
    pub fn without_range(&self, start: usize, end: usize) -> DrawSequence {
        let end = end.min(self.draws.len());
        let start = start.min(end);
        let mut draws = Vec::with_capacity(self.draws.len() - (end - start));
        draws.extend_from_slice(&self.draws[..start]);
        draws.extend_from_slice(&self.draws[end..]);
        DrawSequence { draws }
    }

    /// Copy with the draws at `i` and `j` exchanged.
    pub fn swapped(&self, i: usize, j: usize) -> DrawSequence {
        let mut draws = self.draws.clone();
        if i < draws.len() && j < draws.len() {
            draws.swap(i, j);
        }
        DrawSequence { draws }
    }
}

impl From<Vec<DrawRecord>> for DrawSequence {
    fn from(draws: Vec<DrawRecord>) -> Self {
        DrawSequence::new(draws)
    }
}

impl FromIterator<DrawRecord> for DrawSequence {
    fn from_iter<I: IntoIterator<Item = DrawRecord>>(iter: I) -> Self {
        DrawSequence::new(iter.into_iter().collect())
    }
}

/// How often a named filter accepted and rejected a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PredicateCounts {
    pub satisfied: u64,
    pub unsatisfied: u64,
}

#[derive(Debug, Clone)]
pub struct DataSource {
    rng: ChaCha8Rng,
    prefix: Vec<DrawRecord>,
    record: Vec<DrawRecord>,
    max_draws: usize,
    predicates: BTreeMap<String, PredicateCounts>,
}

impl DataSource {
    /// Fresh source generating from `seed`.
    pub fn new(seed: u64) -> Self {
        DataSource {
            rng: ChaCha8Rng::seed_from_u64(seed),
            prefix: Vec::new(),
            record: Vec::new(),
            max_draws: MAX_DRAWS,
            predicates: BTreeMap::new(),
        }
    }

    /// Source that answers from `prefix` first, then falls back to `seed`.
    pub fn for_replay(prefix: &DrawSequence, seed: u64) -> Self {
        let mut source = DataSource::new(seed);
        source.prefix = prefix.draws().to_vec();
        source
    }

    pub fn with_max_draws(mut self, max_draws: usize) -> Self {
        self.max_draws = max_draws;
        self
    }

    /// Reset to the start of the stream generated by `value`.
    ///
    /// The replay prefix is kept, so a replaying source starts replaying again.
    pub fn seed(&mut self, value: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(value);
        self.record.clear();
        self.predicates.clear();
    }

    /// Count one evaluation of the filter called `name`.
    pub fn record_predicate(&mut self, name: &str, satisfied: bool) {
        let counts = self.predicates.entry(name.to_string()).or_default();
        if satisfied {
            counts.satisfied += 1;
        } else {
            counts.unsatisfied += 1;
        }
    }

    pub fn predicates(&self) -> &BTreeMap<String, PredicateCounts> {
        &self.predicates
    }

    fn check_budget(&self) -> Result<(), FailedDraw> {
        if self.record.len() >= self.max_draws {
            Err(FailedDraw::Overrun {
                limit: self.max_draws,
            })
        } else {
            Ok(())
        }
    }

    /// Draw `n_bits` (at most 64) bits.
    pub fn bits(&mut self, n_bits: u8) -> Result<u64, FailedDraw> {
        self.check_budget()?;
        let n_bits = n_bits.min(64);
        let raw = match self.prefix.get(self.record.len()) {
            Some(forced) => forced.value,
            None => self.rng.next_u64(),
        };
        let draw = DrawRecord::new(n_bits, raw);
        self.record.push(draw);
        Ok(draw.value)
    }

    /// Record a draw whose value is fixed by the caller rather than drawn.
    ///
    /// The draw still occupies a position, so replayed prefixes stay aligned.
    pub fn write(&mut self, value: u64) -> Result<(), FailedDraw> {
        self.check_budget()?;
        self.record.push(DrawRecord::new(bit_length(value).max(1), value));
        Ok(())
    }

    pub fn is_replaying(&self) -> bool {
        self.record.len() < self.prefix.len()
    }

    pub fn draw_count(&self) -> usize {
        self.record.len()
    }

    pub fn recorded(&self) -> &[DrawRecord] {
        &self.record
    }

    pub fn into_sequence(self) -> DrawSequence {
        DrawSequence::new(self.record)
    }
}
