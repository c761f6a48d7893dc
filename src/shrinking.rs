//! # Shrinking draw sequences
//!
//! The shrinker searches for the simplest [`DrawSequence`] that still fails
//! in the same way as the one it was given. "Simplest" is shortlex order on
//! the draw values: fewer draws first, then lexicographically smaller values.
//! Because every strategy maps smaller draws to simpler values, a simpler
//! sequence means a simpler counterexample.
//!
//! ## Passes
//!
//! Passes always run in this order ([`PASS_ORDER`]):
//!
//! 1. [`ShrinkPass::DeleteDraws`]: remove contiguous blocks of one to eight
//!    draws, largest blocks first.
//! 2. [`ShrinkPass::MinimizeDraws`]: minimize each draw as an integer.
//! 3. [`ShrinkPass::ReorderDraws`]: swap adjacent draws that are out of order.
//! 4. [`ShrinkPass::MinimizeDuplicates`]: lower draws sharing a value together.
//!
//! Each pass is repeated until it stops making progress before the next one
//! runs, and the whole sequence of passes is repeated until a full cycle makes
//! no progress or the budget runs out. When the budget is not exhausted the
//! result is a local minimum: none of the transformations in [`neighbours`]
//! produces a simpler sequence that still fails.
//!
//! ## Predicate
//!
//! The predicate replays a candidate and returns the sequence the replay
//! actually recorded when it still fails, or `None`. The recorded sequence can
//! differ from the candidate (a test may stop drawing early), and it is the
//! recorded one that is kept.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use crate::data::DrawSequence;

/// Largest block removed by [`ShrinkPass::DeleteDraws`].
pub const MAX_DELETE_BLOCK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShrinkPass {
    DeleteDraws,
    MinimizeDraws,
    ReorderDraws,
    MinimizeDuplicates,
}

pub const PASS_ORDER: [ShrinkPass; 4] = [
    ShrinkPass::DeleteDraws,
    ShrinkPass::MinimizeDraws,
    ShrinkPass::ReorderDraws,
    ShrinkPass::MinimizeDuplicates,
];

impl fmt::Display for ShrinkPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShrinkPass::DeleteDraws => "delete_draws",
            ShrinkPass::MinimizeDraws => "minimize_draws",
            ShrinkPass::ReorderDraws => "reorder_draws",
            ShrinkPass::MinimizeDuplicates => "minimize_duplicates",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShrinkBudget {
    /// Maximum number of predicate calls.
    pub max_attempts: usize,
    pub timeout: Option<Duration>,
}

impl Default for ShrinkBudget {
    fn default() -> Self {
        ShrinkBudget {
            max_attempts: 500,
            timeout: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShrinkReport {
    pub best: DrawSequence,
    /// Predicate calls made.
    pub attempts: usize,
    /// Accepted improvements.
    pub improvements: usize,
    pub budget_exhausted: bool,
}

pub struct Shrinker<F>
where
    F: FnMut(&DrawSequence) -> Option<DrawSequence>,
{
    current: DrawSequence,
    predicate: F,
    budget: ShrinkBudget,
    started: Instant,
    seen: HashSet<DrawSequence>,
    attempts: usize,
    improvements: usize,
    exhausted: bool,
}

impl<F> Shrinker<F>
where
    F: FnMut(&DrawSequence) -> Option<DrawSequence>,
{
    /// `initial` must already be known to fail.
    pub fn new(initial: DrawSequence, budget: ShrinkBudget, predicate: F) -> Self {
        let mut seen = HashSet::new();
        seen.insert(initial.clone());
        Shrinker {
            current: initial,
            predicate,
            budget,
            started: Instant::now(),
            seen,
            attempts: 0,
            improvements: 0,
            exhausted: false,
        }
    }

    pub fn current(&self) -> &DrawSequence {
        &self.current
    }

    fn out_of_budget(&mut self) -> bool {
        if self.attempts >= self.budget.max_attempts
            || self.budget.timeout.map_or(false, |t| self.started.elapsed() >= t)
        {
            self.exhausted = true;
        }
        self.exhausted
    }

    /// Try `candidate`; true if it is the current sequence or replaced it.
    pub fn consider(&mut self, candidate: DrawSequence) -> bool {
        if candidate == self.current {
            return true;
        }
        if !candidate.is_simpler_than(&self.current) || self.seen.contains(&candidate) {
            return false;
        }
        if self.out_of_budget() {
            return false;
        }
        self.seen.insert(candidate.clone());
        self.attempts += 1;

        match (self.predicate)(&candidate) {
            Some(recorded) if recorded.is_simpler_than(&self.current) => {
                self.seen.insert(recorded.clone());
                self.current = recorded;
                self.improvements += 1;
                true
            }
            _ => false,
        }
    }

    pub fn run(mut self) -> ShrinkReport {
        loop {
            let mut cycle_improved = false;
            for pass in PASS_ORDER {
                while !self.exhausted && self.run_pass(pass) {
                    cycle_improved = true;
                }
            }
            if !cycle_improved || self.exhausted {
                break;
            }
        }
        log::debug!(
            "shrinking finished after {} attempts ({} improvements, {} draws left)",
            self.attempts,
            self.improvements,
            self.current.len()
        );
        ShrinkReport {
            best: self.current,
            attempts: self.attempts,
            improvements: self.improvements,
            budget_exhausted: self.exhausted,
        }
    }

    /// Run one pass over the current sequence; true if it changed.
    fn run_pass(&mut self, pass: ShrinkPass) -> bool {
        let before = self.current.clone();
        match pass {
            ShrinkPass::DeleteDraws => self.delete_draws(),
            ShrinkPass::MinimizeDraws => self.minimize_draws(),
            ShrinkPass::ReorderDraws => self.reorder_draws(),
            ShrinkPass::MinimizeDuplicates => self.minimize_duplicates(),
        }
        self.current != before
    }

    fn delete_draws(&mut self) {
        for k in (1..=MAX_DELETE_BLOCK).rev() {
            let mut i = 0;
            while i + k <= self.current.len() && !self.exhausted {
                let candidate = self.current.without_range(i, i + k);
                if !self.consider(candidate) {
                    i += 1;
                }
            }
        }
    }

    fn minimize_draws(&mut self) {
        let mut i = 0;
        while i < self.current.len() && !self.exhausted {
            let value = self.current.draws()[i].value;
            if value > 0 {
                minimize_integer(value, |v| {
                    if i >= self.current.len() {
                        return false;
                    }
                    let candidate = self.current.with_value(i, v);
                    self.consider(candidate)
                });
            }
            i += 1;
        }
    }

    fn reorder_draws(&mut self) {
        let mut i = 0;
        while i + 1 < self.current.len() && !self.exhausted {
            let draws = self.current.draws();
            if draws[i].value > draws[i + 1].value {
                let candidate = self.current.swapped(i, i + 1);
                self.consider(candidate);
            }
            i += 1;
        }
    }

    fn minimize_duplicates(&mut self) {
        for (value, indices) in duplicate_groups(&self.current) {
            if self.exhausted {
                break;
            }
            minimize_integer(value, |v| {
                if indices.iter().any(|&i| i >= self.current.len()) {
                    return false;
                }
                let candidate = set_all(&self.current, &indices, v);
                self.consider(candidate)
            });
        }
    }
}

/// Indices of draws sharing a non-zero value, for every value that occurs
/// more than once.
fn duplicate_groups(sequence: &DrawSequence) -> Vec<(u64, Vec<usize>)> {
    let mut groups: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (i, value) in sequence.values().enumerate() {
        if value > 0 {
            groups.entry(value).or_default().push(i);
        }
    }
    groups.into_iter().filter(|(_, indices)| indices.len() > 1).collect()
}

fn set_all(sequence: &DrawSequence, indices: &[usize], value: u64) -> DrawSequence {
    indices
        .iter()
        .fold(sequence.clone(), |seq, &i| seq.with_value(i, value))
}

/// Every sequence one elementary transformation away from `sequence`.
///
/// These are the moves the passes are built from: deleting a block of up to
/// [`MAX_DELETE_BLOCK`] draws, setting a draw to zero, decrementing it,
/// halving it, swapping an out-of-order adjacent pair, and lowering a group
/// of duplicated draws together (to zero, by one, or by half).
pub fn neighbours(sequence: &DrawSequence) -> Vec<DrawSequence> {
    let mut result = Vec::new();
    let len = sequence.len();

    for k in 1..=MAX_DELETE_BLOCK.min(len) {
        for i in 0..=(len - k) {
            result.push(sequence.without_range(i, i + k));
        }
    }

    for (i, draw) in sequence.draws().iter().enumerate() {
        if draw.value > 0 {
            result.push(sequence.with_value(i, 0));
            result.push(sequence.with_value(i, draw.value - 1));
            result.push(sequence.with_value(i, draw.value / 2));
        }
    }

    for i in 1..len {
        let draws = sequence.draws();
        if draws[i - 1].value > draws[i].value {
            result.push(sequence.swapped(i - 1, i));
        }
    }

    for (value, indices) in duplicate_groups(sequence) {
        for lowered in [0, value - 1, value / 2] {
            result.push(set_all(sequence, &indices, lowered));
        }
    }

    result
}

/// Find a small value accepted by `consider`, starting from `initial`.
///
/// `consider` is only called with values below the best accepted so far,
/// and must return true when that value should become the new best.
pub fn minimize_integer<F>(initial: u64, consider: F) -> u64
where
    F: FnMut(u64) -> bool,
{
    let mut minimizer = IntegerMinimizer {
        current: initial,
        consider,
    };
    minimizer.run();
    minimizer.current
}

struct IntegerMinimizer<F>
where
    F: FnMut(u64) -> bool,
{
    current: u64,
    consider: F,
}

impl<F> IntegerMinimizer<F>
where
    F: FnMut(u64) -> bool,
{
    fn consider(&mut self, value: u64) -> bool {
        if value == self.current {
            return true;
        }
        if value > self.current {
            return false;
        }
        if (self.consider)(value) {
            self.current = value;
            true
        } else {
            false
        }
    }

    fn run(&mut self) {
        if self.short_circuit() {
            return;
        }
        loop {
            let before = self.current;
            self.shift_right();
            self.shrink_by_multiples(2);
            self.shrink_by_multiples(1);
            if self.current == before {
                break;
            }
        }
    }

    fn short_circuit(&mut self) -> bool {
        for i in 0..2 {
            if self.consider(i) {
                return true;
            }
        }

        self.mask_high_bits();

        let size = self.bit_length();
        if size > 8 {
            // Try to squeeze into a single byte.
            self.consider(self.current >> (size - 8));
            self.consider(self.current & 0xff);
        }
        self.current == 2
    }

    fn bit_length(&self) -> u32 {
        64 - self.current.leading_zeros()
    }

    fn mask_high_bits(&mut self) {
        let base = self.current;
        let n = self.bit_length();
        for k in 1..n {
            let mask = (1u64 << (n - k)) - 1;
            if self.consider(mask & base) {
                break;
            }
        }
    }

    fn shift_right(&mut self) {
        let base = self.current;
        for k in 1..self.bit_length().max(1) + 1 {
            let shifted = base.checked_shr(k).unwrap_or(0);
            if shifted == 0 {
                break;
            }
            if self.consider(shifted) {
                break;
            }
        }
    }

    fn shrink_by_multiples(&mut self, k: u64) {
        let base = self.current;
        find_integer(|n| match n.checked_mul(k) {
            Some(delta) if delta <= base => self.consider(base - delta),
            _ => false,
        });
    }
}

/// Largest `n` such that `f(n)` holds, assuming `f(0)` holds.
///
/// Probes 1 to 4 linearly, then doubles, then binary searches, so a long run
/// of successes costs a logarithmic number of calls.
pub fn find_integer<F>(mut f: F) -> u64
where
    F: FnMut(u64) -> bool,
{
    for i in 1..5 {
        if !f(i) {
            return i - 1;
        }
    }

    let mut lo = 4u64;
    let mut hi = 5u64;
    while f(hi) {
        lo = hi;
        hi = match hi.checked_mul(2) {
            Some(next) => next,
            None => return lo,
        };
    }
    while lo + 1 < hi {
        let mid = lo + (hi - lo) / 2;
        if f(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DrawRecord;

    fn seq(values: &[u64]) -> DrawSequence {
        values.iter().map(|&v| DrawRecord::new(16, v)).collect()
    }

    fn shrink<P>(initial: DrawSequence, budget: ShrinkBudget, fails: P) -> ShrinkReport
    where
        P: Fn(&DrawSequence) -> bool,
    {
        Shrinker::new(initial, budget, |candidate: &DrawSequence| {
            if fails(candidate) {
                Some(candidate.clone())
            } else {
                None
            }
        })
        .run()
    }

    #[test]
    fn test_minimize_integer_finds_boundary() {
        assert_eq!(minimize_integer(5000, |v| v > 1000), 1001);
        assert_eq!(minimize_integer(77, |_| true), 0);
        assert_eq!(minimize_integer(77, |v| v == 77), 77);
    }

    #[test]
    fn test_find_integer() {
        assert_eq!(find_integer(|n| n <= 3), 3);
        assert_eq!(find_integer(|n| n <= 1234), 1234);
        assert_eq!(find_integer(|_| false), 0);
    }

    #[test]
    fn test_single_draw_shrinks_to_threshold() {
        let report = shrink(seq(&[5000]), ShrinkBudget::default(), |s| {
            s.draws().first().map_or(false, |d| d.value > 1000)
        });
        assert_eq!(report.best, seq(&[1001]));
        assert!(!report.budget_exhausted);
    }

    #[test]
    fn test_irrelevant_draws_are_deleted() {
        let fails = |s: &DrawSequence| s.values().any(|v| v >= 10);
        let report = shrink(seq(&[3, 4, 500, 7, 9, 11]), ShrinkBudget::default(), fails);
        assert_eq!(report.best, seq(&[10]));
    }

    #[test]
    fn test_result_is_local_minimum() {
        // Fails when the sum of the first two draws is at least 30 and the
        // sequence has at least two draws.
        let fails = |s: &DrawSequence| s.len() >= 2 && s.values().take(2).sum::<u64>() >= 30;
        let report = shrink(seq(&[900, 20, 13, 40000, 5]), ShrinkBudget::default(), fails);
        assert!(fails(&report.best));
        assert!(!report.budget_exhausted);
        for neighbour in neighbours(&report.best) {
            assert!(
                !(neighbour.is_simpler_than(&report.best) && fails(&neighbour)),
                "{:?} is simpler than {:?} and still fails",
                neighbour,
                report.best
            );
        }
        assert_eq!(report.best.len(), 2);
    }

    #[test]
    fn test_duplicates_are_lowered_together() {
        let fails = |s: &DrawSequence| s.len() == 2 && s.draws()[0].value == s.draws()[1].value && s.draws()[0].value >= 7;
        let report = shrink(seq(&[500, 500]), ShrinkBudget::default(), fails);
        assert_eq!(report.best, seq(&[7, 7]));
    }

    #[test]
    fn test_budget_is_respected() {
        let budget = ShrinkBudget {
            max_attempts: 3,
            timeout: None,
        };
        let mut calls = 0;
        let report = Shrinker::new(seq(&[1000, 1000, 1000]), budget, |s: &DrawSequence| {
            calls += 1;
            if s.len() == 3 {
                Some(s.clone())
            } else {
                None
            }
        })
        .run();
        assert!(report.budget_exhausted);
        assert_eq!(report.attempts, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_recorded_sequence_is_kept() {
        // The "test" only ever reads the first draw, so any candidate replays
        // to a one-draw sequence.
        let report = Shrinker::new(seq(&[50, 60, 70]), ShrinkBudget::default(), |s: &DrawSequence| {
            let first = s.draws().first().copied()?;
            if first.value >= 5 {
                Some(DrawSequence::new(vec![first]))
            } else {
                None
            }
        })
        .run();
        assert_eq!(report.best, seq(&[5]));
    }
}
