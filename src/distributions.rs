// Probability helpers shared by the strategies: biased coins and the
// repetition control used to decide list lengths.

use crate::data::DataSource;
use crate::error::FailedDraw;

/// Draw a coin that comes up true with the given probability.
///
/// Uses a full 64-bit draw so that shrinking the draw towards zero turns the
/// coin towards false.
pub fn weighted(source: &mut DataSource, probability: f64) -> Result<bool, FailedDraw> {
    if probability <= 0.0 {
        source.write(0)?;
        return Ok(false);
    }
    if probability >= 1.0 {
        source.write(1)?;
        return Ok(true);
    }
    let truthy = (probability * (u64::MAX as f64)).floor() as u64;
    let probe = source.bits(64)?;
    Ok(probe > u64::MAX - truthy)
}

/// Decides, one element at a time, whether a collection keeps growing.
///
/// Every decision is recorded as its own draw, so deleting an element's
/// continue-flag together with its draws during shrinking removes exactly
/// that element.
#[derive(Debug, Clone)]
pub struct Repeat {
    min_count: u64,
    max_count: u64,
    p_continue: f64,

    current_count: u64,
}

impl Repeat {
    pub fn new(min_count: u64, max_count: u64, expected_count: f64) -> Repeat {
        Repeat {
            min_count,
            max_count,
            p_continue: 1.0 - 1.0 / (1.0 + expected_count),
            current_count: 0,
        }
    }

    pub fn count(&self) -> u64 {
        self.current_count
    }

    pub fn should_continue(&mut self, source: &mut DataSource) -> Result<bool, FailedDraw> {
        if self.min_count == self.max_count {
            let more = self.current_count < self.max_count;
            if more {
                self.current_count += 1;
            }
            return Ok(more);
        }

        if self.current_count < self.min_count {
            source.write(1)?;
            self.current_count += 1;
            return Ok(true);
        }
        if self.current_count >= self.max_count {
            source.write(0)?;
            return Ok(false);
        }

        let result = weighted(source, self.p_continue)?;
        if result {
            self.current_count += 1;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DrawRecord, DrawSequence};

    #[test]
    fn test_weighted_extremes_are_forced() {
        let mut source = DataSource::new(0);
        for _ in 0..50 {
            assert!(!weighted(&mut source, 0.0).unwrap());
            assert!(weighted(&mut source, 1.0).unwrap());
        }
    }

    #[test]
    fn test_weighted_zero_draw_is_false() {
        let prefix = DrawSequence::new(vec![DrawRecord::new(64, 0)]);
        let mut source = DataSource::for_replay(&prefix, 0);
        assert!(!weighted(&mut source, 0.9).unwrap());
    }

    #[test]
    fn test_repeat_respects_bounds() {
        for seed in 0..50 {
            let mut source = DataSource::new(seed);
            let mut repeat = Repeat::new(2, 5, 3.0);
            while repeat.should_continue(&mut source).unwrap() {}
            assert!(repeat.count() >= 2 && repeat.count() <= 5);
        }
    }

    #[test]
    fn test_fixed_size_repeat_draws_nothing() {
        let mut source = DataSource::new(0);
        let mut repeat = Repeat::new(3, 3, 3.0);
        while repeat.should_continue(&mut source).unwrap() {}
        assert_eq!(repeat.count(), 3);
        assert_eq!(source.draw_count(), 0);
    }
}
