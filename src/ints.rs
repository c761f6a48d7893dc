// Integer generation for the strategies: bounded integers by rejection
// sampling, alias-method sampling of weighted choices, and the bit-length
// distribution used for unbounded integers.

use crate::data::DataSource;
use crate::distributions::weighted;
use crate::error::FailedDraw;

use std::cmp::{Ord, Ordering, PartialOrd, Reverse};
use std::collections::BinaryHeap;
use std::mem;

/// Uniform integer in `0..=max`.
///
/// Draws exactly as many bits as `max` needs and rejects out-of-range probes;
/// the source's draw budget bounds the loop.
pub fn bounded_int(source: &mut DataSource, max: u64) -> Result<u64, FailedDraw> {
    let bitlength = (64 - max.leading_zeros()) as u8;
    if bitlength == 0 {
        source.write(0)?;
        return Ok(0);
    }
    loop {
        let probe = source.bits(bitlength)?;
        if probe <= max {
            return Ok(probe);
        }
    }
}

/// Integer in `min..=max` that shrinks towards zero when the range contains
/// it, and towards the bound closest to zero otherwise.
pub fn integer_range(source: &mut DataSource, min: i64, max: i64) -> Result<i64, FailedDraw> {
    if min > max {
        return Err(FailedDraw::InvalidArgument(format!(
            "empty integer range {}..={}",
            min, max
        )));
    }
    if min >= 0 {
        let offset = bounded_int(source, (max - min) as u64)?;
        return Ok(min + offset as i64);
    }
    if max <= 0 {
        let offset = bounded_int(source, (max as i128 - min as i128) as u64)?;
        return Ok((max as i128 - offset as i128) as i64);
    }

    // Zig-zag around zero: 0, -1, 1, -2, 2, ...
    let reach = (min.unsigned_abs()).max(max as u64);
    let limit = reach.saturating_mul(2);
    loop {
        let code = bounded_int(source, limit)?;
        let magnitude = ((code as u128 + 1) / 2) as i128;
        let value = if code % 2 == 1 { -magnitude } else { magnitude };
        if value >= min as i128 && value <= max as i128 {
            return Ok(value as i64);
        }
    }
}

#[derive(Debug, Clone)]
struct SamplerEntry {
    primary: usize,
    alternate: usize,
    use_alternate: f32,
}

impl SamplerEntry {
    fn single(i: usize) -> SamplerEntry {
        SamplerEntry {
            primary: i,
            alternate: i,
            use_alternate: 0.0,
        }
    }
}

impl Ord for SamplerEntry {
    fn cmp(&self, other: &SamplerEntry) -> Ordering {
        self.primary
            .cmp(&other.primary)
            .then(self.alternate.cmp(&other.alternate))
    }
}

impl PartialOrd for SamplerEntry {
    fn partial_cmp(&self, other: &SamplerEntry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SamplerEntry {
    fn eq(&self, other: &SamplerEntry) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SamplerEntry {}

/// Walker alias table over a fixed set of weights.
///
/// Sampling shrinks towards lower indices, so callers should list their
/// simplest choice first.
#[derive(Debug, Clone)]
pub struct Sampler {
    table: Vec<SamplerEntry>,
}

impl Sampler {
    /// Build a table, or `None` when there is nothing with positive weight.
    pub fn new(weights: &[f32]) -> Option<Sampler> {
        let total: f32 = weights.iter().filter(|w| **w > 0.0).sum();
        if weights.is_empty() || total <= 0.0 {
            return None;
        }

        let mut table = Vec::new();
        let mut small = BinaryHeap::new();
        let mut large = BinaryHeap::new();

        let n = weights.len() as f32;
        let mut scaled_probabilities: Vec<f32> = weights
            .iter()
            .map(|w| n * w.max(0.0) / total)
            .collect();

        for (i, scaled) in scaled_probabilities.iter().enumerate() {
            if (scaled - 1.0).abs() < f32::EPSILON {
                table.push(SamplerEntry::single(i));
            } else if *scaled > 1.0 {
                large.push(Reverse(i));
            } else {
                small.push(Reverse(i));
            }
        }

        while let (Some(Reverse(lo)), Some(Reverse(hi))) = (small.peek().copied(), large.peek().copied()) {
            small.pop();
            large.pop();

            scaled_probabilities[hi] = (scaled_probabilities[hi] + scaled_probabilities[lo]) - 1.0;
            table.push(SamplerEntry {
                primary: lo,
                alternate: hi,
                use_alternate: 1.0 - scaled_probabilities[lo],
            });

            if scaled_probabilities[hi] < 1.0 {
                small.push(Reverse(hi));
            } else if scaled_probabilities[hi] > 1.0 {
                large.push(Reverse(hi));
            } else {
                table.push(SamplerEntry::single(hi));
            }
        }
        for &Reverse(i) in small.iter().chain(large.iter()) {
            table.push(SamplerEntry::single(i));
        }

        for entry in table.iter_mut() {
            if entry.alternate < entry.primary {
                mem::swap(&mut entry.primary, &mut entry.alternate);
                entry.use_alternate = 1.0 - entry.use_alternate;
            }
        }

        table.sort();
        Some(Sampler { table })
    }

    pub fn sample(&self, source: &mut DataSource) -> Result<usize, FailedDraw> {
        let i = bounded_int(source, self.table.len() as u64 - 1)? as usize;
        let entry = &self.table[i];
        let use_alternate = weighted(source, entry.use_alternate as f64)?;
        if use_alternate {
            Ok(entry.alternate)
        } else {
            Ok(entry.primary)
        }
    }
}

const BITLENGTH_WEIGHTS: [f32; 63] = [
    4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, // 1 byte
    2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, // 2 bytes
    1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, // 3 bytes
    0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, // 4 bytes
    0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, // 5 bytes
    0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, // 6 bytes
    0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, // 7 bytes
    0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, // 8 bytes (last bit spare for sign)
];

/// Sampler favouring small bit lengths for unbounded integers.
pub fn good_bitlengths() -> Sampler {
    // The weights are a non-empty constant with positive entries.
    Sampler::new(&BITLENGTH_WEIGHTS).unwrap_or(Sampler {
        table: vec![SamplerEntry::single(0)],
    })
}

pub fn integer_from_bitlengths(source: &mut DataSource, bitlengths: &Sampler) -> Result<i64, FailedDraw> {
    let bitlength = bitlengths.sample(source)? as u8 + 1;
    let base = source.bits(bitlength)? as i64;
    let sign = source.bits(1)?;
    if sign > 0 {
        Ok(-base)
    } else {
        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DrawRecord, DrawSequence};

    #[test]
    fn test_bounded_int_in_range() {
        let mut source = DataSource::new(5);
        for max in [0u64, 1, 2, 7, 100, 1 << 40, u64::MAX] {
            for _ in 0..20 {
                assert!(bounded_int(&mut source, max).unwrap() <= max);
            }
        }
    }

    #[test]
    fn test_integer_range_in_bounds() {
        for seed in 0..100 {
            let mut source = DataSource::new(seed);
            for (min, max) in [(0, 10), (-10, -3), (-5, 100), (i64::MIN, i64::MAX), (7, 7)] {
                let v = integer_range(&mut source, min, max).unwrap();
                assert!(v >= min && v <= max, "{} not in {}..={}", v, min, max);
            }
        }
    }

    #[test]
    fn test_integer_range_zero_draw_is_simplest() {
        let zeros = DrawSequence::new(vec![DrawRecord::new(64, 0); 4]);
        for (min, max, expected) in [(3, 10, 3), (-10, -3, -3), (-5, 5, 0)] {
            let mut source = DataSource::for_replay(&zeros, 0);
            assert_eq!(integer_range(&mut source, min, max).unwrap(), expected);
        }
    }

    #[test]
    fn test_integer_range_rejects_empty() {
        let mut source = DataSource::new(0);
        assert!(matches!(
            integer_range(&mut source, 3, 1),
            Err(FailedDraw::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_sampler_never_picks_zero_weight() {
        let sampler = Sampler::new(&[0.0, 1.0, 3.0]).unwrap();
        let mut source = DataSource::new(9);
        for _ in 0..500 {
            assert_ne!(sampler.sample(&mut source).unwrap(), 0);
        }
    }

    #[test]
    fn test_sampler_rejects_empty_weights() {
        assert!(Sampler::new(&[]).is_none());
        assert!(Sampler::new(&[0.0, 0.0]).is_none());
    }

    #[test]
    fn test_unbounded_integers_vary() {
        let sampler = good_bitlengths();
        let mut source = DataSource::new(1);
        let values: Vec<i64> = (0..50)
            .map(|_| integer_from_bitlengths(&mut source, &sampler).unwrap())
            .collect();
        assert!(values.iter().any(|v| *v != values[0]));
    }
}
