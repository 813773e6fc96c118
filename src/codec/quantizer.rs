//! Dead-zone scalar quantization with a global or per-subband step

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::audio::chunk::{CoefficientChunk, QuantizedChunk};

/// Smallest step the quantizer will ever divide by
pub const MINIMAL_STEP: u32 = 1;

/// How a coefficient is mapped to its index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Nearest multiple of the step, ties away from zero. Error ≤ step/2.
    #[default]
    Round,
    /// Toward zero. Wider dead zone, error < step.
    Truncate,
}

/// Ordered quantization steps, one per subband (or a single global step).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTable {
    steps: Vec<u32>,
}

impl StepTable {
    /// One step for every subband. Zero is clamped to [`MINIMAL_STEP`].
    pub fn global(step: u32) -> Self {
        Self {
            steps: vec![step.max(MINIMAL_STEP)],
        }
    }

    /// One step per subband. Zeros are clamped to [`MINIMAL_STEP`].
    pub fn per_subband(steps: Vec<u32>) -> Self {
        let steps = if steps.is_empty() {
            vec![MINIMAL_STEP]
        } else {
            steps.into_iter().map(|s| s.max(MINIMAL_STEP)).collect()
        };
        Self { steps }
    }

    /// Step for subband `band`
    pub fn step(&self, band: usize) -> u32 {
        if self.steps.len() == 1 {
            self.steps[0]
        } else {
            self.steps[band.min(self.steps.len() - 1)]
        }
    }

    pub fn steps(&self) -> &[u32] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_global(&self) -> bool {
        self.steps.len() == 1
    }

    /// Multiply every step by a global factor, saturating.
    pub fn scaled(&self, multiplier: u32) -> Self {
        Self::per_subband(
            self.steps
                .iter()
                .map(|&s| s.saturating_mul(multiplier))
                .collect(),
        )
    }
}

/// Stateless quantizer bound to a subband layout.
#[derive(Debug, Clone)]
pub struct Quantizer {
    /// Coefficient ranges of each subband within one channel
    ranges: Vec<Range<usize>>,
    rounding: Rounding,
}

impl Quantizer {
    pub fn new(ranges: Vec<Range<usize>>, rounding: Rounding) -> Self {
        Self { ranges, rounding }
    }

    pub fn rounding(&self) -> Rounding {
        self.rounding
    }

    /// `k = round(x / step[band])` (or truncated, per policy)
    pub fn quantize(&self, coeffs: &CoefficientChunk, table: &StepTable) -> QuantizedChunk {
        let mut out = QuantizedChunk::zeros(coeffs.frames(), coeffs.channels());
        self.for_each_band(coeffs.frames(), |band, frames| {
            let step = table.step(band) as i64;
            for frame in frames {
                for ch in 0..coeffs.channels() {
                    let x = coeffs.get(frame, ch) as i64;
                    out.set(frame, ch, quantize_value(x, step, self.rounding));
                }
            }
        });
        out
    }

    /// `y = k × step[band]`, saturated into `i32`
    pub fn dequantize(&self, indices: &QuantizedChunk, table: &StepTable) -> CoefficientChunk {
        let mut out = CoefficientChunk::zeros(indices.frames(), indices.channels());
        self.for_each_band(indices.frames(), |band, frames| {
            let step = table.step(band) as i64;
            for frame in frames {
                for ch in 0..indices.channels() {
                    let y = indices.get(frame, ch) as i64 * step;
                    out.set(frame, ch, y.clamp(i32::MIN as i64, i32::MAX as i64) as i32);
                }
            }
        });
        out
    }

    fn for_each_band<F>(&self, frames: usize, mut f: F)
    where
        F: FnMut(usize, Range<usize>),
    {
        if self.ranges.is_empty() {
            f(0, 0..frames);
            return;
        }
        for (band, range) in self.ranges.iter().enumerate() {
            f(band, range.start.min(frames)..range.end.min(frames));
        }
    }
}

fn quantize_value(x: i64, step: i64, rounding: Rounding) -> i32 {
    let step = step.max(MINIMAL_STEP as i64);
    let magnitude = match rounding {
        Rounding::Round => (x.abs() + step / 2) / step,
        Rounding::Truncate => x.abs() / step,
    };
    (x.signum() * magnitude) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn block(values: Vec<i32>) -> CoefficientChunk {
        let frames = values.len();
        CoefficientChunk::from_interleaved(frames, 1, values).unwrap()
    }

    #[test]
    fn test_zero_step_is_clamped() {
        assert_eq!(StepTable::global(0).step(0), MINIMAL_STEP);
        assert_eq!(StepTable::per_subband(vec![4, 0]).steps(), &[4, 1]);
    }

    #[test]
    fn test_round_policy() {
        let q = Quantizer::new(vec![0..5], Rounding::Round);
        let k = q.quantize(&block(vec![-7, -2, 0, 2, 7]), &StepTable::global(4));
        assert_eq!(k.data(), &[-2, -1, 0, 1, 2]);
    }

    #[test]
    fn test_truncate_policy_has_wider_dead_zone() {
        let q = Quantizer::new(vec![0..5], Rounding::Truncate);
        let k = q.quantize(&block(vec![-7, -3, 0, 3, 7]), &StepTable::global(4));
        assert_eq!(k.data(), &[-1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_per_subband_steps() {
        let q = Quantizer::new(vec![0..2, 2..4], Rounding::Round);
        let table = StepTable::per_subband(vec![1, 10]);
        let k = q.quantize(&block(vec![7, 7, 70, 7]), &table);
        assert_eq!(k.data(), &[7, 7, 7, 1]);

        let y = q.dequantize(&k, &table);
        assert_eq!(y.data(), &[7, 7, 70, 10]);
    }

    #[test]
    fn test_scaled_table_saturates() {
        let table = StepTable::per_subband(vec![2, u32::MAX]).scaled(3);
        assert_eq!(table.steps(), &[6, u32::MAX]);
    }

    #[test]
    fn test_dequantize_saturates() {
        let q = Quantizer::new(vec![0..1], Rounding::Round);
        let y = q.dequantize(&block(vec![i32::MAX]), &StepTable::global(2));
        assert_eq!(y.data(), &[i32::MAX]);
    }

    proptest! {
        #[test]
        fn prop_reconstruction_within_half_step(
            values in prop::collection::vec(-1_000_000i32..1_000_000, 1..64),
            step in 1u32..5000,
        ) {
            let q = Quantizer::new(vec![0..values.len()], Rounding::Round);
            let table = StepTable::global(step);
            let x = block(values);
            let y = q.dequantize(&q.quantize(&x, &table), &table);
            for (a, b) in x.data().iter().zip(y.data()) {
                prop_assert!(((*a as i64) - (*b as i64)).abs() <= step as i64 / 2);
            }
        }

        #[test]
        fn prop_larger_step_never_widens_range(
            values in prop::collection::vec(any::<i32>(), 1..64),
            step in 1u32..1000,
        ) {
            let q = Quantizer::new(vec![0..values.len()], Rounding::Round);
            let x = block(values);
            let fine = q.quantize(&x, &StepTable::global(step));
            let coarse = q.quantize(&x, &StepTable::global(step * 2));
            for (a, b) in fine.data().iter().zip(coarse.data()) {
                prop_assert!(b.abs() <= a.abs());
            }
        }
    }
}
