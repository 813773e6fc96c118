//! Per-subband steps from the absolute threshold of hearing
//!
//! Bands where the ear is less sensitive get coarser steps. The table is
//! computed once per stream and scaled by the controller's global step.

use crate::codec::quantizer::{StepTable, MINIMAL_STEP};
use crate::transform::SubbandLayout;

/// Threshold of hearing in quiet, dB SPL, at `freq_hz`
pub fn threshold_of_hearing(freq_hz: f64) -> f64 {
    let f = freq_hz.max(1.0) / 1000.0;
    3.64 * f.powf(-0.8) - 6.5 * (-0.6 * (f - 3.3).powi(2)).exp() + 1e-3 * f.powi(4)
}

/// Step table for `number_of_subbands` uniform bands covering `[0, fs/2]`.
pub fn compute_step_table(
    number_of_subbands: usize,
    sample_rate: u32,
    minimal_step: u32,
    max_step: u32,
) -> StepTable {
    let nyquist = sample_rate as f64 / 2.0;
    let count = number_of_subbands.max(1) as f64;
    let centers = (0..number_of_subbands.max(1)).map(|i| {
        let (lo, hi) = (i as f64 / count, (i + 1) as f64 / count);
        (lo + hi) / 2.0 * nyquist
    });
    remap(centers, minimal_step, max_step)
}

/// Step table for the bands of an arbitrary layout, in layout order.
pub fn step_table_for_layout(
    layout: &SubbandLayout,
    sample_rate: u32,
    minimal_step: u32,
    max_step: u32,
) -> StepTable {
    let nyquist = sample_rate as f64 / 2.0;
    let centers = layout.bands().iter().map(|b| b.center() * nyquist);
    remap(centers, minimal_step, max_step)
}

/// Map the thresholds linearly onto `[minimal_step, max_step]`.
fn remap(centers: impl Iterator<Item = f64>, minimal_step: u32, max_step: u32) -> StepTable {
    let minimal = minimal_step.max(MINIMAL_STEP);
    let max = max_step.max(minimal);
    let thresholds: Vec<f64> = centers.map(threshold_of_hearing).collect();

    let lo = thresholds.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = thresholds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = hi - lo;

    let steps = thresholds
        .iter()
        .map(|&t| {
            if !span.is_finite() || span <= f64::EPSILON {
                return minimal;
            }
            let unit = (t - lo) / span;
            let step = minimal as f64 + unit * (max - minimal) as f64;
            (step.round() as u32).clamp(minimal, max)
        })
        .collect();

    StepTable::per_subband(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TreeShape;

    #[test]
    fn test_threshold_dips_around_3khz() {
        let t_100 = threshold_of_hearing(100.0);
        let t_3300 = threshold_of_hearing(3300.0);
        let t_16000 = threshold_of_hearing(16000.0);
        assert!(t_3300 < t_100);
        assert!(t_3300 < t_16000);
        assert!(t_3300 < 0.0);
    }

    #[test]
    fn test_threshold_handles_dc() {
        assert!(threshold_of_hearing(0.0).is_finite());
    }

    #[test]
    fn test_table_spans_the_step_range() {
        let table = compute_step_table(16, 44100, 1, 64);
        assert_eq!(table.len(), 16);
        assert_eq!(*table.steps().iter().min().unwrap(), 1);
        assert_eq!(*table.steps().iter().max().unwrap(), 64);
    }

    #[test]
    fn test_most_sensitive_band_gets_finest_step() {
        let table = compute_step_table(16, 44100, 2, 100);
        // 16 bands of ~1378 Hz: band 2 is centred near 3.4 kHz
        let finest = table
            .steps()
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| **s)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(finest, 2);
        // The top band is far less sensitive than the middle
        assert!(table.step(15) > table.step(8));
    }

    #[test]
    fn test_single_band_uses_minimal_step() {
        let table = compute_step_table(1, 44100, 3, 50);
        assert_eq!(table.steps(), &[3]);
    }

    #[test]
    fn test_inverted_bounds_collapse() {
        let table = compute_step_table(8, 44100, 10, 4);
        assert!(table.steps().iter().all(|&s| s == 10));
    }

    #[test]
    fn test_layout_table_follows_band_order() {
        let layout = SubbandLayout::new(TreeShape::Dyadic, 4);
        let table = step_table_for_layout(&layout, 44100, 1, 32);
        assert_eq!(table.len(), layout.len());

        let packets = SubbandLayout::new(TreeShape::Packet, 4);
        let uniform = step_table_for_layout(&packets, 44100, 1, 32);
        assert_eq!(uniform, compute_step_table(16, 44100, 1, 32));
    }
}
