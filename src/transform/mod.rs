//! Subband transform: mid/side stereo plus lapped wavelet decomposition
//!
//! ```text
//!  Chunk(i16) ──analyze_stereo──▶ mid/side(i32) ──TemporalAnalyzer──▶ CoefficientChunk
//!  CoefficientChunk ──TemporalSynthesizer──▶ mid/side(i32) ──synthesize_stereo──▶ Chunk(i16)
//! ```

pub mod stereo;
pub mod subband;
pub mod temporal;
pub mod wavelet;

pub use stereo::{analyze_stereo, synthesize_stereo};
pub use subband::{lapped_overlap, Decomposition, Subband, SubbandLayout, TreeShape};
pub use temporal::{OverlapHistory, TemporalAnalyzer, TemporalParams, TemporalSynthesizer};
pub use wavelet::{FilterBank, Wavelet};

use crate::audio::chunk::{Block, Chunk, CoefficientChunk};

/// Both directions of the transform for one stream.
///
/// A sender only uses [`SubbandTransform::analyze`], a receiver only
/// [`SubbandTransform::synthesize`]; each direction keeps its own history.
#[derive(Debug, Clone)]
pub struct SubbandTransform {
    stereo: bool,
    analyzer: TemporalAnalyzer,
    synthesizer: TemporalSynthesizer,
}

impl SubbandTransform {
    pub fn new(params: TemporalParams, stereo: bool) -> Self {
        Self {
            stereo,
            analyzer: TemporalAnalyzer::new(params.clone()),
            synthesizer: TemporalSynthesizer::new(params),
        }
    }

    pub fn params(&self) -> &TemporalParams {
        self.analyzer.params()
    }

    /// Chunks of delay added by analysis plus synthesis
    pub fn latency_chunks(&self) -> usize {
        if self.params().is_lapped() {
            2
        } else {
            0
        }
    }

    /// Captured chunk in, coefficients out.
    pub fn analyze(&mut self, chunk: &Chunk) -> CoefficientChunk {
        let wide = if self.stereo {
            analyze_stereo(chunk)
        } else {
            chunk.map(i32::from)
        };
        self.analyzer.analyze(wide)
    }

    /// A released coefficient block of the session's shape, if the
    /// synthesizer has one to give back.
    pub fn take_spare(&mut self) -> Option<CoefficientChunk> {
        self.synthesizer.take_spare()
    }

    /// Coefficients in, playable chunk out.
    pub fn synthesize(&mut self, coeffs: CoefficientChunk) -> Chunk {
        let wide: Block<i32> = self.synthesizer.synthesize(coeffs);
        if self.stereo {
            synthesize_stereo(&wide)
        } else {
            wide.map(crate::audio::chunk::saturate_i16)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_transform_round_trip() {
        let frames = 128;
        let params = TemporalParams {
            decomposition: Decomposition::new(Wavelet::Db2, TreeShape::Dyadic, 3),
            frames,
            channels: 2,
            overlap: lapped_overlap(Wavelet::Db2, 3),
        };
        let mut transform = SubbandTransform::new(params, true);
        assert_eq!(transform.latency_chunks(), 2);

        let make = |index: usize| {
            let mut chunk = Chunk::zeros(frames, 2);
            for f in 0..frames {
                let t = (index * frames + f) as f64;
                chunk.set(f, 0, (6000.0 * (t * 0.05).sin()) as i16);
                chunk.set(f, 1, (6000.0 * (t * 0.021).sin()) as i16);
            }
            chunk
        };

        for i in 0..5 {
            let coeffs = transform.analyze(&make(i));
            let out = transform.synthesize(coeffs);
            if i >= 3 {
                let expected = make(i - 2);
                for (x, y) in expected.data().iter().zip(out.data()) {
                    assert!((*x as i32 - *y as i32).abs() <= 2);
                }
            }
        }
    }
}
