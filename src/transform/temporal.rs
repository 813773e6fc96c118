//! Lapped temporal subband transform
//!
//! Each chunk is decomposed inside a window extended with `overlap` samples
//! of its neighbours; the border coefficients, which see the artificial
//! periodic extension, are discarded so that exactly `frames` coefficients
//! per channel remain. The analyzer therefore works one chunk behind its
//! input, and the synthesizer (which needs the neighbouring coefficient
//! chunks) one chunk behind its own input.
//!
//! With `overlap == 0` both directions work on the chunk in hand and add no
//! latency, at the cost of small discontinuities at chunk boundaries.

use std::mem;
use std::ops::Range;

use crate::audio::chunk::Block;

use super::subband::{Decomposition, SubbandLayout};

/// Previous, current and next block seen by one side of the transform.
#[derive(Debug, Clone)]
pub struct OverlapHistory<T> {
    previous: Block<T>,
    current: Block<T>,
    next: Block<T>,
}

impl<T: Copy + Default> OverlapHistory<T> {
    /// Start of stream: three zero blocks.
    pub fn new(frames: usize, channels: usize) -> Self {
        Self {
            previous: Block::zeros(frames, channels),
            current: Block::zeros(frames, channels),
            next: Block::zeros(frames, channels),
        }
    }

    /// `previous ← current`, `current ← next`, `next ← incoming`.
    ///
    /// Returns the block that fell out of `previous`.
    pub fn rotate(&mut self, incoming: Block<T>) -> Block<T> {
        mem::swap(&mut self.previous, &mut self.current);
        mem::swap(&mut self.current, &mut self.next);
        mem::replace(&mut self.next, incoming)
    }

    pub fn previous(&self) -> &Block<T> {
        &self.previous
    }

    pub fn current(&self) -> &Block<T> {
        &self.current
    }

    pub fn next(&self) -> &Block<T> {
        &self.next
    }
}

/// Fixed parameters shared by analyzer and synthesizer
#[derive(Debug, Clone)]
pub struct TemporalParams {
    pub decomposition: Decomposition,
    pub frames: usize,
    pub channels: usize,
    /// Border samples borrowed from each neighbour; zero disables lapping
    pub overlap: usize,
}

impl TemporalParams {
    pub fn layout(&self) -> &SubbandLayout {
        self.decomposition.layout()
    }

    /// Coefficient ranges of each subband within one channel of a chunk
    pub fn band_ranges(&self) -> Vec<Range<usize>> {
        self.layout().ranges(self.frames)
    }

    pub fn is_lapped(&self) -> bool {
        self.overlap > 0
    }

    fn trims(&self) -> impl Iterator<Item = usize> + '_ {
        self.layout().bands().iter().map(move |b| self.overlap >> b.depth)
    }
}

fn to_i32(value: f64) -> i32 {
    // `as` saturates and maps NaN to zero
    value.round() as i32
}

/// Sender half: mid/side blocks in, subband coefficients out.
#[derive(Debug, Clone)]
pub struct TemporalAnalyzer {
    params: TemporalParams,
    history: OverlapHistory<i32>,
}

impl TemporalAnalyzer {
    pub fn new(params: TemporalParams) -> Self {
        let history = OverlapHistory::new(params.frames, params.channels);
        Self { params, history }
    }

    pub fn params(&self) -> &TemporalParams {
        &self.params
    }

    pub fn history(&self) -> &OverlapHistory<i32> {
        &self.history
    }

    /// Transform one chunk. In lapped mode the result belongs to the chunk
    /// received on the previous call.
    pub fn analyze(&mut self, block: Block<i32>) -> Block<i32> {
        let frames = self.params.frames;
        let channels = self.params.channels;
        let overlap = self.params.overlap;

        if !self.params.is_lapped() {
            let mut out = Block::zeros(frames, channels);
            for ch in 0..channels {
                let signal: Vec<f64> = block.iter_channel(ch).map(f64::from).collect();
                let bands = self.params.decomposition.decompose(&signal);
                let coeffs: Vec<i32> = bands.iter().flatten().copied().map(to_i32).collect();
                out.set_channel(ch, &coeffs);
            }
            return out;
        }

        self.history.rotate(block);

        let mut out = Block::zeros(frames, channels);
        let mut extended = Vec::with_capacity(frames + 2 * overlap);
        for ch in 0..channels {
            extended.clear();
            extended.extend(self.history.previous.iter_channel(ch).skip(frames - overlap).map(f64::from));
            extended.extend(self.history.current.iter_channel(ch).map(f64::from));
            extended.extend(self.history.next.iter_channel(ch).take(overlap).map(f64::from));

            let bands = self.params.decomposition.decompose(&extended);

            let mut coeffs = Vec::with_capacity(frames);
            for ((band, trim), info) in bands.iter().zip(self.params.trims()).zip(self.params.layout().bands()) {
                let keep = frames >> info.depth;
                coeffs.extend(band[trim..trim + keep].iter().copied().map(to_i32));
            }
            out.set_channel(ch, &coeffs);
        }
        out
    }
}

/// Receiver half: subband coefficients in, mid/side blocks out.
#[derive(Debug, Clone)]
pub struct TemporalSynthesizer {
    params: TemporalParams,
    ranges: Vec<Range<usize>>,
    history: OverlapHistory<i32>,
    /// Coefficient block no longer needed by the history
    spare: Option<Block<i32>>,
}

impl TemporalSynthesizer {
    pub fn new(params: TemporalParams) -> Self {
        let history = OverlapHistory::new(params.frames, params.channels);
        let ranges = params.band_ranges();
        Self {
            params,
            ranges,
            history,
            spare: None,
        }
    }

    pub fn params(&self) -> &TemporalParams {
        &self.params
    }

    /// Hand back the last block released by [`TemporalSynthesizer::synthesize`]
    /// so the caller can refill it instead of allocating.
    pub fn take_spare(&mut self) -> Option<Block<i32>> {
        self.spare.take()
    }

    /// Inverse transform. In lapped mode the result belongs to the
    /// coefficient chunk received on the previous call.
    pub fn synthesize(&mut self, coeffs: Block<i32>) -> Block<i32> {
        let frames = self.params.frames;
        let channels = self.params.channels;
        let overlap = self.params.overlap;

        if !self.params.is_lapped() {
            let mut out = Block::zeros(frames, channels);
            for ch in 0..channels {
                let flat: Vec<f64> = coeffs.iter_channel(ch).map(f64::from).collect();
                let bands: Vec<Vec<f64>> = self.ranges.iter().map(|r| flat[r.clone()].to_vec()).collect();
                let signal = self.params.decomposition.reconstruct(&bands);
                let samples: Vec<i32> = signal.into_iter().map(to_i32).collect();
                out.set_channel(ch, &samples);
            }
            self.spare = Some(coeffs);
            return out;
        }

        self.spare = Some(self.history.rotate(coeffs));

        let mut out = Block::zeros(frames, channels);
        for ch in 0..channels {
            let previous = self.history.previous.channel(ch);
            let current = self.history.current.channel(ch);
            let next = self.history.next.channel(ch);

            let bands: Vec<Vec<f64>> = self
                .ranges
                .iter()
                .zip(self.params.trims())
                .map(|(range, trim)| {
                    let mut band = Vec::with_capacity(range.len() + 2 * trim);
                    band.extend(previous[range.end - trim..range.end].iter().map(|&v| f64::from(v)));
                    band.extend(current[range.clone()].iter().map(|&v| f64::from(v)));
                    band.extend(next[range.start..range.start + trim].iter().map(|&v| f64::from(v)));
                    band
                })
                .collect();

            let signal = self.params.decomposition.reconstruct(&bands);
            let samples: Vec<i32> = signal[overlap..overlap + frames].iter().copied().map(to_i32).collect();
            out.set_channel(ch, &samples);
        }
        out
    }
}
