//! Multi-level dyadic and wavelet-packet decompositions
//!
//! Both decompositions produce a list of subbands in ascending frequency
//! order. A subband at depth `d` holds `len >> d` coefficients.

use std::ops::Range;

use super::wavelet::{FilterBank, Wavelet};

/// Shape of the decomposition tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeShape {
    /// Split only the low band at every level: `levels + 1` subbands
    Dyadic,
    /// Split every band at every level: `2^levels` uniform subbands
    Packet,
}

/// One subband of the layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Subband {
    /// Decomposition depth; the band holds `len >> depth` coefficients
    pub depth: usize,
    /// Lower band edge as a fraction of the Nyquist rate
    pub freq_lo: f64,
    /// Upper band edge as a fraction of the Nyquist rate
    pub freq_hi: f64,
}

impl Subband {
    /// Centre frequency as a fraction of the Nyquist rate
    pub fn center(&self) -> f64 {
        (self.freq_lo + self.freq_hi) / 2.0
    }
}

/// Ordered subbands of a decomposition
#[derive(Debug, Clone, PartialEq)]
pub struct SubbandLayout {
    bands: Vec<Subband>,
}

impl SubbandLayout {
    pub fn new(shape: TreeShape, levels: usize) -> Self {
        if levels == 0 {
            return Self {
                bands: vec![Subband {
                    depth: 0,
                    freq_lo: 0.0,
                    freq_hi: 1.0,
                }],
            };
        }

        let bands = match shape {
            TreeShape::Dyadic => {
                let mut bands = Vec::with_capacity(levels + 1);
                bands.push(Subband {
                    depth: levels,
                    freq_lo: 0.0,
                    freq_hi: 0.5f64.powi(levels as i32),
                });
                for depth in (1..=levels).rev() {
                    bands.push(Subband {
                        depth,
                        freq_lo: 0.5f64.powi(depth as i32),
                        freq_hi: 0.5f64.powi(depth as i32 - 1),
                    });
                }
                bands
            }
            TreeShape::Packet => {
                let count = 1usize << levels;
                (0..count)
                    .map(|i| Subband {
                        depth: levels,
                        freq_lo: i as f64 / count as f64,
                        freq_hi: (i + 1) as f64 / count as f64,
                    })
                    .collect()
            }
        };

        Self { bands }
    }

    pub fn bands(&self) -> &[Subband] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Coefficient index ranges of each subband when `len` coefficients are
    /// concatenated in layout order.
    pub fn ranges(&self, len: usize) -> Vec<Range<usize>> {
        let mut start = 0;
        self.bands
            .iter()
            .map(|band| {
                let end = start + (len >> band.depth);
                let range = start..end;
                start = end;
                range
            })
            .collect()
    }
}

/// Border samples needed on each side of a chunk so that the interior
/// coefficients of the extended window are unaffected by periodic wrap.
///
/// Starts from `nextPowerOfTwo(filter_len × levels)` and grows it until every
/// trim `overlap >> depth` is integral and covers the wrap contamination of
/// both analysis (right border) and synthesis (left border).
pub fn lapped_overlap(wavelet: Wavelet, levels: usize) -> usize {
    if levels == 0 {
        return 0;
    }

    let taps = wavelet.filter_len();
    let mut needed = 1usize << levels;

    let mut contaminated = 0usize;
    for depth in 1..=levels {
        contaminated = (contaminated + taps - 1) / 2;
        needed = needed.max(contaminated << depth);
    }
    needed = needed.max((taps - 2) * ((1usize << levels) - 1));

    (taps * levels).next_power_of_two().max(needed).next_power_of_two()
}

/// Multi-level decomposition with a fixed wavelet and tree shape.
#[derive(Debug, Clone)]
pub struct Decomposition {
    bank: FilterBank,
    shape: TreeShape,
    levels: usize,
    layout: SubbandLayout,
}

impl Decomposition {
    pub fn new(wavelet: Wavelet, shape: TreeShape, levels: usize) -> Self {
        Self {
            bank: FilterBank::new(wavelet),
            shape,
            levels,
            layout: SubbandLayout::new(shape, levels),
        }
    }

    pub fn layout(&self) -> &SubbandLayout {
        &self.layout
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Decompose `signal` into subbands in layout order.
    /// `signal.len()` must be divisible by `2^levels`.
    pub fn decompose(&self, signal: &[f64]) -> Vec<Vec<f64>> {
        match self.shape {
            TreeShape::Dyadic => self.decompose_dyadic(signal),
            TreeShape::Packet => self.decompose_packet(signal),
        }
    }

    /// Inverse of [`Decomposition::decompose`].
    pub fn reconstruct(&self, bands: &[Vec<f64>]) -> Vec<f64> {
        match self.shape {
            TreeShape::Dyadic => self.reconstruct_dyadic(bands),
            TreeShape::Packet => self.reconstruct_packet(bands),
        }
    }

    fn decompose_dyadic(&self, signal: &[f64]) -> Vec<Vec<f64>> {
        let mut approx = signal.to_vec();
        let mut details = Vec::with_capacity(self.levels);
        for _ in 0..self.levels {
            let (a, d) = self.bank.analyze(&approx);
            details.push(d);
            approx = a;
        }

        let mut bands = Vec::with_capacity(self.levels + 1);
        bands.push(approx);
        bands.extend(details.into_iter().rev());
        bands
    }

    fn reconstruct_dyadic(&self, bands: &[Vec<f64>]) -> Vec<f64> {
        let mut approx = bands[0].clone();
        for detail in &bands[1..] {
            approx = self.bank.synthesize(&approx, detail);
        }
        approx
    }

    fn decompose_packet(&self, signal: &[f64]) -> Vec<Vec<f64>> {
        let mut nodes = vec![signal.to_vec()];
        for _ in 0..self.levels {
            let mut children = Vec::with_capacity(nodes.len() * 2);
            for (position, node) in nodes.iter().enumerate() {
                let (a, d) = self.bank.analyze(node);
                // The high branch of an odd node is spectrally inverted
                if position % 2 == 0 {
                    children.push(a);
                    children.push(d);
                } else {
                    children.push(d);
                    children.push(a);
                }
            }
            nodes = children;
        }
        nodes
    }

    fn reconstruct_packet(&self, bands: &[Vec<f64>]) -> Vec<f64> {
        let mut nodes = bands.to_vec();
        for _ in 0..self.levels {
            nodes = nodes
                .chunks(2)
                .enumerate()
                .map(|(position, pair)| {
                    if position % 2 == 0 {
                        self.bank.synthesize(&pair[0], &pair[1])
                    } else {
                        self.bank.synthesize(&pair[1], &pair[0])
                    }
                })
                .collect();
        }
        nodes.into_iter().next().unwrap_or_default()
    }
}
