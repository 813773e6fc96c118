//! Orthonormal wavelet filters and single-level periodized DWT

use serde::{Deserialize, Serialize};

/// Supported orthonormal wavelets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Wavelet {
    /// Haar (db1)
    Haar,
    Db2,
    Db3,
    Db4,
    #[default]
    Db5,
}

const HAAR: [f64; 2] = [0.7071067811865476, 0.7071067811865476];

const DB2: [f64; 4] = [
    0.48296291314469025,
    0.836516303737469,
    0.22414386804185735,
    -0.12940952255092145,
];

const DB3: [f64; 6] = [
    0.3326705529509569,
    0.8068915093133388,
    0.4598775021193313,
    -0.13501102001039084,
    -0.08544127388224149,
    0.035226291882100656,
];

const DB4: [f64; 8] = [
    0.23037781330885523,
    0.7148465705525415,
    0.6308807679295904,
    -0.02798376941698385,
    -0.18703481171888114,
    0.030841381835986965,
    0.032883011666982945,
    -0.010597401784997278,
];

const DB5: [f64; 10] = [
    0.160102397974125,
    0.6038292697974729,
    0.7243085284385744,
    0.13842814590110342,
    -0.24229488706619015,
    -0.03224486958502952,
    0.07757149384006515,
    -0.006241490213011705,
    -0.012580751999015526,
    0.003335725285001549,
];

impl Wavelet {
    /// Scaling (low-pass) filter taps
    pub fn low_pass(self) -> &'static [f64] {
        match self {
            Wavelet::Haar => &HAAR,
            Wavelet::Db2 => &DB2,
            Wavelet::Db3 => &DB3,
            Wavelet::Db4 => &DB4,
            Wavelet::Db5 => &DB5,
        }
    }

    /// Number of filter taps
    pub fn filter_len(self) -> usize {
        self.low_pass().len()
    }

    pub fn name(self) -> &'static str {
        match self {
            Wavelet::Haar => "haar",
            Wavelet::Db2 => "db2",
            Wavelet::Db3 => "db3",
            Wavelet::Db4 => "db4",
            Wavelet::Db5 => "db5",
        }
    }
}

/// Analysis/synthesis filter pair for one wavelet.
#[derive(Debug, Clone)]
pub struct FilterBank {
    low: Vec<f64>,
    high: Vec<f64>,
}

impl FilterBank {
    pub fn new(wavelet: Wavelet) -> Self {
        let low = wavelet.low_pass().to_vec();
        let len = low.len();
        // Quadrature mirror: g[n] = (-1)^n h[L-1-n]
        let high = (0..len)
            .map(|n| {
                let tap = low[len - 1 - n];
                if n % 2 == 0 {
                    tap
                } else {
                    -tap
                }
            })
            .collect();
        Self { low, high }
    }

    pub fn len(&self) -> usize {
        self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.low.is_empty()
    }

    /// One level of periodized analysis. `signal.len()` must be even.
    ///
    /// Returns `(approximation, detail)`, each half the input length.
    pub fn analyze(&self, signal: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = signal.len();
        debug_assert!(n % 2 == 0, "signal length must be even");
        let half = n / 2;
        let mut approx = vec![0.0; half];
        let mut detail = vec![0.0; half];

        for k in 0..half {
            let mut a = 0.0;
            let mut d = 0.0;
            for (tap, (&h, &g)) in self.low.iter().zip(&self.high).enumerate() {
                let x = signal[(2 * k + tap) % n];
                a += h * x;
                d += g * x;
            }
            approx[k] = a;
            detail[k] = d;
        }

        (approx, detail)
    }

    /// One level of periodized synthesis, the transpose of [`FilterBank::analyze`].
    pub fn synthesize(&self, approx: &[f64], detail: &[f64]) -> Vec<f64> {
        debug_assert_eq!(approx.len(), detail.len());
        let n = approx.len() * 2;
        let mut signal = vec![0.0; n];

        for (k, (&a, &d)) in approx.iter().zip(detail).enumerate() {
            for (tap, (&h, &g)) in self.low.iter().zip(&self.high).enumerate() {
                signal[(2 * k + tap) % n] += h * a + g * d;
            }
        }

        signal
    }
}
