//! Mel scale helpers, the Hann analysis window and the triangular mel
//! filterbank.
//!
//! The filterbank projects the `fft_size / 2 + 1` power bins of a real FFT
//! onto `num_mels` perceptually spaced bands. It is built once and never
//! changes afterwards.

use serde::{Deserialize, Serialize};

/// Convert a frequency in Hz to mels (`2595 · log10(1 + hz / 700)`).
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Inverse of [`hz_to_mel`].
pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// Symmetric Hann window: `w[i] = 0.5 · (1 − cos(2π·i / (size − 1)))`.
///
/// Windows shorter than two samples are all ones.
pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    let denom = (size - 1) as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / denom).cos()))
        .collect()
}

// ---------------------------------------------------------------------------
// MelNorm
// ---------------------------------------------------------------------------

/// Per-row scaling of the filterbank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MelNorm {
    /// Triangles peak at exactly 1.0.
    #[default]
    None,
    /// Each row is divided by its sum so every band has unit area.
    Area,
}

// ---------------------------------------------------------------------------
// MelFilterbank
// ---------------------------------------------------------------------------

/// `num_mels × (fft_size / 2 + 1)` matrix of triangular weights.
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    /// Row-major weights.
    weights: Vec<f32>,
    num_mels: usize,
    num_bins: usize,
    /// `num_mels + 2` FFT bin indices: band `m` spans
    /// `edges[m] ..= edges[m + 2]` and peaks at `edges[m + 1]`.
    edges: Vec<usize>,
}

impl MelFilterbank {
    /// Build the filterbank.
    ///
    /// `num_mels + 2` points are spaced evenly on the mel scale between
    /// `fmin` and `fmax` and mapped to bins with
    /// `floor((fft_size + 1) · hz / sample_rate)`, clamped to
    /// `[0, fft_size / 2]`. A band whose rising or falling edge has zero
    /// width is left as an all-zero row.
    pub fn new(
        sample_rate: u32,
        fft_size: usize,
        num_mels: usize,
        fmin: f32,
        fmax: f32,
        norm: MelNorm,
    ) -> Self {
        let num_bins = fft_size / 2 + 1;
        let max_bin = fft_size / 2;

        let mel_min = hz_to_mel(fmin);
        let mel_max = hz_to_mel(fmax);
        let steps = (num_mels + 1) as f32;

        let edges: Vec<usize> = (0..num_mels + 2)
            .map(|i| {
                let mel = mel_min + (mel_max - mel_min) * i as f32 / steps;
                let bin = ((fft_size + 1) as f32 * mel_to_hz(mel) / sample_rate as f32).floor();
                (bin.max(0.0) as usize).min(max_bin)
            })
            .collect();

        let mut weights = vec![0.0_f32; num_mels * num_bins];

        for (m, row) in weights.chunks_exact_mut(num_bins).enumerate() {
            let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
            if left >= center || center >= right {
                continue;
            }

            let rise = (center - left) as f32;
            for k in left..center {
                row[k] = (k - left) as f32 / rise;
            }
            let fall = (right - center) as f32;
            for k in center..right {
                row[k] = (right - k) as f32 / fall;
            }

            if norm == MelNorm::Area {
                let sum: f32 = row.iter().sum();
                if sum > 0.0 {
                    row.iter_mut().for_each(|w| *w /= sum);
                }
            }
        }

        Self {
            weights,
            num_mels,
            num_bins,
            edges,
        }
    }

    /// Number of mel bands (rows).
    pub fn num_mels(&self) -> usize {
        self.num_mels
    }

    /// Number of FFT bins per row (`fft_size / 2 + 1`).
    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Weights of band `m`, or `None` past the last band.
    pub fn row(&self, m: usize) -> Option<&[f32]> {
        self.weights.chunks_exact(self.num_bins).nth(m)
    }

    /// Iterate over all rows in band order.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.weights.chunks_exact(self.num_bins)
    }

    /// `(left, center, right)` bin indices of band `m`, or `None` past the
    /// last band.
    pub fn band_edges(&self, m: usize) -> Option<(usize, usize, usize)> {
        match self.edges.get(m..m + 3)? {
            &[left, center, right] => Some((left, center, right)),
            _ => None,
        }
    }

    /// Project a power spectrum onto the mel bands: `out[m] = Σ_k power[k] · w[m][k]`.
    ///
    /// # Panics
    ///
    /// Panics if `power.len() != num_bins()` or `out.len() != num_mels()`.
    pub fn apply(&self, power: &[f32], out: &mut [f32]) {
        assert_eq!(power.len(), self.num_bins, "power spectrum length mismatch");
        assert_eq!(out.len(), self.num_mels, "mel output length mismatch");

        for (energy, row) in out.iter_mut().zip(self.rows()) {
            *energy = row.iter().zip(power).map(|(w, p)| w * p).sum();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
