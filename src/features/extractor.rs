//! Streaming mel-spectrogram extraction.
//!
//! [`FeatureExtractor`] turns a continuous stream of mono samples into one
//! [`FeatureVector`] per analysis window:
//!
//! ```text
//! samples ─▶ carry-over buffer ─▶ [fft_size window] ─▶ silence gate
//!         ─▶ × Hann ─▶ real FFT ─▶ |X|² ─▶ mel filterbank ─▶ 10·log10
//!         ─▶ clamp to (max − top_db)
//! ```
//!
//! Windows start every `hop_size` samples regardless of how the input is
//! chunked: feeding the stream in one call or in many produces the same
//! vectors.
//!
//! # Example
//!
//! ```rust
//! use mel_capture::config::FeatureConfig;
//! use mel_capture::features::FeatureExtractor;
//!
//! let mut extractor = FeatureExtractor::new(&FeatureConfig::default()).unwrap();
//!
//! // 3000 samples with fft_size 1024 / hop 512 → windows at 0, 512, 1024, 1536
//! let frames = extractor.process(&vec![0.0_f32; 3_000]);
//! assert_eq!(frames.len(), 4);
//! assert!(frames[0].iter().all(|&db| db == -80.0));
//! ```

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use thiserror::Error;

use super::mel::{hann_window, MelFilterbank};
use crate::config::FeatureConfig;

/// Log-power values of one analysis window, one per mel band, in dB.
pub type FeatureVector = Vec<f32>;

// ---------------------------------------------------------------------------
// FeatureError
// ---------------------------------------------------------------------------

/// Invalid [`FeatureConfig`] detected at construction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeatureError {
    #[error("sample_rate must be > 0")]
    SampleRate,

    #[error("fft_size must be at least 2 (got {0})")]
    FftSize(usize),

    #[error("hop_size must be in 1..={fft_size} (got {hop_size})")]
    HopSize { hop_size: usize, fft_size: usize },

    #[error("num_mels must be > 0")]
    NoMelBands,

    #[error("invalid frequency range {fmin} Hz .. {fmax} Hz (nyquist {nyquist} Hz)")]
    FrequencyRange { fmin: f32, fmax: f32, nyquist: f32 },

    #[error("top_db must be finite and >= 0 (got {0})")]
    TopDb(f32),

    #[error("eps must be finite and > 0 (got {0})")]
    Eps(f32),
}

fn validate(config: &FeatureConfig) -> Result<(), FeatureError> {
    if config.sample_rate == 0 {
        return Err(FeatureError::SampleRate);
    }
    if config.fft_size < 2 {
        return Err(FeatureError::FftSize(config.fft_size));
    }
    if config.hop_size == 0 || config.hop_size > config.fft_size {
        return Err(FeatureError::HopSize {
            hop_size: config.hop_size,
            fft_size: config.fft_size,
        });
    }
    if config.num_mels == 0 {
        return Err(FeatureError::NoMelBands);
    }

    let nyquist = config.sample_rate as f32 / 2.0;
    let fmax = config.resolved_fmax();
    if !(config.fmin >= 0.0 && config.fmin < fmax && fmax <= nyquist) {
        return Err(FeatureError::FrequencyRange {
            fmin: config.fmin,
            fmax,
            nyquist,
        });
    }
    if !(config.top_db.is_finite() && config.top_db >= 0.0) {
        return Err(FeatureError::TopDb(config.top_db));
    }
    if !(config.eps.is_finite() && config.eps > 0.0) {
        return Err(FeatureError::Eps(config.eps));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FrameAnalyzer
// ---------------------------------------------------------------------------

/// Per-window transform with its reusable FFT buffers.
struct FrameAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    filterbank: MelFilterbank,
    fft_input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    power: Vec<f32>,
    top_db: f32,
    eps: f32,
    silence_threshold: f32,
}

impl FrameAnalyzer {
    fn new(config: &FeatureConfig) -> Self {
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(config.fft_size);
        let fft_input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        let power = vec![0.0; spectrum.len()];

        let filterbank = MelFilterbank::new(
            config.sample_rate,
            config.fft_size,
            config.num_mels,
            config.fmin,
            config.resolved_fmax(),
            config.mel_norm,
        );

        Self {
            fft,
            window: hann_window(config.fft_size),
            filterbank,
            fft_input,
            spectrum,
            scratch,
            power,
            top_db: config.top_db,
            eps: config.eps,
            silence_threshold: config.silence_threshold,
        }
    }

    fn silent_frame(&self) -> FeatureVector {
        vec![-self.top_db; self.filterbank.num_mels()]
    }

    fn compute_frame(&mut self, frame: &[f32]) -> FeatureVector {
        assert_eq!(
            frame.len(),
            self.window.len(),
            "frame must hold exactly fft_size samples"
        );

        let energy_sum: f32 = frame.iter().map(|s| s.abs()).sum();
        if energy_sum < self.silence_threshold {
            return self.silent_frame();
        }

        for ((dst, &sample), &w) in self.fft_input.iter_mut().zip(frame).zip(&self.window) {
            *dst = sample * w;
        }

        if let Err(err) =
            self.fft
                .process_with_scratch(&mut self.fft_input, &mut self.spectrum, &mut self.scratch)
        {
            log::error!("FFT failed, emitting silence floor: {err}");
            return self.silent_frame();
        }

        for (p, bin) in self.power.iter_mut().zip(&self.spectrum) {
            *p = bin.re * bin.re + bin.im * bin.im;
        }

        let mut mel = vec![0.0_f32; self.filterbank.num_mels()];
        self.filterbank.apply(&self.power, &mut mel);

        let mut max_db = f32::NEG_INFINITY;
        for v in mel.iter_mut() {
            *v = 10.0 * v.max(self.eps).log10();
            max_db = max_db.max(*v);
        }

        let floor = max_db - self.top_db;
        for v in mel.iter_mut() {
            *v = v.max(floor);
        }
        mel
    }
}

// ---------------------------------------------------------------------------
// FeatureExtractor
// ---------------------------------------------------------------------------

/// Windowed-FFT mel-spectrogram extractor with an overlap carry-over buffer.
///
/// Owned by a single thread, which feeds it samples in stream order.
pub struct FeatureExtractor {
    config: FeatureConfig,
    analyzer: FrameAnalyzer,
    /// Samples received; `pending[consumed..]` have not been advanced past
    /// by a hop yet.
    pending: Vec<f32>,
    consumed: usize,
    frames_emitted: u64,
}

impl FeatureExtractor {
    /// Build the window, filterbank and FFT plan for `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`FeatureError`] when `config` is malformed: zero sample
    /// rate, `fft_size < 2`, `hop_size` outside `1..=fft_size`,
    /// `num_mels == 0`, an empty or out-of-range frequency band, or a
    /// non-finite `top_db` / `eps`.
    pub fn new(config: &FeatureConfig) -> Result<Self, FeatureError> {
        validate(config)?;

        log::debug!(
            "feature extractor: {} Hz, fft {}, hop {}, {} mels, {}..{} Hz",
            config.sample_rate,
            config.fft_size,
            config.hop_size,
            config.num_mels,
            config.fmin,
            config.resolved_fmax()
        );

        Ok(Self {
            config: config.clone(),
            analyzer: FrameAnalyzer::new(config),
            pending: Vec::with_capacity(config.fft_size * 2),
            consumed: 0,
            frames_emitted: 0,
        })
    }

    /// Compute the feature vector of a single `fft_size` window.
    ///
    /// Windows whose summed absolute amplitude is below `silence_threshold`
    /// short-circuit to a vector of `-top_db`. Otherwise every value is at
    /// least `max − top_db`, where `max` is the loudest band of this window.
    ///
    /// # Panics
    ///
    /// Panics if `window.len() != fft_size`.
    pub fn compute_frame(&mut self, window: &[f32]) -> FeatureVector {
        self.analyzer.compute_frame(window)
    }

    /// Append samples to the carry-over buffer without computing anything.
    pub fn push_samples(&mut self, input: &[f32]) {
        if self.consumed > 0 {
            self.pending.drain(..self.consumed);
            self.consumed = 0;
        }
        self.pending.extend_from_slice(input);
    }

    /// Compute the next window if at least `fft_size` samples are pending,
    /// then advance by `hop_size`.
    pub fn next_frame(&mut self) -> Option<FeatureVector> {
        let fft_size = self.config.fft_size;
        let start = self.consumed;
        if self.pending.len() - start < fft_size {
            return None;
        }

        let frame = self.analyzer.compute_frame(&self.pending[start..start + fft_size]);
        self.consumed += self.config.hop_size;
        self.frames_emitted += 1;
        Some(frame)
    }

    /// Feed `input` and return every window it completes.
    ///
    /// Successive calls are equivalent to one call on the concatenated input.
    pub fn process(&mut self, input: &[f32]) -> Vec<FeatureVector> {
        self.push_samples(input);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Discard the carry-over buffer; the next window starts at the next
    /// pushed sample.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.consumed = 0;
    }

    /// Samples currently held in the carry-over buffer.
    pub fn pending_samples(&self) -> usize {
        self.pending.len() - self.consumed
    }

    /// Total feature vectors produced by [`next_frame`](Self::next_frame) /
    /// [`process`](Self::process).
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Length of every [`FeatureVector`].
    pub fn num_mels(&self) -> usize {
        self.config.num_mels
    }

    /// Configuration this extractor was built with.
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// The mel filterbank in use.
    pub fn filterbank(&self) -> &MelFilterbank {
        &self.analyzer.filterbank
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
