//! Spectral feature extraction: raw mono samples → mel-scaled, dB-clamped
//! feature vectors.
//!
//! # Pipeline
//!
//! ```text
//! &[f32] ─▶ FeatureExtractor::process ─▶ Vec<FeatureVector>
//!                 │
//!                 ├─ hann_window      (built once)
//!                 ├─ MelFilterbank    (built once)
//!                 └─ realfft plan     (built once)
//! ```

pub mod extractor;
pub mod mel;

pub use extractor::{FeatureError, FeatureExtractor, FeatureVector};
pub use mel::{hann_window, hz_to_mel, mel_to_hz, MelFilterbank, MelNorm};
