//! Live mono audio capture → lock-free ring buffer → mel-spectrogram features.
//!
//! * [`audio`]: device discovery, the real-time capture engine and the SPSC
//!   ring buffer bridging the audio thread to the application thread.
//! * [`features`]: Hann window, mel filterbank and the streaming
//!   [`FeatureExtractor`](features::FeatureExtractor).
//! * [`pipeline`]: [`CaptureSession`](pipeline::CaptureSession), the consumer
//!   loop joining the two.
//! * [`config`]: TOML-backed settings.

pub mod audio;
pub mod config;
pub mod features;
pub mod pipeline;
