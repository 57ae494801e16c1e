//! Audio capture: device discovery → real-time callback → lock-free ring.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → FrameSink::deliver (downmix to mono)
//!           → RingProducer ──▶ RingConsumer → CaptureEngine::read_chunk
//! ```
//!
//! The callback thread only ever touches the producer half of the ring. The
//! application thread owns the consumer half through [`CaptureEngine`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mel_capture::audio::CaptureEngine;
//! use mel_capture::config::CaptureConfig;
//!
//! let mut engine = CaptureEngine::new();
//! engine.init(&CaptureConfig::default()).unwrap();
//! engine.start().unwrap();
//!
//! let mut chunk = [0.0_f32; 1024];
//! while !engine.read_chunk(&mut chunk) {
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! engine.stop();
//! ```

pub mod buffer;
pub mod capture;
pub mod device;

pub use buffer::{RingBuffer, RingBufferError, RingConsumer, RingProducer};
pub use capture::{CaptureEngine, CaptureError, CaptureState, FrameSink};
pub use device::{
    enumerate_devices, enumerate_devices_with, AudioBackend, CaptureDevice, CpalBackend,
    CpalStream, InputStream, StreamFormat,
};
