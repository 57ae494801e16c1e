//! Pipeline module: the consumer side of live capture.
//!
//! # Architecture
//!
//! ```text
//! audio thread                      application thread
//! ────────────                      ──────────────────
//! cpal callback                     CaptureSession::run()
//!   └─ FrameSink::deliver ──ring──▶   ├─ CaptureEngine::read_chunk
//!                                     ├─ FeatureExtractor::push_samples / next_frame
//!                                     └─ sink(FeatureVector)
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use mel_capture::audio::CaptureEngine;
//! use mel_capture::config::AppConfig;
//! use mel_capture::features::FeatureExtractor;
//! use mel_capture::pipeline::CaptureSession;
//!
//! let config = AppConfig::default();
//! let mut engine = CaptureEngine::new();
//! engine.init(&config.capture).unwrap();
//! engine.start().unwrap();
//!
//! let extractor = FeatureExtractor::new(&config.features).unwrap();
//! let mut session = CaptureSession::new(&config.session, extractor);
//! let summary = session
//!     .run(&mut engine, config.record_frames(), |v| {
//!         println!("{v:?}");
//!         Ok::<_, std::io::Error>(())
//!     })
//!     .unwrap();
//! println!("{} vectors", summary.vectors);
//! ```

pub mod session;

pub use session::{CaptureSession, SessionError, SessionSummary};
