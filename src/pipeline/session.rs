//! Consumer loop: capture engine → feature extractor → caller sink.
//!
//! [`CaptureSession`] runs on the application thread. It pulls fixed-size
//! chunks with [`CaptureEngine::read_chunk`], sleeps `poll_interval` whenever
//! a chunk is not complete yet, feeds every chunk to the
//! [`FeatureExtractor`] and hands each resulting vector to the sink in
//! stream order. The first sink error ends the run.
//!
//! ```text
//! loop until total_frames read:
//!   read_chunk(chunk) ──false──▶ sleep(poll_interval), check stall timeout
//!          │
//!         true
//!          ▼
//!   extractor.process(chunk) ──▶ sink(vector)? for each vector
//! ```

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::audio::{AudioBackend, CaptureEngine};
use crate::config::SessionConfig;
use crate::features::{FeatureExtractor, FeatureVector};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("capture engine is not running")]
    NotRunning,

    #[error("no audio for {waited:?} after {frames_read} frames")]
    Stalled { waited: Duration, frames_read: usize },

    #[error("feature sink failed after {frames_read} frames: {source}")]
    Sink {
        frames_read: usize,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

// ---------------------------------------------------------------------------
// SessionSummary
// ---------------------------------------------------------------------------

/// What a completed [`CaptureSession::run`] consumed and produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSummary {
    /// Frames read from the capture engine.
    pub frames_read: usize,
    /// Feature vectors handed to the sink.
    pub vectors: usize,
    /// Frames the callback dropped because the ring was full, over the
    /// engine's whole lifetime.
    pub dropped_frames: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// CaptureSession
// ---------------------------------------------------------------------------

pub struct CaptureSession {
    extractor: FeatureExtractor,
    chunk: Vec<f32>,
    poll_interval: Duration,
    /// `None` waits forever.
    stall_timeout: Option<Duration>,
}

impl CaptureSession {
    /// A session reading `config.chunk_frames` frames at a time.
    ///
    /// A `stall_timeout_ms` of 0 disables the stall check.
    pub fn new(config: &SessionConfig, extractor: FeatureExtractor) -> Self {
        let stall_timeout =
            (config.stall_timeout_ms > 0).then(|| Duration::from_millis(config.stall_timeout_ms));
        Self {
            extractor,
            chunk: vec![0.0; config.chunk_frames.max(1)],
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            stall_timeout,
        }
    }

    /// Read exactly `total_frames` frames from `engine`, calling `sink` with
    /// every feature vector they complete.
    ///
    /// The last read is shortened so that no more than `total_frames` frames
    /// are consumed. Samples left over in the extractor's carry-over buffer
    /// stay there for the next run.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotRunning`] if the engine has not been started;
    /// [`SessionError::Stalled`] if no chunk completes within the stall
    /// timeout; [`SessionError::Sink`] as soon as `sink` returns an error.
    pub fn run<B, F, E>(
        &mut self,
        engine: &mut CaptureEngine<B>,
        total_frames: usize,
        mut sink: F,
    ) -> Result<SessionSummary, SessionError>
    where
        B: AudioBackend,
        F: FnMut(FeatureVector) -> Result<(), E>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        if !engine.is_running() {
            return Err(SessionError::NotRunning);
        }

        let started = Instant::now();
        let mut last_progress = started;
        let mut frames_read = 0usize;
        let mut vectors = 0usize;

        while frames_read < total_frames {
            let want = self.chunk.len().min(total_frames - frames_read);
            let chunk = &mut self.chunk[..want];

            if !engine.read_chunk(chunk) {
                if let Some(timeout) = self.stall_timeout {
                    let waited = last_progress.elapsed();
                    if waited >= timeout {
                        log::warn!("capture stalled after {frames_read} frames");
                        return Err(SessionError::Stalled {
                            waited,
                            frames_read,
                        });
                    }
                }
                std::thread::sleep(self.poll_interval);
                continue;
            }

            last_progress = Instant::now();
            frames_read += want;
            self.extractor.push_samples(chunk);
            while let Some(vector) = self.extractor.next_frame() {
                vectors += 1;
                if let Err(err) = sink(vector) {
                    let source: Box<dyn StdError + Send + Sync> = err.into();
                    log::warn!("feature sink failed, ending session: {source}");
                    return Err(SessionError::Sink {
                        frames_read,
                        source,
                    });
                }
            }
        }

        let summary = SessionSummary {
            frames_read,
            vectors,
            dropped_frames: engine.dropped_frames(),
            elapsed: started.elapsed(),
        };
        if summary.dropped_frames > 0 {
            log::warn!("{} frames dropped on ring overrun", summary.dropped_frames);
        }
        log::info!(
            "session: {} frames → {} vectors in {:.2?}",
            summary.frames_read,
            summary.vectors,
            summary.elapsed
        );
        Ok(summary)
    }

    /// The extractor fed by this session.
    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
