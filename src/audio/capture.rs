//! Real-time capture engine.
//!
//! [`CaptureEngine`] owns one input stream and one [`RingBuffer`]. The audio
//! subsystem calls [`FrameSink::deliver`] on its own thread for every
//! hardware buffer; the sink copies the frames into the ring and nothing
//! else. The application thread pulls fixed-size chunks back out with
//! [`CaptureEngine::read_chunk`].
//!
//! ```text
//! Uninitialized ──init()──▶ Initialized ──start()──▶ Running ──stop()──▶ Stopped
//!       │                                               ▲                  │
//!       └──init() error──▶ Failed                       └─────start()──────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use mel_capture::audio::{enumerate_devices, CaptureEngine};
//! use mel_capture::config::CaptureConfig;
//!
//! let devices = enumerate_devices();
//! let config = CaptureConfig { device_index: devices[0].index, ..Default::default() };
//!
//! let mut engine = CaptureEngine::new();
//! engine.init(&config).unwrap();
//! engine.start().unwrap();
//!
//! let mut chunk = vec![0.0_f32; 1024];
//! loop {
//!     if engine.read_chunk(&mut chunk) {
//!         // a complete 1024-frame chunk
//!     } else {
//!         std::thread::sleep(std::time::Duration::from_millis(10));
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use super::buffer::{RingBuffer, RingBufferError, RingConsumer, RingProducer};
use super::device::{AudioBackend, CpalBackend, InputStream, StreamFormat};
use crate::config::CaptureConfig;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or driving the capture engine.
///
/// None of these ever cross the real-time callback.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("audio subsystem unavailable: {0}")]
    ContextFailure(#[from] cpal::DevicesError),

    #[error("ring buffer initialisation failed: {0}")]
    RingBufferInit(#[from] RingBufferError),

    #[error("capture device {index} not found ({available} available)")]
    DeviceNotFound { index: usize, available: usize },

    #[error("unsupported stream format: {sample_rate} Hz, {channels} channels")]
    UnsupportedFormat { sample_rate: u32, channels: u16 },

    #[error("failed to open capture device: {0}")]
    DeviceOpenFailure(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("failed to pause audio stream: {0}")]
    Pause(#[from] cpal::PauseStreamError),

    #[error("capture engine is not initialized")]
    NotInitialized,

    #[error("capture engine is already initialized")]
    AlreadyInitialized,
}

// ---------------------------------------------------------------------------
// CaptureState
// ---------------------------------------------------------------------------

/// Lifecycle of a [`CaptureEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// Nothing acquired yet.
    #[default]
    Uninitialized,
    /// Device open and ring allocated; callbacks are discarded.
    Initialized,
    /// Callbacks are written into the ring.
    Running,
    /// Halted after running; `start()` resumes.
    Stopped,
    /// The last `init()` failed and released everything it had acquired.
    Failed,
}

impl CaptureState {
    /// A short human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            CaptureState::Uninitialized => "Uninitialized",
            CaptureState::Initialized => "Initialized",
            CaptureState::Running => "Running",
            CaptureState::Stopped => "Stopped",
            CaptureState::Failed => "Failed",
        }
    }
}

// ---------------------------------------------------------------------------
// CallbackGate
// ---------------------------------------------------------------------------

/// Lets the control thread switch the callback on and off, and wait until a
/// callback already in flight has finished.
#[derive(Default)]
struct CallbackGate {
    open: AtomicBool,
    in_callback: AtomicBool,
}

impl CallbackGate {
    fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Close the gate. On return no callback is writing, and none will
    /// until the gate is opened again.
    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        while self.in_callback.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }
    }
}

// ---------------------------------------------------------------------------
// FrameSink
// ---------------------------------------------------------------------------

/// The real-time half of the engine, moved into the audio callback.
///
/// [`deliver`](Self::deliver) performs no allocation, no locking and no
/// logging. Frames that do not fit in the ring, or that arrive while the
/// engine is not running, are silently dropped.
pub struct FrameSink {
    producer: RingProducer,
    gate: Arc<CallbackGate>,
    channels: usize,
}

impl FrameSink {
    fn new(producer: RingProducer, gate: Arc<CallbackGate>, channels: u16) -> Self {
        Self {
            producer,
            gate,
            channels: usize::from(channels.max(1)),
        }
    }

    /// Callback entry point: copy one hardware buffer of interleaved `f32`
    /// samples into the ring as mono frames.
    pub fn deliver(&mut self, interleaved: &[f32]) {
        self.gate.in_callback.store(true, Ordering::SeqCst);
        if self.gate.open.load(Ordering::SeqCst) {
            self.producer.push_downmixed(interleaved, self.channels);
        }
        self.gate.in_callback.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// CaptureEngine
// ---------------------------------------------------------------------------

/// Capture device + ring buffer + chunked, non-blocking read API.
pub struct CaptureEngine<B: AudioBackend = CpalBackend> {
    backend: B,
    state: CaptureState,
    // Dropped before `consumer`: device first, then buffer.
    stream: Option<B::Stream>,
    consumer: Option<RingConsumer>,
    gate: Arc<CallbackGate>,
}

impl CaptureEngine<CpalBackend> {
    /// Engine on the default `cpal` host.
    pub fn new() -> Self {
        Self::with_backend(CpalBackend::new())
    }
}

impl Default for CaptureEngine<CpalBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AudioBackend> CaptureEngine<B> {
    /// Engine on an explicit backend.
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            state: CaptureState::Uninitialized,
            stream: None,
            consumer: None,
            gate: Arc::new(CallbackGate::default()),
        }
    }

    /// Validate the device index, allocate the ring and open the device.
    ///
    /// Allowed from `Uninitialized` or `Failed`. On error everything
    /// acquired so far is released and the engine moves to `Failed`.
    ///
    /// # Errors
    ///
    /// [`CaptureError::ContextFailure`], [`CaptureError::DeviceNotFound`],
    /// [`CaptureError::UnsupportedFormat`], [`CaptureError::RingBufferInit`]
    /// or [`CaptureError::DeviceOpenFailure`]; [`CaptureError::AlreadyInitialized`]
    /// when called in any other state.
    pub fn init(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        match self.state {
            CaptureState::Uninitialized | CaptureState::Failed => {}
            _ => return Err(CaptureError::AlreadyInitialized),
        }

        match self.open(config) {
            Ok((stream, consumer)) => {
                self.stream = Some(stream);
                self.consumer = Some(consumer);
                self.state = CaptureState::Initialized;
                log::debug!("capture engine initialized");
                Ok(())
            }
            Err(err) => {
                self.state = CaptureState::Failed;
                log::warn!("capture engine init failed: {err}");
                Err(err)
            }
        }
    }

    fn open(&self, config: &CaptureConfig) -> Result<(B::Stream, RingConsumer), CaptureError> {
        let devices = self.backend.input_devices()?;
        if config.device_index >= devices.len() {
            return Err(CaptureError::DeviceNotFound {
                index: config.device_index,
                available: devices.len(),
            });
        }
        if config.sample_rate == 0 || config.channels == 0 {
            return Err(CaptureError::UnsupportedFormat {
                sample_rate: config.sample_rate,
                channels: config.channels,
            });
        }

        let (producer, consumer) = RingBuffer::new(config.ring_capacity_frames())?.split();
        let sink = FrameSink::new(producer, Arc::clone(&self.gate), config.channels);
        let format = StreamFormat {
            sample_rate: config.sample_rate,
            channels: config.channels,
        };

        // On failure `consumer` (and the sink's producer) drop here,
        // releasing the ring.
        let stream = self.backend.open_input(config.device_index, format, sink)?;
        Ok((stream, consumer))
    }

    /// Begin writing callbacks into the ring.
    ///
    /// A no-op while already running.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NotInitialized`] unless `Initialized` or `Stopped`;
    /// [`CaptureError::Play`] if the device refuses to start.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        match self.state {
            CaptureState::Running => return Ok(()),
            CaptureState::Initialized | CaptureState::Stopped => {}
            _ => return Err(CaptureError::NotInitialized),
        }
        let stream = self.stream.as_ref().ok_or(CaptureError::NotInitialized)?;

        self.gate.open();
        if let Err(err) = stream.play() {
            self.gate.close();
            return Err(err);
        }
        log::debug!("capture engine {} -> Running", self.state.label());
        self.state = CaptureState::Running;
        Ok(())
    }

    /// Halt the callback.
    ///
    /// On return no further frames will be written into the ring. A no-op
    /// unless running.
    pub fn stop(&mut self) {
        if self.state != CaptureState::Running {
            return;
        }
        self.gate.close();
        if let Some(stream) = &self.stream {
            if let Err(err) = stream.pause() {
                // The gate is already closed; only the hardware keeps running.
                log::warn!("failed to pause capture stream: {err}");
            }
        }
        self.state = CaptureState::Stopped;
        log::debug!("capture engine stopped");
    }

    /// Fill `out` with exactly `out.len()` frames, or consume nothing.
    ///
    /// Returns `false` when fewer frames are buffered than requested, when
    /// `out` is empty, or when the engine was never initialized; callers
    /// treat every `false` as "retry later". Never blocks.
    pub fn read_chunk(&mut self, out: &mut [f32]) -> bool {
        match self.consumer.as_mut() {
            Some(consumer) => consumer.pop_exact(out),
            None => false,
        }
    }

    /// Frames buffered and not yet read.
    pub fn frames_available(&self) -> usize {
        self.consumer.as_ref().map_or(0, RingConsumer::available_read)
    }

    /// Frames discarded because the ring was full.
    pub fn dropped_frames(&self) -> u64 {
        self.consumer.as_ref().map_or(0, RingConsumer::dropped_frames)
    }

    /// Ring capacity in frames, 0 before a successful `init()`.
    pub fn capacity(&self) -> usize {
        self.consumer.as_ref().map_or(0, RingConsumer::capacity)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// `true` while callbacks are being written into the ring.
    pub fn is_running(&self) -> bool {
        self.state == CaptureState::Running
    }
}

impl<B: AudioBackend> Drop for CaptureEngine<B> {
    fn drop(&mut self) {
        self.stop();
        // Device, then buffer.
        drop(self.stream.take());
        drop(self.consumer.take());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::device::CaptureDevice;
    use std::sync::Mutex;

    /// In-memory backend: hands the opened [`FrameSink`] back to the test so
    /// it can play the role of the audio thread.
    #[derive(Clone, Default)]
    pub(crate) struct FakeBackend {
        pub devices: Vec<String>,
        pub fail_context: bool,
        pub fail_open: bool,
        pub sink: Arc<Mutex<Option<FrameSink>>>,
        pub playing: Arc<AtomicBool>,
        pub opened_format: Arc<Mutex<Option<StreamFormat>>>,
    }

    impl FakeBackend {
        pub fn with_devices(names: &[&str]) -> Self {
            Self {
                devices: names.iter().map(|n| n.to_string()).collect(),
                ..Self::default()
            }
        }

        /// Simulate one hardware callback.
        pub fn deliver(&self, interleaved: &[f32]) {
            let mut sink = self.sink.lock().unwrap();
            sink.as_mut().expect("stream not opened").deliver(interleaved);
        }
    }

    pub(crate) struct FakeStream {
        playing: Arc<AtomicBool>,
    }

    impl InputStream for FakeStream {
        fn play(&self) -> Result<(), CaptureError> {
            self.playing.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn pause(&self) -> Result<(), CaptureError> {
            self.playing.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    impl AudioBackend for FakeBackend {
        type Stream = FakeStream;

        fn input_devices(&self) -> Result<Vec<CaptureDevice>, CaptureError> {
            if self.fail_context {
                return Err(CaptureError::ContextFailure(
                    cpal::DevicesError::BackendSpecific {
                        err: cpal::BackendSpecificError {
                            description: "fake context failure".into(),
                        },
                    },
                ));
            }
            Ok(self
                .devices
                .iter()
                .enumerate()
                .map(|(index, name)| CaptureDevice {
                    index,
                    name: name.clone(),
                })
                .collect())
        }

        fn open_input(
            &self,
            _device_index: usize,
            format: StreamFormat,
            sink: FrameSink,
        ) -> Result<FakeStream, CaptureError> {
            if self.fail_open {
                return Err(CaptureError::DeviceOpenFailure(
                    cpal::BuildStreamError::StreamConfigNotSupported,
                ));
            }
            *self.sink.lock().unwrap() = Some(sink);
            *self.opened_format.lock().unwrap() = Some(format);
            Ok(FakeStream {
                playing: Arc::clone(&self.playing),
            })
        }
    }

    fn small_config() -> CaptureConfig {
        CaptureConfig {
            device_index: 1,
            sample_rate: 1_000,
            channels: 1,
            ring_capacity_secs: 1.0,
        }
    }

    fn running_engine() -> (CaptureEngine<FakeBackend>, FakeBackend) {
        let backend = FakeBackend::with_devices(&["Built-in", "USB Mic"]);
        let mut engine = CaptureEngine::with_backend(backend.clone());
        engine.init(&small_config()).expect("init");
        engine.start().expect("start");
        (engine, backend)
    }

    // ---- init --------------------------------------------------------------

    #[test]
    fn init_opens_requested_format() {
        let backend = FakeBackend::with_devices(&["Built-in", "USB Mic"]);
        let mut engine = CaptureEngine::with_backend(backend.clone());
        assert_eq!(engine.state(), CaptureState::Uninitialized);

        engine.init(&small_config()).expect("init");
        assert_eq!(engine.state(), CaptureState::Initialized);
        assert_eq!(engine.capacity(), 1_000);
        assert_eq!(
            *backend.opened_format.lock().unwrap(),
            Some(StreamFormat {
                sample_rate: 1_000,
                channels: 1
            })
        );
        assert!(!backend.playing.load(Ordering::SeqCst));
    }

    #[test]
    fn out_of_range_device_is_not_found() {
        let backend = FakeBackend::with_devices(&["Built-in"]);
        let mut engine = CaptureEngine::with_backend(backend.clone());

        let err = engine.init(&small_config()).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::DeviceNotFound {
                index: 1,
                available: 1
            }
        ));
        assert_eq!(engine.state(), CaptureState::Failed);
        assert!(backend.sink.lock().unwrap().is_none());
    }

    #[test]
    fn context_failure_is_reported() {
        let backend = FakeBackend {
            fail_context: true,
            ..FakeBackend::with_devices(&["Built-in", "USB Mic"])
        };
        let mut engine = CaptureEngine::with_backend(backend);
        assert!(matches!(
            engine.init(&small_config()),
            Err(CaptureError::ContextFailure(_))
        ));
    }

    #[test]
    fn zero_capacity_is_a_ring_buffer_failure() {
        let backend = FakeBackend::with_devices(&["Built-in", "USB Mic"]);
        let mut engine = CaptureEngine::with_backend(backend);
        let config = CaptureConfig {
            ring_capacity_secs: 0.0,
            ..small_config()
        };
        assert!(matches!(
            engine.init(&config),
            Err(CaptureError::RingBufferInit(RingBufferError::ZeroCapacity))
        ));
        assert_eq!(engine.capacity(), 0);
    }

    #[test]
    fn open_failure_releases_everything_and_allows_retry() {
        let mut backend = FakeBackend::with_devices(&["Built-in", "USB Mic"]);
        backend.fail_open = true;
        let mut engine = CaptureEngine::with_backend(backend);

        assert!(matches!(
            engine.init(&small_config()),
            Err(CaptureError::DeviceOpenFailure(_))
        ));
        assert_eq!(engine.state(), CaptureState::Failed);
        assert_eq!(engine.capacity(), 0);
        assert!(!engine.read_chunk(&mut [0.0; 4]));
        assert!(matches!(engine.start(), Err(CaptureError::NotInitialized)));

        // A later init on a working backend succeeds from Failed.
        let mut retry = CaptureEngine::with_backend(FakeBackend::with_devices(&["A", "B"]));
        assert!(retry.init(&small_config()).is_ok());
    }

    #[test]
    fn double_init_is_rejected() {
        let (mut engine, _backend) = running_engine();
        assert!(matches!(
            engine.init(&small_config()),
            Err(CaptureError::AlreadyInitialized)
        ));
        assert_eq!(engine.state(), CaptureState::Running);
    }

    // ---- start / stop ------------------------------------------------------

    #[test]
    fn start_requires_init() {
        let mut engine = CaptureEngine::with_backend(FakeBackend::with_devices(&["A"]));
        assert!(matches!(engine.start(), Err(CaptureError::NotInitialized)));
        engine.stop(); // no-op
        assert_eq!(engine.state(), CaptureState::Uninitialized);
    }

    #[test]
    fn callbacks_before_start_are_discarded() {
        let backend = FakeBackend::with_devices(&["Built-in", "USB Mic"]);
        let mut engine = CaptureEngine::with_backend(backend.clone());
        engine.init(&small_config()).expect("init");

        backend.deliver(&[0.5; 100]);
        assert_eq!(engine.frames_available(), 0);

        engine.start().expect("start");
        backend.deliver(&[0.5; 100]);
        assert_eq!(engine.frames_available(), 100);
        assert!(backend.playing.load(Ordering::SeqCst));
    }

    #[test]
    fn no_writes_after_stop_and_restart_resumes() {
        let (mut engine, backend) = running_engine();
        backend.deliver(&[0.1; 100]);

        engine.stop();
        assert_eq!(engine.state(), CaptureState::Stopped);
        assert!(!backend.playing.load(Ordering::SeqCst));
        backend.deliver(&[0.2; 100]);
        assert_eq!(engine.frames_available(), 100);

        engine.start().expect("restart");
        assert_eq!(engine.state(), CaptureState::Running);
        backend.deliver(&[0.3; 50]);
        assert_eq!(engine.frames_available(), 150);

        let mut out = [0.0_f32; 150];
        assert!(engine.read_chunk(&mut out));
        assert!(out[..100].iter().all(|&s| s == 0.1));
        assert!(out[100..].iter().all(|&s| s == 0.3));
    }

    #[test]
    fn stop_fences_off_a_concurrent_callback() {
        let backend = FakeBackend::with_devices(&["Built-in", "USB Mic"]);
        let mut engine = CaptureEngine::with_backend(backend.clone());
        let config = CaptureConfig {
            sample_rate: 48_000,
            ..small_config()
        };
        engine.init(&config).expect("init");

        let done = Arc::new(AtomicBool::new(false));
        let feeder = {
            let backend = backend.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    backend.deliver(&[0.1; 16]);
                }
            })
        };

        let mut drain = vec![0.0_f32; engine.capacity()];
        for _ in 0..50 {
            engine.start().expect("start");
            while engine.frames_available() == 0 {
                std::thread::yield_now();
            }

            engine.stop();
            let after_stop = engine.frames_available();
            std::thread::sleep(std::time::Duration::from_millis(2));
            assert_eq!(engine.frames_available(), after_stop);

            // With the ring emptied, any late write would show up.
            assert!(engine.read_chunk(&mut drain[..after_stop]));
            std::thread::sleep(std::time::Duration::from_millis(1));
            assert_eq!(engine.frames_available(), 0);
        }

        done.store(true, Ordering::Relaxed);
        feeder.join().expect("feeder");
    }

    #[test]
    fn start_while_running_is_a_no_op() {
        let (mut engine, _backend) = running_engine();
        assert!(engine.start().is_ok());
        assert!(engine.is_running());
    }

    // ---- read_chunk --------------------------------------------------------

    #[test]
    fn read_chunk_is_all_or_nothing() {
        let (mut engine, backend) = running_engine();
        let samples: Vec<f32> = (0..300).map(|i| i as f32).collect();
        backend.deliver(&samples);

        let mut too_big = vec![0.0_f32; 301];
        assert!(!engine.read_chunk(&mut too_big));
        assert_eq!(engine.frames_available(), 300);

        let mut exact = vec![0.0_f32; 300];
        assert!(engine.read_chunk(&mut exact));
        assert_eq!(exact, samples);
        assert_eq!(engine.frames_available(), 0);
    }

    #[test]
    fn read_chunk_before_init_fails() {
        let mut engine = CaptureEngine::with_backend(FakeBackend::with_devices(&["A"]));
        assert!(!engine.read_chunk(&mut [0.0; 16]));
        assert_eq!(engine.frames_available(), 0);
    }

    #[test]
    fn overrun_drops_newest_and_counts() {
        let (mut engine, backend) = running_engine();
        backend.deliver(&[1.0; 900]);
        backend.deliver(&[2.0; 200]); // only 100 fit

        assert_eq!(engine.frames_available(), 1_000);
        assert_eq!(engine.dropped_frames(), 100);

        let mut out = vec![0.0_f32; 1_000];
        assert!(engine.read_chunk(&mut out));
        assert!(out[..900].iter().all(|&s| s == 1.0));
        assert!(out[900..].iter().all(|&s| s == 2.0));
    }

    #[test]
    fn stereo_input_is_downmixed() {
        let backend = FakeBackend::with_devices(&["Built-in", "USB Mic"]);
        let mut engine = CaptureEngine::with_backend(backend.clone());
        let config = CaptureConfig {
            channels: 2,
            ..small_config()
        };
        engine.init(&config).expect("init");
        engine.start().expect("start");

        backend.deliver(&[1.0, 0.0, 0.25, 0.75]);
        let mut out = [0.0_f32; 2];
        assert!(engine.read_chunk(&mut out));
        assert_eq!(out, [0.5, 0.5]);
    }

    // ---- Concurrency -------------------------------------------------------

    fn free_space(backend: &FakeBackend) -> usize {
        let sink = backend.sink.lock().unwrap();
        sink.as_ref().map_or(0, |s| s.producer.available_write())
    }

    #[test]
    fn callback_thread_feeds_reader_in_order() {
        let (mut engine, backend) = running_engine();
        const TOTAL: usize = 50_000;

        let producer = {
            let backend = backend.clone();
            std::thread::spawn(move || {
                let mut next = 0usize;
                let mut block = [0.0_f32; 64];
                while next < TOTAL {
                    for (i, s) in block.iter_mut().enumerate() {
                        *s = ((next + i) % 1_000) as f32;
                    }
                    let n = 64.min(TOTAL - next);
                    // Leave headroom so nothing is dropped.
                    while free_space(&backend) < n {
                        std::thread::yield_now();
                    }
                    backend.deliver(&block[..n]);
                    next += n;
                }
            })
        };

        let mut expected = 0usize;
        let mut chunk = [0.0_f32; 100];
        while expected < TOTAL {
            if engine.read_chunk(&mut chunk) {
                for &s in &chunk {
                    assert_eq!(s, (expected % 1_000) as f32);
                    expected += 1;
                }
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().expect("producer");
        assert_eq!(engine.dropped_frames(), 0);
    }
}
