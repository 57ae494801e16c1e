//! Capture device discovery and the platform audio backend seam.
//!
//! [`AudioBackend`] is the one place the crate touches the platform audio
//! subsystem. [`CpalBackend`] implements it on top of `cpal`; tests supply
//! their own implementation so the capture engine can be driven without
//! hardware.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::capture::{CaptureError, FrameSink};

// ---------------------------------------------------------------------------
// CaptureDevice
// ---------------------------------------------------------------------------

/// An input device as reported by the audio subsystem.
///
/// Only meaningful for the enumeration it came from: indices can shift when
/// devices are plugged or unplugged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    /// Position in the enumeration, used to select the device.
    pub index: usize,
    /// Human-readable device name.
    pub name: String,
}

/// Sample format requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channels per frame.
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// Backend traits
// ---------------------------------------------------------------------------

/// A stream opened by an [`AudioBackend`]. Dropping it closes the device.
pub trait InputStream {
    /// Begin (or resume) delivering callbacks.
    fn play(&self) -> Result<(), CaptureError>;

    /// Stop delivering callbacks.
    fn pause(&self) -> Result<(), CaptureError>;
}

/// Platform audio subsystem.
pub trait AudioBackend {
    type Stream: InputStream;

    /// List capture devices in a stable order.
    ///
    /// # Errors
    ///
    /// [`CaptureError::ContextFailure`] when the subsystem cannot be queried.
    fn input_devices(&self) -> Result<Vec<CaptureDevice>, CaptureError>;

    /// Open device `device_index` with `format`, routing every hardware
    /// buffer to `sink.deliver`.
    ///
    /// The returned stream should be paused; the engine calls
    /// [`InputStream::play`] on `start()`.
    fn open_input(
        &self,
        device_index: usize,
        format: StreamFormat,
        sink: FrameSink,
    ) -> Result<Self::Stream, CaptureError>;
}

/// Enumerate capture devices on the default `cpal` host.
///
/// Never fails: a subsystem error is logged and reported as an empty list.
/// Use [`AudioBackend::input_devices`] when the cause matters.
///
/// ```rust,no_run
/// for device in mel_capture::audio::enumerate_devices() {
///     println!("[{}] {}", device.index, device.name);
/// }
/// ```
pub fn enumerate_devices() -> Vec<CaptureDevice> {
    enumerate_devices_with(&CpalBackend::new())
}

/// [`enumerate_devices`] against an explicit backend.
pub fn enumerate_devices_with<B: AudioBackend>(backend: &B) -> Vec<CaptureDevice> {
    backend.input_devices().unwrap_or_else(|err| {
        log::warn!("device enumeration failed: {err}");
        Vec::new()
    })
}

// ---------------------------------------------------------------------------
// CpalBackend
// ---------------------------------------------------------------------------

/// [`AudioBackend`] built on a `cpal` host.
pub struct CpalBackend {
    host: cpal::Host,
}

impl CpalBackend {
    /// Use the platform's default host (WASAPI, CoreAudio, ALSA, …).
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard around a `cpal::Stream`; dropping it releases the device.
pub struct CpalStream {
    stream: cpal::Stream,
}

impl InputStream for CpalStream {
    fn play(&self) -> Result<(), CaptureError> {
        self.stream.play()?;
        Ok(())
    }

    fn pause(&self) -> Result<(), CaptureError> {
        self.stream.pause()?;
        Ok(())
    }
}

impl AudioBackend for CpalBackend {
    type Stream = CpalStream;

    fn input_devices(&self) -> Result<Vec<CaptureDevice>, CaptureError> {
        let devices = self.host.input_devices()?;
        Ok(devices
            .enumerate()
            .map(|(index, device)| CaptureDevice {
                index,
                name: device
                    .name()
                    .unwrap_or_else(|_| format!("input device {index}")),
            })
            .collect())
    }

    fn open_input(
        &self,
        device_index: usize,
        format: StreamFormat,
        mut sink: FrameSink,
    ) -> Result<CpalStream, CaptureError> {
        let mut devices: Vec<cpal::Device> = self.host.input_devices()?.collect();
        let available = devices.len();
        if device_index >= available {
            return Err(CaptureError::DeviceNotFound {
                index: device_index,
                available,
            });
        }
        let device = devices.swap_remove(device_index);
        let name = device.name().unwrap_or_else(|_| "<unnamed>".into());

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| sink.deliver(data),
            |err: cpal::StreamError| {
                log::error!("cpal stream error: {err}");
            },
            None, // no timeout
        )?;

        // Some hosts start streams as soon as they are built.
        if let Err(err) = stream.pause() {
            log::debug!("could not pause freshly opened stream: {err}");
        }

        log::info!(
            "opened input device [{device_index}] {name} at {} Hz, {} ch",
            format.sample_rate,
            format.channels
        );
        Ok(CpalStream { stream })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
