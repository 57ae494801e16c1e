//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and handed to the capture
//! and feature threads. Missing keys fall back to their defaults, so a
//! settings file only needs to list what it overrides.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::features::MelNorm;

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Settings for opening the capture device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Position of the device in the list returned by
    /// [`crate::audio::enumerate_devices`].
    pub device_index: usize,
    /// Requested hardware sample rate in Hz.
    pub sample_rate: u32,
    /// Requested channel count. Frames are downmixed to mono before they
    /// reach the ring buffer.
    pub channels: u16,
    /// Ring buffer size expressed as seconds of audio.
    pub ring_capacity_secs: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            sample_rate: 48_000,
            channels: 1,
            ring_capacity_secs: 10.0,
        }
    }
}

impl CaptureConfig {
    /// Ring buffer capacity in frames (`sample_rate * ring_capacity_secs`).
    ///
    /// ```
    /// use mel_capture::config::CaptureConfig;
    ///
    /// assert_eq!(CaptureConfig::default().ring_capacity_frames(), 480_000);
    /// ```
    pub fn ring_capacity_frames(&self) -> usize {
        // Negative or NaN durations saturate to 0 and are rejected by the
        // ring buffer.
        (f64::from(self.sample_rate) * f64::from(self.ring_capacity_secs)).round() as usize
    }
}

// ---------------------------------------------------------------------------
// FeatureConfig
// ---------------------------------------------------------------------------

/// Parameters of the mel-spectrogram extractor, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Sample rate of the incoming audio in Hz.
    pub sample_rate: u32,
    /// Analysis window length in samples (a power of two is fastest).
    pub fft_size: usize,
    /// Samples advanced between consecutive windows.
    pub hop_size: usize,
    /// Number of mel bands per feature vector.
    pub num_mels: usize,
    /// Lowest filterbank frequency in Hz.
    pub fmin: f32,
    /// Highest filterbank frequency in Hz. `None` or a negative value means
    /// Nyquist (`sample_rate / 2`).
    pub fmax: Option<f32>,
    /// Dynamic range kept below the loudest band of each frame, in dB.
    pub top_db: f32,
    /// Power floor applied before `log10`.
    pub eps: f32,
    /// Summed absolute amplitude of a window below which it is reported as
    /// silent without running the FFT.
    pub silence_threshold: f32,
    /// Optional per-row normalisation of the mel filterbank.
    pub mel_norm: MelNorm,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            fft_size: 1024,
            hop_size: 512,
            num_mels: 40,
            fmin: 0.0,
            fmax: None,
            top_db: 80.0,
            eps: 1e-10,
            silence_threshold: 1e-4,
            mel_norm: MelNorm::None,
        }
    }
}

impl FeatureConfig {
    /// Upper filterbank edge with the Nyquist default applied.
    pub fn resolved_fmax(&self) -> f32 {
        match self.fmax {
            Some(fmax) if fmax >= 0.0 => fmax,
            _ => self.sample_rate as f32 / 2.0,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Settings for the consumer loop that pulls chunks out of the capture engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Frames requested per `read_chunk` call.
    pub chunk_frames: usize,
    /// Sleep between retries when a chunk is not yet available.
    pub poll_interval_ms: u64,
    /// Give up when no chunk arrives for this long.
    pub stall_timeout_ms: u64,
    /// Length of a recording in seconds.
    pub record_secs: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            poll_interval_ms: 10,
            stall_timeout_ms: 2_000,
            record_secs: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use mel_capture::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture device settings.
    pub capture: CaptureConfig,
    /// Mel-spectrogram settings.
    pub features: FeatureConfig,
    /// Consumer loop settings.
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Number of frames a session of `session.record_secs` should capture.
    pub fn record_frames(&self) -> usize {
        (f64::from(self.capture.sample_rate) * f64::from(self.session.record_secs)).round() as usize
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// A default `AppConfig` survives a TOML round trip unchanged.
    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");
        assert_eq!(original, loaded);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.capture.device_index, 0);
        assert_eq!(cfg.capture.sample_rate, 48_000);
        assert_eq!(cfg.capture.channels, 1);
        assert_eq!(cfg.capture.ring_capacity_frames(), 480_000);

        assert_eq!(cfg.features.fft_size, 1024);
        assert_eq!(cfg.features.hop_size, 512);
        assert_eq!(cfg.features.num_mels, 40);
        assert_eq!(cfg.features.top_db, 80.0);
        assert_eq!(cfg.features.mel_norm, MelNorm::None);
        assert_eq!(cfg.features.resolved_fmax(), 24_000.0);

        assert_eq!(cfg.session.chunk_frames, 1024);
        assert_eq!(cfg.record_frames(), 480_000);
    }

    #[test]
    fn negative_fmax_means_nyquist() {
        let mut cfg = FeatureConfig::default();
        cfg.fmax = Some(-1.0);
        assert_eq!(cfg.resolved_fmax(), 24_000.0);
        cfg.fmax = Some(8_000.0);
        assert_eq!(cfg.resolved_fmax(), 8_000.0);
    }

    /// A partial file only overrides the keys it names.
    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "[capture]\ndevice_index = 3\n\n[features]\nnum_mels = 64\nfmax = 8000.0\n",
        )
        .expect("write");

        let cfg = AppConfig::load_from(&path).expect("load");
        assert_eq!(cfg.capture.device_index, 3);
        assert_eq!(cfg.capture.sample_rate, 48_000);
        assert_eq!(cfg.features.num_mels, 64);
        assert_eq!(cfg.features.fmax, Some(8_000.0));
        assert_eq!(cfg.features.hop_size, 512);
        assert_eq!(cfg.session, SessionConfig::default());
    }

    /// Modified non-default values survive a round trip.
    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.capture.device_index = 5;
        cfg.capture.channels = 2;
        cfg.features.hop_size = 256;
        cfg.features.fmax = Some(12_000.0);
        cfg.features.mel_norm = MelNorm::Area;
        cfg.session.record_secs = 2.5;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.capture.device_index, 5);
        assert_eq!(loaded.capture.channels, 2);
        assert_eq!(loaded.features.hop_size, 256);
        assert_eq!(loaded.features.fmax, Some(12_000.0));
        assert_eq!(loaded.features.mel_norm, MelNorm::Area);
        assert_eq!(loaded.session.record_secs, 2.5);
    }
}
