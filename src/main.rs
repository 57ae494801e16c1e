//! Application entry point: mel-capture.
//!
//! # Startup sequence
//!
//! 1. Parse command-line arguments.
//! 2. Initialise logging (stderr; stdout carries feature rows only).
//! 3. Load [`AppConfig`] from disk (returns default on first run) and apply
//!    command-line overrides.
//! 4. `--list-devices` / `--write-default-config` act and exit.
//! 5. Open the capture device, start it, and run a [`CaptureSession`] for the
//!    requested duration, printing one comma-separated row per feature vector.

use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mel_capture::{
    audio::{enumerate_devices, CaptureEngine},
    config::{AppConfig, AppPaths},
    features::{FeatureExtractor, FeatureVector},
    pipeline::CaptureSession,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Settings file to use instead of the platform config directory.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Capture device index (see --list-devices).
    #[arg(short = 'd', long = "device")]
    device: Option<usize>,

    /// Recording length in seconds.
    #[arg(short = 's', long = "seconds")]
    seconds: Option<f32>,

    /// Print available capture devices and exit.
    #[arg(short = 'l', long = "list-devices")]
    list_devices: bool,

    /// Write the default settings file and exit.
    #[arg(long = "write-default-config")]
    write_default_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings_file = args
        .config
        .clone()
        .unwrap_or_else(|| AppPaths::new().settings_file);

    if args.write_default_config {
        AppConfig::default().save_to(&settings_file)?;
        log::info!("wrote default settings to {}", settings_file.display());
        return Ok(());
    }

    if args.list_devices {
        for device in enumerate_devices() {
            println!("[{}] {}", device.index, device.name);
        }
        return Ok(());
    }

    let mut config = AppConfig::load_from(&settings_file).unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    apply_overrides(&mut config, &args);

    record(&config)
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(device) = args.device {
        config.capture.device_index = device;
    }
    if let Some(seconds) = args.seconds {
        config.session.record_secs = seconds;
    }
    if config.features.sample_rate != config.capture.sample_rate {
        log::warn!(
            "feature sample rate {} Hz differs from capture rate {} Hz; using the capture rate",
            config.features.sample_rate,
            config.capture.sample_rate
        );
        config.features.sample_rate = config.capture.sample_rate;
    }
}

fn record(config: &AppConfig) -> Result<()> {
    let extractor =
        FeatureExtractor::new(&config.features).context("invalid feature settings")?;

    let mut engine = CaptureEngine::new();
    engine
        .init(&config.capture)
        .context("failed to open capture device")?;
    engine.start().context("failed to start capture")?;
    log::info!(
        "recording {:.1} s from device {}",
        config.session.record_secs,
        config.capture.device_index
    );

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut session = CaptureSession::new(&config.session, extractor);
    let result = session.run(&mut engine, config.record_frames(), |vector| {
        write_row(&mut out, &vector)
    });
    engine.stop();

    result.context("capture session failed")?;
    out.flush().context("failed to write feature rows")?;
    Ok(())
}

fn write_row(out: &mut impl Write, vector: &FeatureVector) -> std::io::Result<()> {
    let mut values = vector.iter();
    if let Some(first) = values.next() {
        write!(out, "{first}")?;
    }
    for value in values {
        write!(out, ",{value}")?;
    }
    writeln!(out)
}
