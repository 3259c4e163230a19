//! Edgecam: webcam viewer CLI.

use anyhow::{Context, Result};
use clap::Parser;
use edgecam::capture::{CaptureBackend, NokhwaCapture};
use edgecam::config::Config;
use edgecam::output::{WindowConfig, WindowOutput};
use edgecam::pipeline::{build_processor, Variant};
use edgecam::runner::CaptureLoop;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Webcam viewer showing grayscale or filled-contour frames.
#[derive(Parser, Debug)]
#[command(name = "edgecam")]
#[command(about = "Show the webcam in grayscale or with its outer contours filled")]
struct Args {
    /// Camera device index (default 0)
    #[arg(short, long)]
    input: Option<u32>,

    /// Processing pipeline (default contours)
    #[arg(short, long, value_enum)]
    variant: Option<Variant>,

    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after displaying this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// List available cameras and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    /// Loads the config file, if any, and applies command line overrides.
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading config from {:?}", path);
                Config::load(path)?
            }
            None => Config::default(),
        };
        if let Some(input) = self.input {
            config.device_index = input;
        }
        if let Some(variant) = self.variant {
            config.variant = variant;
        }
        if self.max_frames.is_some() {
            config.max_frames = self.max_frames;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if args.list_devices {
        println!("Available cameras:");
        for device in NokhwaCapture::list_devices()? {
            println!("  [{}] {}", device.index, device.name);
        }
        return Ok(());
    }

    let config = args.resolve_config()?;

    // Ctrl-C stops the loop like the quit key does.
    let stop_requested = Arc::new(AtomicBool::new(false));
    let stop = stop_requested.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        stop.store(true, Ordering::SeqCst);
    })?;

    info!("Opening camera device {}...", config.device_index);
    let capture = NokhwaCapture::open(config.capture_config())
        .with_context(|| format!("Cannot open camera {}", config.device_index))?;
    let (width, height) = capture.frame_size();

    let output = WindowOutput::open(WindowConfig {
        title: config.window_title(),
        width,
        height,
    })?;

    let processor = build_processor(config.variant, config.contour_params());
    info!(
        "Press '{}' in the \"{}\" window to quit",
        config.quit_key,
        output.title()
    );

    let stats = CaptureLoop::new(capture, output, processor, config.loop_settings())
        .with_stop_flag(stop_requested)
        .run()?;

    info!("Displayed {} frames", stats.frames_displayed);
    Ok(())
}
