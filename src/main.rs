//! camfeed CLI: probe the camera and stream frames.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camfeed::camera::{CameraCapture, CameraSettings, Resolution, TryRecvError};
use camfeed::config::Config;
use clap::{Parser, Subcommand};

/// Parse and validate resolution (WIDTHxHEIGHT format)
fn parse_resolution(s: &str) -> Result<Resolution, String> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid resolution format '{}'. Use WIDTHxHEIGHT (e.g., 640x480)",
            s
        ));
    }
    let width: u32 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid width '{}' in resolution", parts[0]))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid height '{}' in resolution", parts[1]))?;
    if width == 0 || height == 0 {
        return Err("Resolution width and height must be greater than 0".to_string());
    }
    if width > 7680 || height > 4320 {
        return Err("Resolution exceeds maximum supported (7680x4320)".to_string());
    }
    Ok(Resolution { width, height })
}

/// Parse and validate a duration in seconds (1-3600)
fn parse_duration_secs(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number of seconds", s))?;
    if !(1..=3600).contains(&secs) {
        return Err(format!(
            "Duration must be between 1 and 3600 seconds, got {}",
            secs
        ));
    }
    Ok(secs)
}

#[derive(Parser)]
#[command(name = "camfeed", about = "Stream webcam frames as RGB24", version)]
struct Cli {
    /// Path to config file (default: ~/.config/camfeed/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the camera, print the negotiated format, and exit
    Probe {
        /// Capture device node (overrides config)
        #[arg(long)]
        device: Option<PathBuf>,
        /// Requested resolution as WIDTHxHEIGHT (the device may substitute)
        #[arg(long, value_parser = parse_resolution)]
        resolution: Option<Resolution>,
    },
    /// Capture frames until Ctrl-C (or --duration), reporting throughput
    Stream {
        /// Capture device node (overrides config)
        #[arg(long)]
        device: Option<PathBuf>,
        /// Requested resolution as WIDTHxHEIGHT (the device may substitute)
        #[arg(long, value_parser = parse_resolution)]
        resolution: Option<Resolution>,
        /// Stop after this many seconds
        #[arg(long, value_parser = parse_duration_secs)]
        duration: Option<u64>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Probe { device, resolution } => {
            run_probe(settings_from(&config, device, resolution))
        }
        Commands::Stream {
            device,
            resolution,
            duration,
        } => run_stream(settings_from(&config, device, resolution), duration),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Config values with CLI flags layered on top.
fn settings_from(
    config: &Config,
    device: Option<PathBuf>,
    resolution: Option<Resolution>,
) -> CameraSettings {
    let mut settings = config.camera_settings();
    if let Some(device) = device {
        settings.device_path = device;
    }
    if let Some(resolution) = resolution {
        settings.resolution = resolution;
    }
    settings
}

fn run_probe(settings: CameraSettings) -> Result<(), Box<dyn std::error::Error>> {
    let requested = settings.resolution;
    let mut camera = CameraCapture::open(settings)?;
    camera.start()?;

    if let Some(format) = camera.stream_format() {
        println!("device:     {}", camera.settings().device_path.display());
        println!(
            "requested:  {}x{} RGB24",
            requested.width, requested.height
        );
        println!(
            "negotiated: {}x{} {} (stride {})",
            format.width, format.height, format.pixel_format, format.stride
        );
        println!("frame size: {} bytes RGB24", format.rgb_frame_len());
    }

    camera.stop();
    Ok(())
}

fn run_stream(
    settings: CameraSettings,
    duration: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut camera = CameraCapture::open(settings)?;
    camera.start()?;

    if let Some(format) = camera.stream_format() {
        println!(
            "streaming {}x{} {} from {} (Ctrl-C to stop)",
            format.width,
            format.height,
            format.pixel_format,
            camera.settings().device_path.display()
        );
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    }

    let frames = camera
        .frames()
        .ok_or("capture started but no frame stream is available")?;
    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let started = Instant::now();
    let mut frame_count: u64 = 0;

    loop {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        match frames.recv_timeout(Duration::from_millis(200)) {
            Ok(frame) => {
                frame_count += 1;
                log::debug!(
                    "frame {}: {}x{}, {} bytes",
                    frame_count,
                    frame.width,
                    frame.height,
                    frame.data.len()
                );
            }
            Err(TryRecvError::Empty) => continue,
            Err(TryRecvError::Closed) => {
                eprintln!("camera stream ended unexpectedly");
                break;
            }
        }
    }

    camera.stop();

    let elapsed = started.elapsed().as_secs_f64();
    let fps = if elapsed > 0.0 {
        frame_count as f64 / elapsed
    } else {
        0.0
    };
    println!(
        "captured {} frames in {:.1}s ({:.1} fps)",
        frame_count, elapsed, fps
    );
    Ok(())
}
