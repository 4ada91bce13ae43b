//! Replays recorded accelerometer data through the monitor and writes a
//! trip file.
//!
//! Usage:
//!   cargo run --bin replay_drive -- drive.csv --gps fixes.csv
//!
//! Enable lifecycle logging with `RUST_LOG=drive_monitor=debug`.

use clap::Parser;
use drive_monitor::replay::{load_fixes, load_samples};
use drive_monitor::{
    CalibrationListener, MonitorConfig, MonitorController, QualityGrade, QualityListener,
    ReplayGps, ReplaySensor,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Accelerometer samples, one `x,y,z` line per sample (m/s²)
    samples: PathBuf,

    /// Location fixes, one `latitude,longitude,speed` line per fix
    #[arg(long)]
    gps: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the trip file, overriding the configuration
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Sample rate of the recording (Hz)
    #[arg(long, default_value = "50")]
    rate: f64,
}

#[derive(Debug)]
enum Event {
    OffsetFound,
    Calibrated,
}

struct ConsoleView {
    events: Mutex<mpsc::Sender<Event>>,
}

impl ConsoleView {
    fn send(&self, event: Event) {
        if let Ok(events) = self.events.lock() {
            let _ = events.send(event);
        }
    }
}

impl CalibrationListener for ConsoleView {
    fn on_offset_found(&self) {
        self.send(Event::OffsetFound);
    }

    fn on_calibration_complete(&self) {
        self.send(Event::Calibrated);
    }
}

impl QualityListener for ConsoleView {
    fn on_quality_update(&self, score: i32) {
        println!("score {:>5}  {:?}", score, QualityGrade::from_score(score));
    }
}

fn open(path: &Path) -> Result<BufReader<File>, Box<dyn std::error::Error>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| format!("Failed to open {}: {}", path.display(), e).into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("replay_drive=info".parse()?),
        )
        .init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(output) = args.output {
        config.trip_dir = output;
    }
    if args.gps.is_none() {
        config.log_gps = false;
    }
    if !args.rate.is_finite() || args.rate <= 0.0 {
        return Err(format!("Invalid sample rate {}", args.rate).into());
    }

    let samples = load_samples(open(&args.samples)?)?;
    info!("Loaded {} samples from {}", samples.len(), args.samples.display());
    let fixes = match &args.gps {
        Some(path) => load_fixes(open(path)?)?,
        None => Vec::new(),
    };

    let sensor = ReplaySensor::new(samples, Duration::from_secs_f64(1.0 / args.rate));
    let progress = sensor.clone();
    let controller =
        MonitorController::new(Box::new(sensor), Box::new(ReplayGps::new(fixes)), config);

    let (events_tx, events_rx) = mpsc::channel();
    controller.attach_view(Arc::new(ConsoleView { events: Mutex::new(events_tx) }))?;
    controller.initiate_calibration()?;
    info!("Calibrating, keep the device still");

    while !progress.is_finished() {
        match events_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Event::OffsetFound) => info!("Offset found, drive forward"),
            Ok(Event::Calibrated) => {
                info!("Calibrated, monitoring");
                controller.start_monitoring()?;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if controller.is_monitoring() {
        let trip_file = controller.log_file_name();
        let score = controller.score();
        controller.stop_monitoring()?;
        match trip_file {
            Some(name) => info!("Trip written to {}", controller.config().trip_dir.join(name).display()),
            None => error!("No trip file was written"),
        }
        if let Some(score) = score {
            info!("Final score {} ({:?})", score, QualityGrade::from_score(score));
        }
    } else {
        warn!("Recording ended before calibration completed");
        controller.cancel_calibration()?;
    }
    Ok(())
}
