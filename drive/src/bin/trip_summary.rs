//! Prints a summary of one or more trip files.
//!
//! Usage:
//!   cargo run --bin trip_summary -- trips/drismo-0001.csv

use clap::Parser;
use drive_monitor::{QualityGrade, Trip};
use std::path::{Path, PathBuf};
use tracing::error;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Trip files written by the monitor
    #[arg(required = true)]
    trips: Vec<PathBuf>,
}

fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}:{:02}", seconds / 3600, (seconds / 60) % 60, seconds % 60)
}

fn print_summary(path: &Path, trip: &Trip) {
    println!("{}", path.display());
    println!("  records:       {} every {} ms", trip.records().len(), trip.interval_ms());
    println!("  duration:      {}", format_duration(trip.duration().as_secs()));
    match trip.average_score() {
        Some(score) => println!("  average score: {} ({:?})", score, QualityGrade::from_score(score)),
        None => println!("  average score: -"),
    }
    if trip.has_gps() {
        println!("  length:        {:.2} km", trip.length_m() / 1000.0);
        println!("  max speed:     {:.1} km/h", trip.max_speed() * 3.6);
        println!("  average speed: {:.1} km/h", trip.average_speed() * 3.6);
    } else {
        println!("  no position data");
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut failed = false;
    for path in &args.trips {
        match Trip::from_file(path) {
            Ok(trip) => print_summary(path, &trip),
            Err(e) => {
                error!("{}: {}", path.display(), e);
                failed = true;
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
}
