//! Replay a recorded bus log through a calibration session.
//!
//! Each line of the log file is published verbatim onto an in-process bus at
//! a fixed rate, driving the same protocol and filter code a live transport
//! would. Prints the fit and optionally writes a JSON report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use imu_calib::accel::AccelFitFilter;
use imu_calib::bus::{BusClient, LoopbackBus};
use imu_calib::filter::StreamFilter;
use imu_calib::report::CalibrationReport;
use imu_calib::sample::CalibrationKind;
use imu_calib::session::{CalibrationSession, LinkState, SessionConfig};
use imu_calib::sphere::SphereFitFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Mag,
    Accel,
}

impl From<Kind> for CalibrationKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Mag => CalibrationKind::Magnetometer,
            Kind::Accel => CalibrationKind::Accelerometer,
        }
    }
}

/// Command line arguments for the replay calibrator.
#[derive(Parser, Debug)]
#[command(author, version, about = "IMU calibration from a recorded bus log")]
struct Args {
    /// Bus log to replay, one published message per line
    replay: PathBuf,

    /// Drone id whose messages to accept
    #[arg(short, long, default_value_t = 1)]
    drone_id: u32,

    /// Which sensor to calibrate
    #[arg(short, long, value_enum, default_value_t = Kind::Mag)]
    kind: Kind,

    /// Sliding window size for the magnetometer filter
    #[arg(long, default_value_t = 10)]
    window: usize,

    /// Replay rate in messages per second
    #[arg(long, default_value_t = 500.0)]
    rate: f64,

    /// Liveness timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    liveness_ms: u64,

    /// Session run budget in seconds
    #[arg(short = 't', long, default_value_t = 150.0)]
    duration: f64,

    /// Write a JSON calibration report here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let config = SessionConfig {
        liveness_timeout: Duration::from_millis(args.liveness_ms),
        run_budget: Duration::from_secs_f64(args.duration),
    };

    let log = std::fs::read_to_string(&args.replay)
        .with_context(|| format!("failed to read {}", args.replay.display()))?;
    let bus = Arc::new(LoopbackBus::new());

    match args.kind {
        Kind::Mag => {
            let session = CalibrationSession::new(
                bus.clone(),
                args.drone_id,
                CalibrationKind::Magnetometer,
                SphereFitFilter::new(args.window),
                config,
            );
            run_replay(&args, &bus, &log, &session)?;
            let filter = session.filter();
            let filter = filter.lock().unwrap();
            let report = CalibrationReport::from_sphere(
                args.drone_id,
                session.aircraft().name,
                &filter,
            );
            info!(
                samples = filter.sample_count(),
                center = ?filter.center(),
                radius = filter.radius(),
                "magnetometer fit"
            );
            write_report(&args, &report)
        }
        Kind::Accel => {
            let session = CalibrationSession::new(
                bus.clone(),
                args.drone_id,
                CalibrationKind::Accelerometer,
                AccelFitFilter::with_defaults(),
                config,
            );
            run_replay(&args, &bus, &log, &session)?;
            let filter = session.filter();
            let filter = filter.lock().unwrap();
            let report = CalibrationReport::from_accel(
                args.drone_id,
                session.aircraft().name,
                &filter,
            );
            info!(
                samples = filter.sample_count(),
                fill_ratio = filter.fill_ratio(),
                "accelerometer fit"
            );
            write_report(&args, &report)
        }
    }
}

fn run_replay<F: StreamFilter + 'static>(
    args: &Args,
    bus: &Arc<LoopbackBus>,
    log: &str,
    session: &CalibrationSession<F>,
) -> Result<()> {
    session.start(Some(Box::new(|link| match link {
        LinkState::Up => info!("link up"),
        LinkState::Down => info!("link down"),
    })))?;

    let interval = Duration::from_secs_f64(1.0 / args.rate.max(1.0));
    let mut published = 0usize;
    for line in log.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        bus.publish(line)?;
        published += 1;
        std::thread::sleep(interval);
    }
    info!(published, "replay complete");

    session.stop();
    Ok(())
}

fn write_report(args: &Args, report: &CalibrationReport) -> Result<()> {
    if let Some(path) = &args.output {
        report
            .save_to_file(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "report written");
    } else {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    Ok(())
}
