//! seat_infer - run seat-state inference for one venue frame.
//!
//! 1. Resolves the frame for the requested `mm-ss` (exact, else up to N seconds back)
//! 2. Reads detections for that frame from the detector sidecar
//! 3. Runs the inference pipeline (calibration, mapping, classification)
//! 4. Persists seat state and forwards the report
//! 5. Prints the status report as JSON

use anyhow::{anyhow, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use seat_kernel::config::SeatConfig;
use seat_kernel::report::{report_payload, HttpReportSink, LogReportSink, ReportSink};
use seat_kernel::{
    Detector, FrameResolver, InferencePipeline, SidecarDetector, SqliteCalibrationStore,
    SqliteSeatRegistry, StatusReport,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Infer seat occupancy for one venue frame")]
struct Args {
    /// Venue (cafe) identifier.
    #[arg(long, env = "SEAT_VENUE_ID", default_value = "20")]
    venue: String,

    /// Requested frame time, `mm-ss`.
    #[arg(long)]
    time: String,

    /// Override the frames directory from config.
    #[arg(long)]
    frames_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = SeatConfig::load()?;

    let frames_dir = args.frames_dir.unwrap_or_else(|| cfg.frames.dir.clone());
    let resolver = FrameResolver::new(frames_dir, cfg.frames.max_lookback);
    let frame = resolver
        .resolve(&args.time)?
        .ok_or_else(|| anyhow!("no available frame near {}", args.time))?;
    log::info!("analysing frame {}", frame.path.display());

    let mut detector = SidecarDetector::new();
    let detections = detector.detect(&frame.path)?;
    log::info!(
        "{} detector: {} detections ({} ignored)",
        detector.name(),
        detections.len(),
        detector.skipped()
    );

    let calibration = SqliteCalibrationStore::open(&cfg.db_path)?;
    let registry = SqliteSeatRegistry::open(&cfg.db_path)?;
    let sink: Box<dyn ReportSink> = match cfg.report.http() {
        Some(http) => Box::new(HttpReportSink::new(http)?),
        None => Box::new(LogReportSink),
    };

    let mut pipeline = InferencePipeline::new(calibration, registry, sink);
    let report = pipeline.run(&args.venue, &detections)?;
    print_report(&args.venue, &frame.time, &report)
}

fn print_report(venue_id: &str, frame_time: &str, report: &StatusReport) -> Result<()> {
    let payload = report_payload(venue_id, report);
    let out = json!({
        "message": "seat inference completed",
        "frame": frame_time,
        "statusList": payload["statusList"],
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
