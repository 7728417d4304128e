//! seat_admin - provision venues for seat inference.
//!
//! Writes calibration transforms and seat layouts into the seat database,
//! and shows the persisted state of a venue.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

use seat_kernel::config::SeatConfig;
use seat_kernel::{
    CalibrationStore, CalibrationTransform, Seat, SeatPoint, SeatRegistry,
    SqliteCalibrationStore, SqliteSeatRegistry,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Provision seat inference venues")]
struct Args {
    /// Path to the seat database (defaults to config).
    #[arg(long, env = "SEAT_DB_PATH")]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a calibration transform (9 row-major coefficients, comma separated).
    SetCalibration {
        #[arg(long)]
        venue: String,
        #[arg(long)]
        matrix: String,
    },
    /// Install a seat layout from a JSON file: `[{"id": 1, "x": 500, "y": 400}, ...]`.
    Provision {
        #[arg(long)]
        venue: String,
        #[arg(long)]
        seats: PathBuf,
    },
    /// Print the calibration and persisted seat states for a venue.
    Show {
        #[arg(long)]
        venue: String,
    },
}

#[derive(Debug, Deserialize)]
struct SeatLayoutEntry {
    id: u32,
    x: i64,
    y: i64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let db_path = match args.db_path {
        Some(path) => path,
        None => SeatConfig::load()?.db_path,
    };

    match args.command {
        Command::SetCalibration { venue, matrix } => {
            let coefficients = parse_matrix(&matrix)?;
            let transform = CalibrationTransform::from_slice(&coefficients)?;
            let mut store = SqliteCalibrationStore::open(&db_path)?;
            store.put(&venue, &transform)?;
            log::info!("calibration stored for venue {}", venue);
        }
        Command::Provision { venue, seats } => {
            let raw = std::fs::read_to_string(&seats)
                .map_err(|e| anyhow!("failed to read seat layout {}: {}", seats.display(), e))?;
            let layout: Vec<SeatLayoutEntry> = serde_json::from_str(&raw)
                .map_err(|e| anyhow!("invalid seat layout {}: {}", seats.display(), e))?;
            let seats: Vec<Seat> = layout
                .iter()
                .map(|entry| Seat::new(entry.id, SeatPoint::new(entry.x, entry.y)))
                .collect();
            let mut registry = SqliteSeatRegistry::open(&db_path)?;
            let revision = registry.provision(&venue, &seats)?;
            log::info!(
                "provisioned {} seats for venue {} (revision {})",
                seats.len(),
                venue,
                revision
            );
        }
        Command::Show { venue } => {
            let store = SqliteCalibrationStore::open(&db_path)?;
            match store.load(&venue) {
                Ok(transform) => println!("calibration: {:?}", transform.coefficients()),
                Err(e) => println!("calibration: {}", e),
            }
            let registry = SqliteSeatRegistry::open(&db_path)?;
            let collection = registry.load(&venue)?;
            println!("revision: {}", collection.revision);
            for seat in &collection.seats {
                let p = seat.position();
                println!("seat {} @ ({}, {}): {:?}", seat.id(), p.x, p.y, seat.state());
            }
        }
    }
    Ok(())
}

fn parse_matrix(value: &str) -> Result<Vec<f64>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<f64>()
                .map_err(|_| anyhow!("invalid matrix coefficient '{}'", entry))
        })
        .collect()
}
