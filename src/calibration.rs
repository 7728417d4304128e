//! Per-venue calibration store.
//!
//! A calibration is a projective transform from camera pixels to the seat
//! plane. It is produced elsewhere (fiducial markers in a reference image)
//! and only consumed here, fresh on every pipeline run.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

use crate::{now_s, ErrorKind, PixelPoint, SeatError};

const MIN_DETERMINANT: f64 = 1e-12;
const MIN_WEIGHT: f64 = 1e-12;

/// Row-major 3x3 homography.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationTransform {
    m: [[f64; 3]; 3],
}

impl CalibrationTransform {
    /// Validates the matrix so the mapper can use it without normalisation.
    pub fn new(m: [[f64; 3]; 3]) -> Result<Self> {
        if m.iter().flatten().any(|c| !c.is_finite()) {
            return Err(invalid("non-finite coefficient"));
        }
        let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
        if det.abs() < MIN_DETERMINANT {
            return Err(invalid("singular matrix"));
        }
        Ok(Self { m })
    }

    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Parse nine row-major coefficients.
    pub fn from_slice(coefficients: &[f64]) -> Result<Self> {
        if coefficients.len() != 9 {
            return Err(invalid(format!(
                "expected 9 coefficients, got {}",
                coefficients.len()
            )));
        }
        let mut m = [[0.0; 3]; 3];
        for (i, c) in coefficients.iter().enumerate() {
            m[i / 3][i % 3] = *c;
        }
        Self::new(m)
    }

    pub fn coefficients(&self) -> [[f64; 3]; 3] {
        self.m
    }

    /// Project a pixel into the seat plane (before the fixed offset).
    pub fn apply(&self, p: PixelPoint) -> Result<(f64, f64)> {
        let (x, y) = (p.x as f64, p.y as f64);
        let m = &self.m;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        if w.abs() < MIN_WEIGHT {
            return Err(invalid(format!(
                "pixel ({}, {}) projects to infinity",
                p.x, p.y
            )));
        }
        let tx = (m[0][0] * x + m[0][1] * y + m[0][2]) / w;
        let ty = (m[1][0] * x + m[1][1] * y + m[1][2]) / w;
        Ok((tx, ty))
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    SeatError::new(ErrorKind::InvalidTransform, message).into()
}

fn missing(venue_id: &str) -> anyhow::Error {
    SeatError::new(
        ErrorKind::CalibrationMissing,
        format!("no calibration persisted for venue {}", venue_id),
    )
    .into()
}

pub trait CalibrationStore {
    /// Latest persisted transform for the venue.
    fn load(&self, venue_id: &str) -> Result<CalibrationTransform>;

    /// Provisioning hook for the calibration workflow.
    fn put(&mut self, venue_id: &str, transform: &CalibrationTransform) -> Result<()>;
}

pub struct SqliteCalibrationStore {
    conn: Connection,
}

impl SqliteCalibrationStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS calibrations (
              venue_id TEXT PRIMARY KEY,
              coefficients TEXT NOT NULL,
              updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl CalibrationStore for SqliteCalibrationStore {
    fn load(&self, venue_id: &str) -> Result<CalibrationTransform> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT coefficients FROM calibrations WHERE venue_id = ?1",
                params![venue_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Err(missing(venue_id));
        };
        let m: [[f64; 3]; 3] = serde_json::from_str(&raw).map_err(|e| {
            anyhow::Error::from(SeatError::new(
                ErrorKind::InvalidTransform,
                format!("corrupt calibration for venue {}: {}", venue_id, e),
            ))
        })?;
        CalibrationTransform::new(m)
    }

    fn put(&mut self, venue_id: &str, transform: &CalibrationTransform) -> Result<()> {
        let coefficients = serde_json::to_string(&transform.coefficients())?;
        let updated_at = i64::try_from(now_s()?)
            .map_err(|_| anyhow!("timestamp exceeds i64 range"))?;
        self.conn.execute(
            r#"
            INSERT INTO calibrations(venue_id, coefficients, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(venue_id) DO UPDATE SET
              coefficients = excluded.coefficients,
              updated_at = excluded.updated_at
            "#,
            params![venue_id, coefficients, updated_at],
        )?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryCalibrationStore {
    transforms: HashMap<String, CalibrationTransform>,
}

impl InMemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CalibrationStore for InMemoryCalibrationStore {
    fn load(&self, venue_id: &str) -> Result<CalibrationTransform> {
        self.transforms
            .get(venue_id)
            .copied()
            .ok_or_else(|| missing(venue_id))
    }

    fn put(&mut self, venue_id: &str, transform: &CalibrationTransform) -> Result<()> {
        self.transforms.insert(venue_id.to_string(), *transform);
        Ok(())
    }
}
