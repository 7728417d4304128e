//! Seat occupancy kernel.
//!
//! Turns per-frame person/object detections into a persisted occupancy
//! state for every seat of a venue:
//! 1. Load the venue calibration and seat collection
//! 2. Map detections from camera pixels into the seat plane
//! 3. Classify every seat against every detection
//! 4. Persist the seat collection, then forward the status report
//!
//! The detector, frame lookup and reporting endpoint are collaborators.

use serde::{Deserialize, Serialize};

pub mod calibration;
pub mod classify;
pub mod config;
pub mod detect;
pub mod frames;
pub mod mapper;
pub mod pipeline;
pub mod registry;
pub mod report;

pub use calibration::{
    CalibrationStore, CalibrationTransform, InMemoryCalibrationStore, SqliteCalibrationStore,
};
pub use classify::{classify, OBJECT_THRESHOLD, PERSON_THRESHOLD};
pub use detect::{Detection, Detector, SidecarDetector};
pub use frames::FrameResolver;
pub use mapper::{map_point, MappedDetection, OFFSET_X, OFFSET_Y};
pub use pipeline::{InferencePipeline, VenueLocks};
pub use registry::{InMemorySeatRegistry, SeatCollection, SeatRegistry, SqliteSeatRegistry};
pub use report::{HttpReportSink, LogReportSink, ReportSink};

// -------------------- Data model --------------------

/// Detection label. Everything else is dropped before it reaches the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Label {
    Person,
    Object,
}

/// Camera-space pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Seat-plane coordinates, integer space shared by seats and mapped detections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatPoint {
    pub x: i64,
    pub y: i64,
}

impl SeatPoint {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &SeatPoint) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyState {
    #[default]
    Empty,
    Occupied,
    SteppedOut,
}

impl OccupancyState {
    /// Name used on the reporting wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            OccupancyState::Empty => "empty_table",
            OccupancyState::Occupied => "using_table",
            OccupancyState::SteppedOut => "step_out",
        }
    }
}

/// A physical seat. Position is fixed at provisioning; only the state changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    id: u32,
    position: SeatPoint,
    #[serde(default)]
    state: OccupancyState,
}

impl Seat {
    pub fn new(id: u32, position: SeatPoint) -> Self {
        Self {
            id,
            position,
            state: OccupancyState::Empty,
        }
    }

    pub fn with_state(mut self, state: OccupancyState) -> Self {
        self.state = state;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn position(&self) -> SeatPoint {
        self.position
    }

    pub fn state(&self) -> OccupancyState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: OccupancyState) {
        self.state = state;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatStatus {
    pub seat_id: u32,
    pub state: OccupancyState,
}

/// Per-run output: one entry per seat, in registry order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub statuses: Vec<SeatStatus>,
}

impl StatusReport {
    pub fn from_seats(seats: &[Seat]) -> Self {
        Self {
            statuses: seats
                .iter()
                .map(|seat| SeatStatus {
                    seat_id: seat.id(),
                    state: seat.state(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn state_of(&self, seat_id: u32) -> Option<OccupancyState> {
        self.statuses
            .iter()
            .find(|status| status.seat_id == seat_id)
            .map(|status| status.state)
    }
}

// -------------------- Errors --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    RegistryMissing,
    CalibrationMissing,
    InvalidTransform,
    ReportingFailure,
    RegistryConflict,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::RegistryMissing => "REGISTRY_MISSING",
            ErrorKind::CalibrationMissing => "CALIBRATION_MISSING",
            ErrorKind::InvalidTransform => "INVALID_TRANSFORM",
            ErrorKind::ReportingFailure => "REPORTING_FAILURE",
            ErrorKind::RegistryConflict => "REGISTRY_CONFLICT",
        }
    }
}

/// Typed failure carried inside `anyhow::Error` so callers can branch on kind.
#[derive(Clone, Debug)]
pub struct SeatError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SeatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SeatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}
impl std::error::Error for SeatError {}

/// Recover the kind of a kernel failure, if it is one.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<SeatError>().map(|e| e.kind)
}

pub(crate) fn now_s() -> anyhow::Result<u64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs())
}
