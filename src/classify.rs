//! Proximity-based occupancy rules.
//!
//! Every seat is checked against every detection in the frame; a single
//! qualifying detection is enough. A nearby person always wins over a
//! nearby object.

use crate::mapper::MappedDetection;
use crate::{Label, OccupancyState, Seat};

/// Catchment radius for person detections (seat-plane units, strict).
pub const PERSON_THRESHOLD: f64 = 300.0;
/// Catchment radius for object detections (seat-plane units, strict).
pub const OBJECT_THRESHOLD: f64 = 100.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Evidence {
    pub has_person: bool,
    pub has_object: bool,
}

impl Evidence {
    pub fn resolve(&self) -> OccupancyState {
        if self.has_person {
            OccupancyState::Occupied
        } else if self.has_object {
            OccupancyState::SteppedOut
        } else {
            OccupancyState::Empty
        }
    }
}

pub fn gather_evidence(seat: &Seat, detections: &[MappedDetection]) -> Evidence {
    let position = seat.position();
    let mut evidence = Evidence::default();
    for det in detections {
        let dist = position.distance_to(&det.position);
        match det.label {
            Label::Person if dist < PERSON_THRESHOLD => evidence.has_person = true,
            Label::Object if dist < OBJECT_THRESHOLD => evidence.has_object = true,
            _ => {}
        }
    }
    evidence
}

pub fn classify(seat: &Seat, detections: &[MappedDetection]) -> OccupancyState {
    gather_evidence(seat, detections).resolve()
}
