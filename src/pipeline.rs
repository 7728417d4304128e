//! Per-frame inference run.
//!
//! Load -> Map -> Classify -> Report -> Persist -> Notify, strictly in
//! order. Load failures stop the run before anything is mutated. Notify
//! runs after the seat collection is committed and its failure is only
//! logged.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::calibration::CalibrationStore;
use crate::classify::gather_evidence;
use crate::detect::Detection;
use crate::mapper::{map_detections, MappedDetection};
use crate::registry::SeatRegistry;
use crate::report::ReportSink;
use crate::{Seat, StatusReport};

/// One mutex per venue, shared by every pipeline that touches the same store.
///
/// Runs for the same venue are serialised; different venues never contend.
#[derive(Clone, Debug, Default)]
pub struct VenueLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl VenueLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, venue_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut venues = self
            .inner
            .lock()
            .map_err(|_| anyhow!("venue lock table poisoned"))?;
        Ok(venues
            .entry(venue_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}

/// Overwrite every seat's state from the frame's mapped detections.
pub fn classify_seats(seats: &mut [Seat], detections: &[MappedDetection]) {
    for seat in seats.iter_mut() {
        let evidence = gather_evidence(seat, detections);
        let state = evidence.resolve();
        log::debug!(
            "seat {}: person={} object={} -> {:?}",
            seat.id(),
            evidence.has_person,
            evidence.has_object,
            state
        );
        seat.set_state(state);
    }
}

pub struct InferencePipeline<C, S, R> {
    calibration: C,
    registry: S,
    sink: R,
    locks: VenueLocks,
}

impl<C, S, R> InferencePipeline<C, S, R>
where
    C: CalibrationStore,
    S: SeatRegistry,
    R: ReportSink,
{
    pub fn new(calibration: C, registry: S, sink: R) -> Self {
        Self::with_locks(calibration, registry, sink, VenueLocks::new())
    }

    pub fn with_locks(calibration: C, registry: S, sink: R, locks: VenueLocks) -> Self {
        Self {
            calibration,
            registry,
            sink,
            locks,
        }
    }

    pub fn calibration(&self) -> &C {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut C {
        &mut self.calibration
    }

    pub fn registry(&self) -> &S {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut S {
        &mut self.registry
    }

    pub fn sink(&self) -> &R {
        &self.sink
    }

    /// Run one frame's detections for a venue and return the status report.
    pub fn run(&mut self, venue_id: &str, detections: &[Detection]) -> Result<StatusReport> {
        let venue_lock = self.locks.lock_for(venue_id)?;
        let _guard = venue_lock
            .lock()
            .map_err(|_| anyhow!("venue {} lock poisoned", venue_id))?;

        let transform = self.calibration.load(venue_id)?;
        let mut collection = self.registry.load(venue_id)?;
        log::info!(
            "venue {}: {} seats, {} detections",
            venue_id,
            collection.seats.len(),
            detections.len()
        );

        let mapped = map_detections(detections, &transform)?;
        classify_seats(&mut collection.seats, &mapped);
        let report = StatusReport::from_seats(&collection.seats);

        let revision = self.registry.save(venue_id, &collection)?;
        log::debug!("venue {}: seat collection at revision {}", venue_id, revision);

        if let Err(e) = self.sink.report(venue_id, &report) {
            log::warn!(
                "venue {}: {} report sink failed, seat state already persisted: {}",
                venue_id,
                self.sink.name(),
                e
            );
        }

        Ok(report)
    }
}
