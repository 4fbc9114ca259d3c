use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::engine::drivers::DriverRegistry;
use crate::engine::rides::RideStateMachine;
use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::ride::RideLocation;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionOutcome {
    Recorded,
    /// Recorded and appended to the active ride's trail.
    Tracked(Uuid),
    Stale,
}

pub struct LocationIngest {
    drivers: Arc<DriverRegistry>,
    rides: Arc<RideStateMachine>,
    metrics: Metrics,
}

impl LocationIngest {
    pub fn new(drivers: Arc<DriverRegistry>, rides: Arc<RideStateMachine>, metrics: Metrics) -> Self {
        Self {
            drivers,
            rides,
            metrics,
        }
    }

    pub fn report_position(
        &self,
        driver_id: Uuid,
        lat: f64,
        lng: f64,
        recorded_at: Option<DateTime<Utc>>,
    ) -> Result<PositionOutcome, AppError> {
        let point = GeoPoint { lat, lng };
        point.validate().map_err(AppError::Validation)?;
        let recorded_at = recorded_at.unwrap_or_else(Utc::now);

        if !self.drivers.record_position(driver_id, point, recorded_at)? {
            self.metrics
                .position_updates_total
                .with_label_values(&["stale"])
                .inc();
            debug!(driver_id = %driver_id, "stale position ignored");
            return Ok(PositionOutcome::Stale);
        }

        let outcome = match self.rides.track_position(driver_id, point, recorded_at) {
            Some(ride_id) => PositionOutcome::Tracked(ride_id),
            None => PositionOutcome::Recorded,
        };

        self.metrics
            .position_updates_total
            .with_label_values(&["recorded"])
            .inc();
        Ok(outcome)
    }

    pub fn track(&self, ride_id: Uuid, requester_id: Uuid) -> Result<RideLocation, AppError> {
        let ride = self.rides.get(ride_id)?;
        if !ride.involves(requester_id) {
            return Err(AppError::Forbidden(format!(
                "ride {ride_id} is not yours to track"
            )));
        }

        self.rides
            .latest_location(ride_id)
            .ok_or(AppError::NoLocationYet(ride_id))
    }
}
