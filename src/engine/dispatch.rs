use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DispatchConfig, DispatchMode};
use crate::engine::drivers::DriverRegistry;
use crate::engine::ratings::RatingAggregator;
use crate::engine::rides::RideStateMachine;
use crate::error::AppError;
use crate::geo::GeoIndex;
use crate::models::driver::{Driver, GeoPoint};
use crate::models::rating::Rating;
use crate::models::ride::{Ride, RideStatus};
use crate::observability::metrics::Metrics;

/// Match-making policy on top of the state machine's transition rules.
pub struct Dispatcher {
    config: DispatchConfig,
    rides: Arc<RideStateMachine>,
    drivers: Arc<DriverRegistry>,
    geo: Arc<GeoIndex>,
    aggregator: Arc<RatingAggregator>,
    metrics: Metrics,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        rides: Arc<RideStateMachine>,
        drivers: Arc<DriverRegistry>,
        geo: Arc<GeoIndex>,
        aggregator: Arc<RatingAggregator>,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            rides,
            drivers,
            geo,
            aggregator,
            metrics,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.config.mode
    }

    pub fn request_ride(
        &self,
        customer_id: Uuid,
        start_location: &str,
        end_location: &str,
        pickup: Option<GeoPoint>,
    ) -> Result<Ride, AppError> {
        let start = Instant::now();
        let result = match self.config.mode {
            DispatchMode::Pull => self
                .rides
                .create(customer_id, start_location, end_location, pickup),
            DispatchMode::Push => {
                let pickup = pickup.ok_or_else(|| {
                    AppError::Validation("pickup coordinates are required".to_string())
                })?;
                let ride = self
                    .rides
                    .create(customer_id, start_location, end_location, Some(pickup))?;
                self.assign_nearest(ride, pickup)
            }
        };

        let outcome = match &result {
            Ok(ride) if ride.driver_id.is_some() => "assigned",
            Ok(_) => "queued",
            Err(AppError::NoDriverAvailable) => "no_driver",
            Err(_) => "error",
        };
        self.metrics
            .dispatch_latency_seconds
            .with_label_values(&[self.config.mode.as_str(), outcome])
            .observe(start.elapsed().as_secs_f64());

        result
    }

    /// Tries candidates closest first. Drivers that got busy since the query
    /// are skipped; the attempt count is capped by configuration.
    fn assign_nearest(&self, ride: Ride, pickup: GeoPoint) -> Result<Ride, AppError> {
        let candidates = self
            .geo
            .nearest(pickup.lat, pickup.lng, self.config.max_attempts);

        for candidate in &candidates {
            match self.rides.claim(ride.id, candidate.driver_id) {
                Ok(claimed) => {
                    info!(
                        ride_id = %ride.id,
                        driver_id = %candidate.driver_id,
                        distance_km = candidate.distance_km,
                        "ride dispatched"
                    );
                    return Ok(claimed);
                }
                Err(AppError::DriverBusy(_)) | Err(AppError::NotFound(_)) => {
                    debug!(
                        ride_id = %ride.id,
                        driver_id = %candidate.driver_id,
                        "candidate unavailable, trying next"
                    );
                }
                Err(AppError::AlreadyClaimed(_)) => {
                    // picked up through the listing in the meantime
                    return self.rides.get(ride.id);
                }
                Err(err) => return Err(err),
            }
        }

        warn!(
            ride_id = %ride.id,
            candidates = candidates.len(),
            "no driver could be assigned"
        );
        if let Err(err) = self.rides.cancel_request(ride.id, ride.customer_id) {
            // claimed between the last attempt and now
            if self.rides.get(ride.id)?.status != RideStatus::Cancelled {
                debug!(ride_id = %ride.id, error = %err, "ride claimed during fallback");
                return self.rides.get(ride.id);
            }
        }
        Err(AppError::NoDriverAvailable)
    }

    pub fn accept(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
        self.eligible_driver(driver_id)?;
        self.rides.claim(ride_id, driver_id)
    }

    pub fn list_requested(&self, driver_id: Uuid) -> Result<Vec<Ride>, AppError> {
        self.eligible_driver(driver_id)?;
        Ok(self.rides.list_requested())
    }

    pub fn rate(
        &self,
        ride_id: Uuid,
        customer_id: Uuid,
        score: f64,
        comment: Option<String>,
    ) -> Result<Rating, AppError> {
        let ride = self.rides.get(ride_id)?;
        self.aggregator.rate(&ride, customer_id, score, comment)
    }

    fn eligible_driver(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        let Some(driver) = self.drivers.find(driver_id) else {
            return Err(AppError::NotFound(
                "driver profile not registered".to_string(),
            ));
        };
        if driver.vehicle.is_none() {
            return Err(AppError::Validation(
                "register a vehicle before taking rides".to_string(),
            ));
        }
        Ok(driver)
    }
}
