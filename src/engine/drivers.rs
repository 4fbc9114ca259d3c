use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoIndex;
use crate::models::driver::{Driver, GeoPoint, Vehicle};
use crate::observability::metrics::Metrics;

/// Driver profiles. Availability changes go through here so the geo index
/// always follows the profile flag.
pub struct DriverRegistry {
    drivers: DashMap<Uuid, Driver>,
    licenses: DashMap<String, Uuid>,
    plates: DashMap<String, Uuid>,
    geo: Arc<GeoIndex>,
    metrics: Metrics,
}

impl DriverRegistry {
    pub fn new(geo: Arc<GeoIndex>, metrics: Metrics) -> Self {
        Self {
            drivers: DashMap::new(),
            licenses: DashMap::new(),
            plates: DashMap::new(),
            geo,
            metrics,
        }
    }

    pub fn register(&self, driver_id: Uuid, license_number: &str) -> Result<Driver, AppError> {
        let license_number = license_number.trim().to_uppercase();
        if license_number.is_empty() {
            return Err(AppError::Validation(
                "license number cannot be empty".to_string(),
            ));
        }
        if self.drivers.contains_key(&driver_id) {
            return Err(AppError::Conflict(format!(
                "driver {driver_id} is already registered"
            )));
        }

        match self.licenses.entry(license_number.clone()) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(format!(
                    "license {license_number} is already registered"
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(driver_id);
            }
        }

        let driver = Driver::new(driver_id, license_number);
        self.drivers.insert(driver_id, driver.clone());
        info!(driver_id = %driver_id, "driver registered");
        Ok(driver)
    }

    pub fn find(&self, driver_id: Uuid) -> Option<Driver> {
        self.drivers.get(&driver_id).map(|entry| entry.value().clone())
    }

    pub fn get(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        self.find(driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not registered")))
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn set_vehicle(&self, driver_id: Uuid, vehicle: Vehicle) -> Result<Driver, AppError> {
        let plate = vehicle.license_plate.trim().to_uppercase();
        if plate.is_empty() || vehicle.brand.trim().is_empty() || vehicle.model.trim().is_empty() {
            return Err(AppError::Validation(
                "license plate, brand and model are required".to_string(),
            ));
        }
        let current_year = Utc::now().year();
        if vehicle.year < 1900 || vehicle.year > current_year + 1 {
            return Err(AppError::Validation(format!(
                "vehicle year {} is out of range",
                vehicle.year
            )));
        }

        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not registered")))?;

        match self.plates.entry(plate.clone()) {
            Entry::Occupied(owner) if *owner.get() != driver_id => {
                return Err(AppError::Conflict(format!(
                    "license plate {plate} is already registered"
                )))
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(driver_id);
            }
        }

        if let Some(previous) = driver.vehicle.take() {
            if previous.license_plate != plate {
                self.plates.remove(&previous.license_plate);
            }
        }

        driver.vehicle = Some(Vehicle {
            license_plate: plate,
            ..vehicle
        });
        info!(driver_id = %driver_id, "vehicle registered");
        Ok(driver.clone())
    }

    /// Removing the vehicle also takes the driver offline.
    pub fn remove_vehicle(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        let snapshot = {
            let mut driver = self
                .drivers
                .get_mut(&driver_id)
                .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not registered")))?;

            let vehicle = driver
                .vehicle
                .take()
                .ok_or_else(|| AppError::NotFound("no vehicle registered".to_string()))?;
            self.plates.remove(&vehicle.license_plate);
            driver.available = false;
            self.geo.set_availability(driver_id, false);
            driver.clone()
        };

        self.sync_gauge();
        info!(driver_id = %driver_id, "vehicle removed");
        Ok(snapshot)
    }

    /// Driver-initiated online/offline toggle. Going online needs a vehicle.
    pub fn go_online(&self, driver_id: Uuid, available: bool) -> Result<Driver, AppError> {
        let driver = self.get(driver_id)?;
        if available && driver.vehicle.is_none() {
            return Err(AppError::Validation(
                "register a vehicle before going online".to_string(),
            ));
        }
        self.set_availability(driver_id, available)
    }

    pub fn set_availability(&self, driver_id: Uuid, available: bool) -> Result<Driver, AppError> {
        let snapshot = {
            let mut driver = self
                .drivers
                .get_mut(&driver_id)
                .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not registered")))?;
            driver.available = available;
            // flag and index change together under the profile guard
            self.geo.set_availability(driver_id, available);
            driver.clone()
        };

        self.sync_gauge();
        debug!(driver_id = %driver_id, available, "driver availability changed");
        Ok(snapshot)
    }

    /// Returns `false` for stale reports, which leave the profile untouched.
    pub fn record_position(
        &self,
        driver_id: Uuid,
        point: GeoPoint,
        recorded_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not registered")))?;

        if !self
            .geo
            .upsert_position(driver_id, point.lat, point.lng, recorded_at)
        {
            return Ok(false);
        }

        driver.location = Some(point);
        driver.location_updated_at = Some(recorded_at);
        Ok(true)
    }

    pub fn update_rating(&self, driver_id: Uuid, rating: f64) -> Result<(), AppError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not registered")))?;
        driver.rating = rating;
        Ok(())
    }

    pub fn record_completion(&self, driver_id: Uuid, fare: Option<Decimal>) -> Result<(), AppError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not registered")))?;
        driver.completed_rides += 1;
        driver.total_earnings += fare.unwrap_or(Decimal::ZERO);
        Ok(())
    }

    fn sync_gauge(&self) {
        self.metrics
            .available_drivers
            .set(self.geo.available_count() as i64);
    }
}
