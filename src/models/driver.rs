use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_RATING: f64 = 5.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn validate(&self) -> Result<(), String> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(format!("latitude {} out of range [-90, 90]", self.lat));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(format!("longitude {} out of range [-180, 180]", self.lng));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    pub license_plate: String,
    pub brand: String,
    pub model: String,
    pub year: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub license_number: String,
    pub location: Option<GeoPoint>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub available: bool,
    pub rating: f64,
    pub vehicle: Option<Vehicle>,
    pub completed_rides: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_earnings: Decimal,
    pub registered_at: DateTime<Utc>,
}

impl Driver {
    /// New drivers start offline, like a freshly registered profile.
    pub fn new(id: Uuid, license_number: String) -> Self {
        Self {
            id,
            license_number,
            location: None,
            location_updated_at: None,
            available: false,
            rating: DEFAULT_RATING,
            vehicle: None,
            completed_rides: 0,
            total_earnings: Decimal::ZERO,
            registered_at: Utc::now(),
        }
    }
}
