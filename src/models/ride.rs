use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "requested",
            RideStatus::Accepted => "accepted",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RideStatus::Accepted | RideStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Edges of the lifecycle graph. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        use RideStatus::*;

        matches!(
            (self, next),
            (Requested, Accepted)
                | (Requested, Cancelled)
                | (Accepted, InProgress)
                | (Accepted, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub start_location: String,
    pub end_location: String,
    pub pickup: Option<GeoPoint>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub fare: Option<Decimal>,
    pub status: RideStatus,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Ride {
    pub fn involves(&self, principal_id: Uuid) -> bool {
        self.customer_id == principal_id || self.driver_id == Some(principal_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideLocation {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub location: GeoPoint,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast on every lifecycle change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideEvent {
    pub ride_id: Uuid,
    pub customer_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: RideStatus,
    pub at: DateTime<Utc>,
}

impl From<&Ride> for RideEvent {
    fn from(ride: &Ride) -> Self {
        Self {
            ride_id: ride.id,
            customer_id: ride.customer_id,
            driver_id: ride.driver_id,
            status: ride.status,
            at: Utc::now(),
        }
    }
}
