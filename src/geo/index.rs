use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use rand::seq::SliceRandom;
use serde::Serialize;
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy)]
struct TimedPosition {
    point: GeoPoint,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub location: GeoPoint,
    pub distance_km: f64,
}

/// Last-known driver positions plus the set of drivers open for dispatch.
///
/// Reads are stale-tolerant: a driver returned by [`GeoIndex::nearest`] may be
/// claimed by another ride before the caller gets to it.
#[derive(Default)]
pub struct GeoIndex {
    positions: DashMap<Uuid, TimedPosition>,
    available: DashSet<Uuid>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the report is older than what is already stored.
    pub fn upsert_position(
        &self,
        driver_id: Uuid,
        lat: f64,
        lng: f64,
        recorded_at: DateTime<Utc>,
    ) -> bool {
        let point = GeoPoint { lat, lng };
        let mut entry = self.positions.entry(driver_id).or_insert(TimedPosition {
            point,
            recorded_at,
        });

        if recorded_at < entry.recorded_at {
            return false;
        }

        entry.point = point;
        entry.recorded_at = recorded_at;
        true
    }

    pub fn set_availability(&self, driver_id: Uuid, available: bool) {
        if available {
            self.available.insert(driver_id);
        } else {
            self.available.remove(&driver_id);
        }
    }

    pub fn is_available(&self, driver_id: Uuid) -> bool {
        self.available.contains(&driver_id)
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    /// Available drivers with a known position, closest first. Drivers at the
    /// same distance come back in a fresh random order on every call.
    pub fn nearest(&self, lat: f64, lng: f64, limit: usize) -> Vec<Candidate> {
        let origin = GeoPoint { lat, lng };

        let mut candidates: Vec<Candidate> = self
            .available
            .iter()
            .filter_map(|driver_id| {
                let driver_id = *driver_id;
                let position = self.positions.get(&driver_id)?;
                Some(Candidate {
                    driver_id,
                    location: position.point,
                    distance_km: haversine_km(&origin, &position.point),
                })
            })
            .collect();

        // shuffle then stable sort: ties keep their shuffled order
        candidates.shuffle(&mut rand::thread_rng());
        candidates.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        candidates.truncate(limit);
        candidates
    }
}
