use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::drivers::DriverRegistry;
use crate::engine::pricing::Pricing;
use crate::engine::ratings::RatingAggregator;
use crate::error::AppError;
use crate::models::driver::{Driver, GeoPoint};
use crate::models::ride::{Ride, RideEvent, RideLocation, RideStatus};
use crate::observability::metrics::Metrics;

/// Owns ride lifecycle and the one-active-ride-per-driver constraint.
///
/// Lock order is `rides` entry, then `active_by_driver` entry, then the
/// driver registry. Driver availability only changes while that driver's
/// `active_by_driver` slot is locked, so claims, releases and online toggles
/// for one driver are serialized. Events are published after all guards drop.
pub struct RideStateMachine {
    rides: DashMap<Uuid, Ride>,
    active_by_driver: DashMap<Uuid, Uuid>,
    locations: DashMap<Uuid, Vec<RideLocation>>,
    drivers: Arc<DriverRegistry>,
    aggregator: Arc<RatingAggregator>,
    pricing: Arc<dyn Pricing>,
    events_tx: broadcast::Sender<RideEvent>,
    metrics: Metrics,
}

impl RideStateMachine {
    pub fn new(
        drivers: Arc<DriverRegistry>,
        aggregator: Arc<RatingAggregator>,
        pricing: Arc<dyn Pricing>,
        events_tx: broadcast::Sender<RideEvent>,
        metrics: Metrics,
    ) -> Self {
        Self {
            rides: DashMap::new(),
            active_by_driver: DashMap::new(),
            locations: DashMap::new(),
            drivers,
            aggregator,
            pricing,
            events_tx,
            metrics,
        }
    }

    pub fn create(
        &self,
        customer_id: Uuid,
        start_location: &str,
        end_location: &str,
        pickup: Option<GeoPoint>,
    ) -> Result<Ride, AppError> {
        let start_location = start_location.trim();
        let end_location = end_location.trim();
        if start_location.is_empty() || end_location.is_empty() {
            return Err(AppError::Validation(
                "start and end locations are required".to_string(),
            ));
        }
        if let Some(point) = &pickup {
            point.validate().map_err(AppError::Validation)?;
        }

        let ride = Ride {
            id: Uuid::new_v4(),
            customer_id,
            driver_id: None,
            start_location: start_location.to_string(),
            end_location: end_location.to_string(),
            pickup,
            fare: Some(self.pricing.quote(start_location, end_location)),
            status: RideStatus::Requested,
            requested_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
            cancelled_at: None,
        };

        self.rides.insert(ride.id, ride.clone());
        self.metrics.rides_requested_total.inc();
        self.publish(&ride);
        info!(ride_id = %ride.id, customer_id = %customer_id, "ride requested");
        Ok(ride)
    }

    /// Atomically assigns `driver_id` to a requested ride.
    ///
    /// The only waits are on in-memory shard locks, which are never held
    /// across I/O or `.await`. A loser learns it lost as soon as it reads the
    /// committed state, with `AlreadyClaimed` or `DriverBusy`.
    pub fn claim(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
        let claimed = {
            let mut ride = self
                .rides
                .get_mut(&ride_id)
                .ok_or_else(|| ride_not_found(ride_id))?;

            if ride.status != RideStatus::Requested || ride.driver_id.is_some() {
                self.metrics
                    .claims_total
                    .with_label_values(&["already_claimed"])
                    .inc();
                return Err(AppError::AlreadyClaimed(ride_id));
            }

            match self.active_by_driver.entry(driver_id) {
                Entry::Occupied(_) => {
                    self.metrics
                        .claims_total
                        .with_label_values(&["driver_busy"])
                        .inc();
                    return Err(AppError::DriverBusy(driver_id));
                }
                Entry::Vacant(slot) => {
                    let _slot = slot.insert(ride_id);
                    if let Err(err) = self.drivers.set_availability(driver_id, false) {
                        warn!(driver_id = %driver_id, error = %err, "could not mark driver unavailable");
                    }
                }
            }

            ride.driver_id = Some(driver_id);
            ride.status = RideStatus::Accepted;
            ride.accepted_at = Some(Utc::now());
            ride.clone()
        };

        self.metrics
            .claims_total
            .with_label_values(&["accepted"])
            .inc();
        self.record_transition(&claimed);
        info!(ride_id = %ride_id, driver_id = %driver_id, "ride claimed");
        Ok(claimed)
    }

    /// Driver-driven progress along the lifecycle. `accepted` is only
    /// reachable through [`RideStateMachine::claim`].
    pub fn transition(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        new_status: RideStatus,
    ) -> Result<Ride, AppError> {
        let updated = {
            let mut ride = self
                .rides
                .get_mut(&ride_id)
                .ok_or_else(|| ride_not_found(ride_id))?;

            if ride.driver_id != Some(driver_id) {
                return Err(AppError::Forbidden(format!(
                    "ride {ride_id} is not assigned to this driver"
                )));
            }
            if new_status == RideStatus::Accepted || !ride.status.can_transition_to(new_status) {
                return Err(AppError::Forbidden(format!(
                    "cannot move ride {ride_id} from {} to {new_status}",
                    ride.status
                )));
            }

            self.apply(&mut ride, new_status);
            ride.clone()
        };

        self.after_transition(&updated);
        Ok(updated)
    }

    /// Customer-side cancellation, allowed until the trip starts.
    pub fn cancel_request(&self, ride_id: Uuid, customer_id: Uuid) -> Result<Ride, AppError> {
        let cancelled = {
            let mut ride = self
                .rides
                .get_mut(&ride_id)
                .ok_or_else(|| ride_not_found(ride_id))?;

            if ride.customer_id != customer_id {
                return Err(AppError::Forbidden(format!(
                    "ride {ride_id} does not belong to this customer"
                )));
            }
            if !matches!(ride.status, RideStatus::Requested | RideStatus::Accepted) {
                return Err(AppError::Forbidden(format!(
                    "ride {ride_id} is {} and can no longer be cancelled",
                    ride.status
                )));
            }

            self.apply(&mut ride, RideStatus::Cancelled);
            ride.clone()
        };

        self.after_transition(&cancelled);
        Ok(cancelled)
    }

    pub fn get(&self, ride_id: Uuid) -> Result<Ride, AppError> {
        self.rides
            .get(&ride_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ride_not_found(ride_id))
    }

    pub fn len(&self) -> usize {
        self.rides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rides.is_empty()
    }

    /// Requested rides, oldest first.
    pub fn list_requested(&self) -> Vec<Ride> {
        let mut rides: Vec<Ride> = self
            .rides
            .iter()
            .filter(|entry| entry.status == RideStatus::Requested)
            .map(|entry| entry.value().clone())
            .collect();
        rides.sort_by_key(|ride| ride.requested_at);
        rides
    }

    /// Rides the principal took part in as customer or driver, newest first.
    pub fn history(&self, principal_id: Uuid) -> Vec<Ride> {
        let mut rides: Vec<Ride> = self
            .rides
            .iter()
            .filter(|entry| entry.involves(principal_id))
            .map(|entry| entry.value().clone())
            .collect();
        rides.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        rides
    }

    pub fn active_ride_for(&self, driver_id: Uuid) -> Option<Uuid> {
        self.active_by_driver.get(&driver_id).map(|entry| *entry)
    }

    /// Driver-initiated online/offline toggle. Going online is refused while
    /// the driver holds an active ride.
    pub fn set_driver_online(&self, driver_id: Uuid, available: bool) -> Result<Driver, AppError> {
        let slot = self.active_by_driver.entry(driver_id);
        if available && matches!(slot, Entry::Occupied(_)) {
            return Err(AppError::DriverBusy(driver_id));
        }
        self.drivers.go_online(driver_id, available)
    }

    /// Appends a position to the driver's active ride trail and returns that
    /// ride. The slot stays read-locked across the append, so a trail never
    /// grows once its ride has ended.
    pub fn track_position(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
        timestamp: DateTime<Utc>,
    ) -> Option<Uuid> {
        let active = self.active_by_driver.get(&driver_id)?;
        let ride_id = *active;
        self.locations.entry(ride_id).or_default().push(RideLocation {
            ride_id,
            driver_id,
            location,
            timestamp,
        });
        debug!(ride_id = %ride_id, "ride location appended");
        Some(ride_id)
    }

    pub fn latest_location(&self, ride_id: Uuid) -> Option<RideLocation> {
        self.locations
            .get(&ride_id)
            .and_then(|trail| trail.iter().max_by_key(|entry| entry.timestamp).cloned())
    }

    fn apply(&self, ride: &mut Ride, new_status: RideStatus) {
        let now = Utc::now();
        ride.status = new_status;
        match new_status {
            RideStatus::Completed => ride.completed_at = Some(now),
            RideStatus::Cancelled => ride.cancelled_at = Some(now),
            _ => {}
        }

        if new_status.is_terminal() {
            if let Some(driver_id) = ride.driver_id {
                self.release_driver(driver_id, ride.id);
            }
        }
    }

    /// Frees the driver's slot and puts them back in the dispatch pool.
    fn release_driver(&self, driver_id: Uuid, ride_id: Uuid) {
        let Entry::Occupied(slot) = self.active_by_driver.entry(driver_id) else {
            return;
        };
        if *slot.get() != ride_id {
            return;
        }
        if let Err(err) = self.drivers.set_availability(driver_id, true) {
            warn!(driver_id = %driver_id, error = %err, "could not free driver");
        }
        slot.remove();
    }

    fn after_transition(&self, ride: &Ride) {
        if ride.status == RideStatus::Completed {
            self.aggregator.record_completion(ride);
        }

        self.record_transition(ride);
        info!(ride_id = %ride.id, status = %ride.status, "ride status changed");
    }

    fn record_transition(&self, ride: &Ride) {
        self.metrics
            .ride_transitions_total
            .with_label_values(&[ride.status.as_str()])
            .inc();
        self.publish(ride);
    }

    fn publish(&self, ride: &Ride) {
        // no subscribers is fine
        let _ = self.events_tx.send(RideEvent::from(ride));
    }
}

fn ride_not_found(ride_id: Uuid) -> AppError {
    AppError::NotFound(format!("ride {ride_id} not found"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    use super::RideStateMachine;
    use crate::engine::drivers::DriverRegistry;
    use crate::engine::pricing::FixedFare;
    use crate::engine::ratings::RatingAggregator;
    use crate::error::AppError;
    use crate::geo::GeoIndex;
    use crate::models::driver::Vehicle;
    use crate::models::ride::RideStatus;
    use crate::observability::metrics::Metrics;

    struct Fixture {
        rides: Arc<RideStateMachine>,
        drivers: Arc<DriverRegistry>,
        geo: Arc<GeoIndex>,
    }

    fn fixture() -> Fixture {
        let metrics = Metrics::new();
        let geo = Arc::new(GeoIndex::new());
        let drivers = Arc::new(DriverRegistry::new(geo.clone(), metrics.clone()));
        let aggregator = Arc::new(RatingAggregator::new(drivers.clone(), metrics.clone()));
        let (events_tx, _) = broadcast::channel(64);
        let rides = Arc::new(RideStateMachine::new(
            drivers.clone(),
            aggregator,
            Arc::new(FixedFare(Decimal::new(100_000, 0))),
            events_tx,
            metrics,
        ));
        Fixture { rides, drivers, geo }
    }

    fn online_driver(fx: &Fixture, license: &str) -> Uuid {
        let id = Uuid::new_v4();
        fx.drivers.register(id, license).unwrap();
        fx.drivers
            .set_vehicle(
                id,
                Vehicle {
                    license_plate: format!("P-{license}"),
                    brand: "Yamaha".to_string(),
                    model: "Sirius".to_string(),
                    year: 2021,
                },
            )
            .unwrap();
        fx.drivers.go_online(id, true).unwrap();
        fx.geo.upsert_position(id, 0.0, 0.0, chrono::Utc::now());
        id
    }

    #[test]
    fn create_starts_requested_without_driver() {
        let fx = fixture();
        let ride = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();

        assert_eq!(ride.status, RideStatus::Requested);
        assert!(ride.driver_id.is_none());
        assert_eq!(ride.fare, Some(Decimal::new(100_000, 0)));
    }

    #[test]
    fn create_rejects_blank_locations() {
        let fx = fixture();
        let err = fx.rides.create(Uuid::new_v4(), "  ", "B", None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(fx.rides.is_empty());
    }

    #[test]
    fn claim_assigns_driver_and_marks_unavailable() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let ride = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();

        let claimed = fx.rides.claim(ride.id, driver).unwrap();
        assert_eq!(claimed.status, RideStatus::Accepted);
        assert_eq!(claimed.driver_id, Some(driver));
        assert!(claimed.accepted_at.is_some());
        assert!(!fx.geo.is_available(driver));
        assert_eq!(fx.rides.active_ride_for(driver), Some(ride.id));
    }

    #[test]
    fn second_claim_is_already_claimed() {
        let fx = fixture();
        let first = online_driver(&fx, "D1");
        let second = online_driver(&fx, "D2");
        let ride = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();

        fx.rides.claim(ride.id, first).unwrap();
        let err = fx.rides.claim(ride.id, second).unwrap_err();
        assert!(matches!(err, AppError::AlreadyClaimed(id) if id == ride.id));
        assert_eq!(fx.rides.get(ride.id).unwrap().driver_id, Some(first));
    }

    #[test]
    fn busy_driver_cannot_claim_another_ride() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let r1 = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();
        let r2 = fx.rides.create(Uuid::new_v4(), "C", "D", None).unwrap();

        fx.rides.claim(r1.id, driver).unwrap();
        let err = fx.rides.claim(r2.id, driver).unwrap_err();
        assert!(matches!(err, AppError::DriverBusy(id) if id == driver));

        let untouched = fx.rides.get(r2.id).unwrap();
        assert_eq!(untouched.status, RideStatus::Requested);
        assert!(untouched.driver_id.is_none());
    }

    #[test]
    fn concurrent_claims_have_exactly_one_winner() {
        let fx = fixture();
        let drivers: Vec<Uuid> = (0..16)
            .map(|n| online_driver(&fx, &format!("D{n}")))
            .collect();
        let ride = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();

        let results: Vec<Result<_, AppError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = drivers
                .iter()
                .map(|driver| {
                    let rides = fx.rides.clone();
                    let driver = *driver;
                    scope.spawn(move || rides.claim(ride.id, driver))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::AlreadyClaimed(_))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(losers, drivers.len() - 1);
    }

    #[test]
    fn one_driver_racing_for_many_rides_gets_one() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let rides: Vec<Uuid> = (0..16)
            .map(|_| fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap().id)
            .collect();

        let results: Vec<Result<_, AppError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = rides
                .iter()
                .map(|ride_id| {
                    let machine = fx.rides.clone();
                    let ride_id = *ride_id;
                    scope.spawn(move || machine.claim(ride_id, driver))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let active = rides
            .iter()
            .filter(|id| fx.rides.get(**id).unwrap().status.is_active())
            .count();
        assert_eq!(active, 1);
    }

    #[test]
    fn cancel_racing_a_claim_never_strands_the_driver() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let customer = Uuid::new_v4();

        for _ in 0..500 {
            let ride = fx.rides.create(customer, "A", "B", None).unwrap();

            std::thread::scope(|scope| {
                let claimer = fx.rides.clone();
                let canceller = fx.rides.clone();
                scope.spawn(move || claimer.claim(ride.id, driver).unwrap());
                scope.spawn(move || {
                    while canceller.get(ride.id).unwrap().driver_id.is_none() {
                        std::hint::spin_loop();
                    }
                    canceller.cancel_request(ride.id, customer).unwrap();
                });
            });

            assert_eq!(fx.rides.get(ride.id).unwrap().status, RideStatus::Cancelled);
            assert!(fx.rides.active_ride_for(driver).is_none());
            assert!(fx.geo.is_available(driver));
            assert!(fx.drivers.get(driver).unwrap().available);
        }
    }

    #[test]
    fn going_online_is_refused_while_busy() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let ride = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();
        fx.rides.claim(ride.id, driver).unwrap();

        let err = fx.rides.set_driver_online(driver, true).unwrap_err();
        assert!(matches!(err, AppError::DriverBusy(id) if id == driver));
        assert!(!fx.geo.is_available(driver));

        let offline = fx.rides.set_driver_online(driver, false).unwrap();
        assert!(!offline.available);
    }

    #[test]
    fn online_toggle_racing_a_claim_keeps_busy_driver_hidden() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");

        for _ in 0..500 {
            fx.rides.set_driver_online(driver, false).unwrap();
            let ride = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();

            std::thread::scope(|scope| {
                let claimer = fx.rides.clone();
                let toggler = fx.rides.clone();
                scope.spawn(move || claimer.claim(ride.id, driver).unwrap());
                scope.spawn(move || {
                    let _ = toggler.set_driver_online(driver, true);
                });
            });

            assert_eq!(fx.rides.active_ride_for(driver), Some(ride.id));
            assert!(!fx.geo.is_available(driver));
            assert!(!fx.drivers.get(driver).unwrap().available);

            fx.rides
                .transition(ride.id, driver, RideStatus::Cancelled)
                .unwrap();
            assert!(fx.geo.is_available(driver));
        }
    }

    #[test]
    fn full_lifecycle_frees_driver_and_tallies() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let ride = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();

        fx.rides.claim(ride.id, driver).unwrap();
        fx.rides
            .transition(ride.id, driver, RideStatus::InProgress)
            .unwrap();
        let done = fx
            .rides
            .transition(ride.id, driver, RideStatus::Completed)
            .unwrap();

        assert!(done.completed_at.is_some());
        assert!(fx.geo.is_available(driver));
        assert!(fx.rides.active_ride_for(driver).is_none());
        assert_eq!(fx.drivers.get(driver).unwrap().completed_rides, 1);
    }

    #[test]
    fn illegal_transitions_leave_status_unchanged() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let ride = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();
        fx.rides.claim(ride.id, driver).unwrap();

        for target in [RideStatus::Requested, RideStatus::Accepted, RideStatus::Completed] {
            let err = fx.rides.transition(ride.id, driver, target).unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));
            assert_eq!(fx.rides.get(ride.id).unwrap().status, RideStatus::Accepted);
        }
    }

    #[test]
    fn transition_by_other_driver_is_forbidden() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let intruder = online_driver(&fx, "D2");
        let ride = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();
        fx.rides.claim(ride.id, driver).unwrap();

        let err = fx
            .rides
            .transition(ride.id, intruder, RideStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn terminal_states_are_final() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let ride = fx.rides.create(Uuid::new_v4(), "A", "B", None).unwrap();
        fx.rides.claim(ride.id, driver).unwrap();
        fx.rides
            .transition(ride.id, driver, RideStatus::Cancelled)
            .unwrap();

        let err = fx
            .rides
            .transition(ride.id, driver, RideStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(fx.geo.is_available(driver));
    }

    #[test]
    fn customer_can_cancel_until_trip_starts() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let customer = Uuid::new_v4();

        let waiting = fx.rides.create(customer, "A", "B", None).unwrap();
        let err = fx.rides.cancel_request(waiting.id, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let cancelled = fx.rides.cancel_request(waiting.id, customer).unwrap();
        assert_eq!(cancelled.status, RideStatus::Cancelled);
        assert!(cancelled.driver_id.is_none());

        let started = fx.rides.create(customer, "A", "B", None).unwrap();
        fx.rides.claim(started.id, driver).unwrap();
        fx.rides
            .transition(started.id, driver, RideStatus::InProgress)
            .unwrap();
        let err = fx.rides.cancel_request(started.id, customer).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn list_requested_and_history() {
        let fx = fixture();
        let driver = online_driver(&fx, "D1");
        let customer = Uuid::new_v4();
        let first = fx.rides.create(customer, "A", "B", None).unwrap();
        let second = fx.rides.create(customer, "C", "D", None).unwrap();
        fx.rides.create(Uuid::new_v4(), "E", "F", None).unwrap();

        fx.rides.claim(first.id, driver).unwrap();

        let requested = fx.rides.list_requested();
        assert_eq!(requested.len(), 2);
        assert!(requested.iter().all(|r| r.status == RideStatus::Requested));

        let history = fx.rides.history(customer);
        assert_eq!(history.len(), 2);
        assert!(history.iter().any(|r| r.id == second.id));
        assert_eq!(fx.rides.history(driver).len(), 1);
    }
}
