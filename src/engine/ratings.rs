use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::drivers::DriverRegistry;
use crate::error::AppError;
use crate::models::rating::Rating;
use crate::models::ride::{Ride, RideStatus};
use crate::observability::metrics::Metrics;

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 5.0;

/// Driver reputation and completion tallies.
pub struct RatingAggregator {
    ratings: DashMap<Uuid, Rating>,
    scores_by_driver: DashMap<Uuid, Vec<f64>>,
    drivers: Arc<DriverRegistry>,
    metrics: Metrics,
}

impl RatingAggregator {
    pub fn new(drivers: Arc<DriverRegistry>, metrics: Metrics) -> Self {
        Self {
            ratings: DashMap::new(),
            scores_by_driver: DashMap::new(),
            drivers,
            metrics,
        }
    }

    pub fn rate(
        &self,
        ride: &Ride,
        customer_id: Uuid,
        score: f64,
        comment: Option<String>,
    ) -> Result<Rating, AppError> {
        if !score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return Err(AppError::InvalidScore(score));
        }
        if ride.customer_id != customer_id {
            return Err(AppError::NotEligible(format!(
                "ride {} does not belong to this customer",
                ride.id
            )));
        }
        if ride.status != RideStatus::Completed {
            return Err(AppError::NotEligible(format!(
                "ride {} is {}, only completed rides can be rated",
                ride.id, ride.status
            )));
        }
        let driver_id = ride.driver_id.ok_or_else(|| {
            AppError::Internal(format!("completed ride {} has no driver", ride.id))
        })?;
        self.drivers.get(driver_id)?;

        let rating = Rating {
            ride_id: ride.id,
            customer_id,
            driver_id,
            score,
            comment: comment
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
            created_at: Utc::now(),
        };

        match self.ratings.entry(ride.id) {
            Entry::Occupied(_) => return Err(AppError::AlreadyRated(ride.id)),
            Entry::Vacant(slot) => {
                slot.insert(rating.clone());
            }
        }

        let average = {
            let mut scores = self.scores_by_driver.entry(driver_id).or_default();
            scores.push(score);
            let average = mean_rounded(&scores);
            self.drivers.update_rating(driver_id, average)?;
            average
        };

        self.metrics.ratings_total.inc();
        info!(ride_id = %ride.id, driver_id = %driver_id, score, average, "ride rated");
        Ok(rating)
    }

    pub fn record_completion(&self, ride: &Ride) {
        let Some(driver_id) = ride.driver_id else {
            warn!(ride_id = %ride.id, "completed ride without driver");
            return;
        };

        if let Err(err) = self.drivers.record_completion(driver_id, ride.fare) {
            warn!(ride_id = %ride.id, error = %err, "failed to record completion");
        }
    }
}

/// Arithmetic mean rounded to one decimal place.
fn mean_rounded(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    (mean * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{mean_rounded, RatingAggregator};
    use crate::engine::drivers::DriverRegistry;
    use crate::error::AppError;
    use crate::geo::GeoIndex;
    use crate::models::ride::{Ride, RideStatus};
    use crate::observability::metrics::Metrics;

    fn setup() -> (RatingAggregator, Arc<DriverRegistry>, Uuid) {
        let drivers = Arc::new(DriverRegistry::new(
            Arc::new(GeoIndex::new()),
            Metrics::new(),
        ));
        let driver_id = Uuid::new_v4();
        drivers.register(driver_id, "DL-1").unwrap();
        (
            RatingAggregator::new(drivers.clone(), Metrics::new()),
            drivers,
            driver_id,
        )
    }

    fn ride(customer_id: Uuid, driver_id: Uuid, status: RideStatus) -> Ride {
        Ride {
            id: Uuid::new_v4(),
            customer_id,
            driver_id: Some(driver_id),
            start_location: "A".to_string(),
            end_location: "B".to_string(),
            pickup: None,
            fare: Some(Decimal::new(100_000, 0)),
            status,
            requested_at: Utc::now(),
            accepted_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            cancelled_at: None,
        }
    }

    #[test]
    fn average_of_five_three_four_is_four() {
        let (aggregator, drivers, driver_id) = setup();
        let customer = Uuid::new_v4();

        for score in [5.0, 3.0, 4.0] {
            let completed = ride(customer, driver_id, RideStatus::Completed);
            aggregator.rate(&completed, customer, score, None).unwrap();
        }

        assert_eq!(drivers.get(driver_id).unwrap().rating, 4.0);
    }

    #[test]
    fn second_rating_fails() {
        let (aggregator, drivers, driver_id) = setup();
        let customer = Uuid::new_v4();
        let completed = ride(customer, driver_id, RideStatus::Completed);

        aggregator
            .rate(&completed, customer, 3.0, Some("fine".to_string()))
            .unwrap();
        let err = aggregator.rate(&completed, customer, 1.0, None).unwrap_err();
        assert!(matches!(err, AppError::AlreadyRated(id) if id == completed.id));
        assert_eq!(drivers.get(driver_id).unwrap().rating, 3.0);
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        let (aggregator, drivers, driver_id) = setup();
        let customer = Uuid::new_v4();
        let completed = ride(customer, driver_id, RideStatus::Completed);

        for score in [0.0, 5.5, f64::NAN] {
            let err = aggregator.rate(&completed, customer, score, None).unwrap_err();
            assert!(matches!(err, AppError::InvalidScore(_)));
        }
        // rejected scores leave the ride open for a valid rating
        aggregator.rate(&completed, customer, 1.0, None).unwrap();
        assert_eq!(drivers.get(driver_id).unwrap().rating, 1.0);
    }

    #[test]
    fn only_the_customer_of_a_completed_ride_may_rate() {
        let (aggregator, _, driver_id) = setup();
        let customer = Uuid::new_v4();

        let in_progress = ride(customer, driver_id, RideStatus::InProgress);
        let err = aggregator.rate(&in_progress, customer, 4.0, None).unwrap_err();
        assert!(matches!(err, AppError::NotEligible(_)));

        let completed = ride(customer, driver_id, RideStatus::Completed);
        let err = aggregator
            .rate(&completed, Uuid::new_v4(), 4.0, None)
            .unwrap_err();
        assert!(matches!(err, AppError::NotEligible(_)));
    }

    #[test]
    fn completion_tallies_fare() {
        let (aggregator, drivers, driver_id) = setup();
        let completed = ride(Uuid::new_v4(), driver_id, RideStatus::Completed);

        aggregator.record_completion(&completed);
        aggregator.record_completion(&completed);

        let driver = drivers.get(driver_id).unwrap();
        assert_eq!(driver.completed_rides, 2);
        assert_eq!(driver.total_earnings, Decimal::new(200_000, 0));
    }

    #[test]
    fn mean_rounds_to_one_decimal() {
        assert_eq!(mean_rounded(&[5.0, 4.0, 4.0]), 4.3);
        assert_eq!(mean_rounded(&[]), 0.0);
    }
}
