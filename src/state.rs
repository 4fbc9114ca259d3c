use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::{DispatchConfig, FareConfig};
use crate::engine::dispatch::Dispatcher;
use crate::engine::drivers::DriverRegistry;
use crate::engine::ingest::LocationIngest;
use crate::engine::pricing::{self, Pricing};
use crate::engine::ratings::RatingAggregator;
use crate::engine::rides::RideStateMachine;
use crate::geo::GeoIndex;
use crate::models::ride::RideEvent;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub geo: Arc<GeoIndex>,
    pub drivers: Arc<DriverRegistry>,
    pub rides: Arc<RideStateMachine>,
    pub dispatcher: Dispatcher,
    pub ingest: LocationIngest,
    pub ride_events_tx: broadcast::Sender<RideEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(dispatch: DispatchConfig, fare: &FareConfig, event_buffer_size: usize) -> Self {
        Self::with_pricing(dispatch, Arc::from(pricing::from_config(fare)), event_buffer_size)
    }

    pub fn with_pricing(
        dispatch: DispatchConfig,
        pricing: Arc<dyn Pricing>,
        event_buffer_size: usize,
    ) -> Self {
        let metrics = Metrics::new();
        let (ride_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        let geo = Arc::new(GeoIndex::new());
        let drivers = Arc::new(DriverRegistry::new(geo.clone(), metrics.clone()));
        let aggregator = Arc::new(RatingAggregator::new(drivers.clone(), metrics.clone()));
        let rides = Arc::new(RideStateMachine::new(
            drivers.clone(),
            aggregator.clone(),
            pricing,
            ride_events_tx.clone(),
            metrics.clone(),
        ));
        let dispatcher = Dispatcher::new(
            dispatch,
            rides.clone(),
            drivers.clone(),
            geo.clone(),
            aggregator,
            metrics.clone(),
        );
        let ingest = LocationIngest::new(drivers.clone(), rides.clone(), metrics.clone());

        Self {
            geo,
            drivers,
            rides,
            dispatcher,
            ingest,
            ride_events_tx,
            metrics,
        }
    }
}
