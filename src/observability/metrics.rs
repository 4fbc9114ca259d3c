use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub rides_requested_total: IntCounter,
    pub claims_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub ride_transitions_total: IntCounterVec,
    pub available_drivers: IntGauge,
    pub position_updates_total: IntCounterVec,
    pub ratings_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let rides_requested_total =
            IntCounter::new("rides_requested_total", "Total rides requested by customers")
                .expect("valid rides_requested_total metric");

        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Claim attempts by outcome"),
            &["outcome"],
        )
        .expect("valid claims_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of ride request handling in seconds",
            ),
            &["mode", "outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let ride_transitions_total = IntCounterVec::new(
            Opts::new("ride_transitions_total", "Ride lifecycle transitions by target status"),
            &["status"],
        )
        .expect("valid ride_transitions_total metric");

        let available_drivers =
            IntGauge::new("available_drivers", "Drivers currently open for dispatch")
                .expect("valid available_drivers metric");

        let position_updates_total = IntCounterVec::new(
            Opts::new("position_updates_total", "Driver position reports by outcome"),
            &["outcome"],
        )
        .expect("valid position_updates_total metric");

        let ratings_total = IntCounter::new("ratings_total", "Ratings submitted for completed rides")
            .expect("valid ratings_total metric");

        registry
            .register(Box::new(rides_requested_total.clone()))
            .expect("register rides_requested_total");
        registry
            .register(Box::new(claims_total.clone()))
            .expect("register claims_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(ride_transitions_total.clone()))
            .expect("register ride_transitions_total");
        registry
            .register(Box::new(available_drivers.clone()))
            .expect("register available_drivers");
        registry
            .register(Box::new(position_updates_total.clone()))
            .expect("register position_updates_total");
        registry
            .register(Box::new(ratings_total.clone()))
            .expect("register ratings_total");

        Self {
            registry,
            rides_requested_total,
            claims_total,
            dispatch_latency_seconds,
            ride_transitions_total,
            available_drivers,
            position_updates_total,
            ratings_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
