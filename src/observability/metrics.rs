use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub matching_runs_total: IntCounterVec,
    pub couriers_notified_total: IntCounter,
    pub acceptances_total: IntCounterVec,
    pub acceptance_latency_seconds: Histogram,
    pub order_transitions_total: IntCounterVec,
    pub couriers_blocked_total: IntCounterVec,
    pub dispatch_locks_active: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let matching_runs_total = IntCounterVec::new(
            Opts::new("matching_runs_total", "Matching runs by outcome"),
            &["outcome"],
        )
        .expect("valid matching_runs_total metric");

        let couriers_notified_total = IntCounter::new(
            "couriers_notified_total",
            "Couriers notified about a new order",
        )
        .expect("valid couriers_notified_total metric");

        let acceptances_total = IntCounterVec::new(
            Opts::new("acceptances_total", "Order acceptance attempts by outcome"),
            &["outcome"],
        )
        .expect("valid acceptances_total metric");

        let acceptance_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "acceptance_latency_seconds",
                "Time from order creation to courier acceptance in seconds",
            )
            .buckets(vec![1.0, 5.0, 12.0, 24.0, 36.0, 60.0, 120.0, 300.0]),
        )
        .expect("valid acceptance_latency_seconds metric");

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order state transitions by target status"),
            &["status"],
        )
        .expect("valid order_transitions_total metric");

        let couriers_blocked_total = IntCounterVec::new(
            Opts::new("couriers_blocked_total", "Courier blocks by reason"),
            &["reason"],
        )
        .expect("valid couriers_blocked_total metric");

        let dispatch_locks_active = IntGauge::new(
            "dispatch_locks_active",
            "Dispatch locks currently held in memory",
        )
        .expect("valid dispatch_locks_active metric");

        registry
            .register(Box::new(matching_runs_total.clone()))
            .expect("register matching_runs_total");
        registry
            .register(Box::new(couriers_notified_total.clone()))
            .expect("register couriers_notified_total");
        registry
            .register(Box::new(acceptances_total.clone()))
            .expect("register acceptances_total");
        registry
            .register(Box::new(acceptance_latency_seconds.clone()))
            .expect("register acceptance_latency_seconds");
        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(couriers_blocked_total.clone()))
            .expect("register couriers_blocked_total");
        registry
            .register(Box::new(dispatch_locks_active.clone()))
            .expect("register dispatch_locks_active");

        Self {
            registry,
            matching_runs_total,
            couriers_notified_total,
            acceptances_total,
            acceptance_latency_seconds,
            order_transitions_total,
            couriers_blocked_total,
            dispatch_locks_active,
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
