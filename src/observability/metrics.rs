use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub status_updates_total: IntCounterVec,
    pub lifecycle_inconsistencies_total: IntCounter,
    pub stale_responses_discarded_total: IntCounter,
    pub realtime_reconnects_total: IntCounter,
    pub geolocation_errors_total: IntCounterVec,
    pub provider_errors_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let status_updates_total = IntCounterVec::new(
            Opts::new("status_updates_total", "Applied ride status updates by source"),
            &["source"],
        )
        .expect("valid status_updates_total metric");

        let lifecycle_inconsistencies_total = IntCounter::new(
            "lifecycle_inconsistencies_total",
            "Status transitions rejected for violating the lifecycle order",
        )
        .expect("valid lifecycle_inconsistencies_total metric");

        let stale_responses_discarded_total = IntCounter::new(
            "stale_responses_discarded_total",
            "Superseded provider responses dropped on arrival",
        )
        .expect("valid stale_responses_discarded_total metric");

        let realtime_reconnects_total = IntCounter::new(
            "realtime_reconnects_total",
            "Realtime channel reconnect attempts after transport loss",
        )
        .expect("valid realtime_reconnects_total metric");

        let geolocation_errors_total = IntCounterVec::new(
            Opts::new("geolocation_errors_total", "Geolocation failures by reason"),
            &["reason"],
        )
        .expect("valid geolocation_errors_total metric");

        let provider_errors_total = IntCounter::new(
            "provider_errors_total",
            "Place search or geocode provider failures",
        )
        .expect("valid provider_errors_total metric");

        registry
            .register(Box::new(status_updates_total.clone()))
            .expect("register status_updates_total");
        registry
            .register(Box::new(lifecycle_inconsistencies_total.clone()))
            .expect("register lifecycle_inconsistencies_total");
        registry
            .register(Box::new(stale_responses_discarded_total.clone()))
            .expect("register stale_responses_discarded_total");
        registry
            .register(Box::new(realtime_reconnects_total.clone()))
            .expect("register realtime_reconnects_total");
        registry
            .register(Box::new(geolocation_errors_total.clone()))
            .expect("register geolocation_errors_total");
        registry
            .register(Box::new(provider_errors_total.clone()))
            .expect("register provider_errors_total");

        Self {
            registry,
            status_updates_total,
            lifecycle_inconsistencies_total,
            stale_responses_discarded_total,
            realtime_reconnects_total,
            geolocation_errors_total,
            provider_errors_total,
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
