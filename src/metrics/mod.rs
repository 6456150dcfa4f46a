mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::utils::CircuitState;

pub use server::start_metrics_server;

// ============================================================================
// Metrics - Prometheus metrics for the outbox relay
// ============================================================================
//
// - publish throughput and latency per event type
// - publish failures by reason, and unroutable records (alert on these)
// - sweep count and outbox backlog
// - broker circuit breaker state
//
// Scraped via /metrics on the metrics server.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub records_published: IntCounterVec,
    pub publish_failures: IntCounterVec,
    pub unroutable_records: IntCounterVec,
    pub publish_duration: HistogramVec,

    pub sweeps_total: IntCounter,
    pub pending_records: IntGauge,

    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let records_published = IntCounterVec::new(
            Opts::new("outbox_records_published_total", "Outbox records published and deleted"),
            &["event_type"],
        )?;
        registry.register(Box::new(records_published.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("outbox_publish_failures_total", "Outbox publish attempts that failed"),
            &["event_type", "reason"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let unroutable_records = IntCounterVec::new(
            Opts::new(
                "outbox_unroutable_records_total",
                "Outbox records with no destination for their event type",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(unroutable_records.clone()))?;

        let publish_duration = HistogramVec::new(
            HistogramOpts::new("outbox_publish_duration_seconds", "Time until the broker acknowledged")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(publish_duration.clone()))?;

        let sweeps_total = IntCounter::new("outbox_sweeps_total", "Completed outbox sweeps")?;
        registry.register(Box::new(sweeps_total.clone()))?;

        let pending_records = IntGauge::new(
            "outbox_pending_records",
            "Outbox records waiting to be published",
        )?;
        registry.register(Box::new(pending_records.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Broker circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            records_published,
            publish_failures,
            unroutable_records,
            publish_duration,
            sweeps_total,
            pending_records,
            circuit_breaker_state,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_published(&self, event_type: &str, duration_secs: f64) {
        self.records_published.with_label_values(&[event_type]).inc();
        self.publish_duration.with_label_values(&[event_type]).observe(duration_secs);
    }

    pub fn record_publish_failure(&self, event_type: &str, reason: &str) {
        self.publish_failures.with_label_values(&[event_type, reason]).inc();
    }

    pub fn record_unroutable(&self, event_type: &str) {
        self.unroutable_records.with_label_values(&[event_type]).inc();
    }

    pub fn record_sweep(&self) {
        self.sweeps_total.inc();
    }

    pub fn set_pending(&self, pending: i64) {
        self.pending_records.set(pending);
    }

    pub fn update_circuit_breaker_state(&self, state: CircuitState) {
        self.circuit_breaker_state.set(state.as_gauge());
    }

    pub fn published_total(&self, event_type: &str) -> u64 {
        self.records_published.with_label_values(&[event_type]).get()
    }
}
