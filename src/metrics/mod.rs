use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Counts what each trigger did with the items it was handed:
// - Transitions (applied, unchanged, skipped, failed) per target status
// - Escalation scans and the advance requests they issued
// - Notifications per status and outcome
// - Per-component processing latency
//
// All metrics are registered with one Registry, scraped via GET /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub transitions: IntCounterVec,
    pub escalation_scans: IntCounterVec,
    pub escalation_requests: IntCounterVec,
    pub notifications: IntCounterVec,
    pub processing_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let transitions = IntCounterVec::new(
            Opts::new("transitions_total", "Transition requests by target status and outcome"),
            &["target", "outcome"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let escalation_scans = IntCounterVec::new(
            Opts::new("escalation_scans_total", "Escalation scan runs"),
            &["result"],
        )?;
        registry.register(Box::new(escalation_scans.clone()))?;

        let escalation_requests = IntCounterVec::new(
            Opts::new("escalation_requests_total", "Advance requests issued by escalation scans"),
            &["result"],
        )?;
        registry.register(Box::new(escalation_requests.clone()))?;

        let notifications = IntCounterVec::new(
            Opts::new("notifications_total", "Change events handled by the notifier"),
            &["status", "outcome"],
        )?;
        registry.register(Box::new(notifications.clone()))?;

        let processing_duration = HistogramVec::new(
            HistogramOpts::new("processing_duration_seconds", "Per-item processing duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["component"],
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        Ok(Self {
            registry,
            transitions,
            escalation_scans,
            escalation_requests,
            notifications,
            processing_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_transition(&self, target: &str, outcome: &str) {
        self.transitions.with_label_values(&[target, outcome]).inc();
    }

    pub fn record_scan(&self, success: bool) {
        let result = if success { "ok" } else { "store_error" };
        self.escalation_scans.with_label_values(&[result]).inc();
    }

    pub fn record_escalation_request(&self, success: bool) {
        let result = if success { "accepted" } else { "failed" };
        self.escalation_requests.with_label_values(&[result]).inc();
    }

    pub fn record_notification(&self, status: &str, outcome: &str) {
        self.notifications.with_label_values(&[status, outcome]).inc();
    }

    pub fn observe_duration(&self, component: &str, duration_secs: f64) {
        self.processing_duration
            .with_label_values(&[component])
            .observe(duration_secs);
    }
}
