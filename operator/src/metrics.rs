use common::{Error, EventKind, reconciler::Outcome, router::Disposition};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::time::Instant;
use tracing::warn;

#[derive(Clone)]
pub struct Metrics {
    pub notifications: IntCounterVec,
    pub runs: IntCounterVec,
    pub outcomes: IntCounterVec,
    pub failures: IntCounterVec,
    pub duration: HistogramVec,
    pub runners: IntGauge,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let metrics = Self {
            notifications: IntCounterVec::new(
                Opts::new("notifications_total", "notifications received"),
                &["family", "disposition"],
            )?,
            runs: IntCounterVec::new(Opts::new("reconcile_runs_total", "reconciliations"), &["kind"])?,
            outcomes: IntCounterVec::new(
                Opts::new("reconcile_outcomes_total", "successful reconciliations by outcome"),
                &["outcome"],
            )?,
            failures: IntCounterVec::new(
                Opts::new("reconcile_failures_total", "reconciliation errors"),
                &["lb", "error"],
            )?,
            duration: HistogramVec::new(
                HistogramOpts::new("reconcile_duration_seconds", "reconcile duration")
                    .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60., 300.]),
                &["kind"],
            )?,
            runners: IntGauge::new("runners", "live load balancer runners")?,
            registry: Registry::new_custom(Some("lb_operator".to_string()), None)?,
        };
        metrics.register()
    }

    /// Register the metrics to start tracking them.
    fn register(self) -> prometheus::Result<Self> {
        self.registry.register(Box::new(self.notifications.clone()))?;
        self.registry.register(Box::new(self.runs.clone()))?;
        self.registry.register(Box::new(self.outcomes.clone()))?;
        self.registry.register(Box::new(self.failures.clone()))?;
        self.registry.register(Box::new(self.duration.clone()))?;
        self.registry.register(Box::new(self.runners.clone()))?;
        Ok(self)
    }

    pub fn notification(&self, family: &str, disposition: &Disposition) {
        self.notifications
            .with_label_values(&[family, disposition.as_str()])
            .inc();
    }

    pub fn reconcile_failure(&self, lb: &str, e: &Error) {
        self.failures.with_label_values(&[lb, e.metric_label().as_str()]).inc();
    }

    pub fn reconcile_outcome(&self, outcome: Outcome) {
        self.outcomes.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn count_and_measure(&self, kind: &EventKind) -> ReconcileMeasurer {
        let label = match kind {
            EventKind::Other(_) => "other",
            known => known.as_str(),
        };
        self.runs.with_label_values(&[label]).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.duration.clone(),
            label: label.to_string(),
        }
    }

    /// Prometheus text exposition
    #[must_use]
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "cannot encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    label: String,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[self.label.as_str()]).observe(duration);
    }
}
