use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for the [Machine](super::Machine)
#[derive(Default)]
pub struct Metrics {
    /// Number of phases initiated
    pub phases: Counter,
    /// Number of messages delivered to a phase
    pub received: Counter,
    /// Number of messages dropped before or during delivery
    pub rejected: Counter,
    /// Block height at which the last phase ended
    pub phase_end: Gauge,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Metrics::default();
        context.register(
            "phases",
            "Number of phases initiated",
            metrics.phases.clone(),
        );
        context.register(
            "received",
            "Number of messages delivered to a phase",
            metrics.received.clone(),
        );
        context.register(
            "rejected",
            "Number of messages dropped before or during delivery",
            metrics.rejected.clone(),
        );
        context.register(
            "phase_end",
            "Block height at which the last phase ended",
            metrics.phase_end.clone(),
        );
        metrics
    }
}
