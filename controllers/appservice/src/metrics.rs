//! Prometheus metrics for the AppService controller.

use crate::config::ReconcileStrategy;
use crate::error::ControllerError;
use crate::reconcile_helpers::OperationResult;
use prometheus::{
    HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Reconciliation counters and timings, backed by a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    failures: IntCounterVec,
    child_operations: IntCounterVec,
    duration: HistogramVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates and registers all collectors.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new("appservice_reconcile_total", "AppService reconciliations by outcome"),
            &["strategy", "result"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new("appservice_reconcile_errors_total", "Failed AppService reconciliations by error kind"),
            &["strategy", "error"],
        )?;
        let child_operations = IntCounterVec::new(
            Opts::new("appservice_child_operations_total", "Writes to owned Deployments and Services"),
            &["kind", "operation"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("appservice_reconcile_duration_seconds", "AppService reconciliation latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["strategy"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(child_operations.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            failures,
            child_operations,
            duration,
        })
    }

    /// Starts a latency timer; the sample is recorded when the timer is dropped.
    pub fn start_timer(&self, strategy: ReconcileStrategy) -> HistogramTimer {
        self.duration.with_label_values(&[strategy.as_str()]).start_timer()
    }

    pub fn record_success(&self, strategy: ReconcileStrategy) {
        self.reconciliations
            .with_label_values(&[strategy.as_str(), "success"])
            .inc();
    }

    pub fn record_failure(&self, strategy: ReconcileStrategy, error: &ControllerError) {
        self.reconciliations
            .with_label_values(&[strategy.as_str(), "error"])
            .inc();
        self.failures
            .with_label_values(&[strategy.as_str(), error.metric_label()])
            .inc();
    }

    /// Counts a create/update/no-op against a child object.
    pub fn record_operation(&self, kind: &str, result: OperationResult) {
        self.child_operations
            .with_label_values(&[kind, result.as_str()])
            .inc();
    }

    /// Renders all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, ControllerError> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}
