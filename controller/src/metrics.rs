//! Metrics contains the metrics setup for the controller.

use ::metrics::{Counter, counter};

/// Common metrics for the reconcilers.
#[derive(Clone)]
pub struct Metrics {
    /// Metrics collected from reconcilers.
    pub reconcile: ReconcileMetrics,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            reconcile: ReconcileMetrics::new("imagescan"),
        }
    }
}

/// Metrics collected from reconcilers.
#[derive(Clone)]
pub struct ReconcileMetrics {
    /// Runs records the total number of calls to a reconciler.
    pub runs: Counter,
    /// Failures records the total number of reconciler calls that resulted in a failure.
    pub failures: Counter,
    /// Jobs_created records the number of scan Jobs created.
    pub jobs_created: Counter,
}

impl ReconcileMetrics {
    fn new(prefix: &str) -> Self {
        Self {
            runs: counter!(format!("{prefix}_reconciles_total")),
            failures: counter!(format!("{prefix}_reconcile_failures_total")),
            jobs_created: counter!(format!("{prefix}_jobs_created_total")),
        }
    }
}
