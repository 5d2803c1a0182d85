//! Observability metrics for the controller.
//!
//! Prometheus-compatible metrics exposed via the `metrics` crate
//! facade. Install an exporter in the embedding process, e.g.:
//!
//! ```rust,ignore
//! use metrics_exporter_prometheus::PrometheusBuilder;
//!
//! PrometheusBuilder::new()
//!     .with_http_listener(([0, 0, 0, 0], 9090))
//!     .install()
//!     .expect("failed to install Prometheus recorder");
//! ```
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `gantry_sync_tick_duration_seconds` | Histogram | - | Sync tick processing time |
//! | `gantry_reconciles_total` | Counter | `stage`, `result` | Per-record reconcile outcomes |
//! | `gantry_admission_denials_total` | Counter | `scope` | Pod starts denied by a cap |
//! | `gantry_pruned_duplicates_total` | Counter | - | Records aborted by pruning |
//! | `gantry_reports_total` | Counter | - | Records forwarded to the reporter |
//! | `gantry_pending_jobs` | Gauge | - | Pending records at tick start |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Histogram: Sync tick processing time in seconds.
    pub const SYNC_TICK_DURATION_SECONDS: &str = "gantry_sync_tick_duration_seconds";
    /// Counter: Per-record reconcile outcomes.
    pub const RECONCILES_TOTAL: &str = "gantry_reconciles_total";
    /// Counter: Pod starts denied by a concurrency cap.
    pub const ADMISSION_DENIALS_TOTAL: &str = "gantry_admission_denials_total";
    /// Counter: Records aborted by duplicate pruning.
    pub const PRUNED_DUPLICATES_TOTAL: &str = "gantry_pruned_duplicates_total";
    /// Counter: Records forwarded to the reporter.
    pub const REPORTS_TOTAL: &str = "gantry_reports_total";
    /// Gauge: Pending records observed at tick start.
    pub const PENDING_JOBS: &str = "gantry_pending_jobs";
}

/// Label keys used across metrics.
pub mod labels {
    /// Fan-out stage (pending, non_pending).
    pub const STAGE: &str = "stage";
    /// Outcome (ok, error).
    pub const RESULT: &str = "result";
    /// Which cap denied admission (global, job).
    pub const SCOPE: &str = "scope";
}

/// High-level interface for recording controller metrics.
///
/// Cheap to clone and share across fan-out workers.
#[derive(Debug, Clone, Default)]
pub struct ControllerMetrics;

impl ControllerMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records one sync tick's duration.
    pub fn observe_tick_duration(&self, duration: Duration) {
        histogram!(names::SYNC_TICK_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records a per-record reconcile outcome.
    pub fn record_reconcile(&self, stage: &str, ok: bool) {
        counter!(
            names::RECONCILES_TOTAL,
            labels::STAGE => stage.to_string(),
            labels::RESULT => if ok { "ok" } else { "error" }.to_string(),
        )
        .increment(1);
    }

    /// Records an admission denial.
    pub fn record_admission_denial(&self, scope: &str) {
        counter!(
            names::ADMISSION_DENIALS_TOTAL,
            labels::SCOPE => scope.to_string(),
        )
        .increment(1);
    }

    /// Records duplicates aborted in one tick.
    pub fn record_pruned(&self, count: usize) {
        counter!(names::PRUNED_DUPLICATES_TOTAL).increment(u64::try_from(count).unwrap_or(0));
    }

    /// Records reports forwarded in one tick.
    pub fn record_reports(&self, count: usize) {
        counter!(names::REPORTS_TOTAL).increment(u64::try_from(count).unwrap_or(0));
    }

    /// Sets the pending-record gauge from the tick snapshot.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_pending_jobs(&self, count: usize) {
        gauge!(names::PENDING_JOBS).set(count as f64);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
