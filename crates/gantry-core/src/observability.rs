//! Observability infrastructure for Gantry.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors shared by the
//! controller and any operational binaries built around it.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `gantry_controller=debug`)
///
/// # Example
///
/// ```rust
/// use gantry_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for per-record reconcile operations.
///
/// # Example
///
/// ```rust
/// use gantry_core::observability::reconcile_span;
///
/// let span = reconcile_span("sync_pending", "nightly-1", "nightly");
/// let _guard = span.enter();
/// // ... reconcile the record
/// ```
#[must_use]
pub fn reconcile_span(operation: &str, record: &str, job: &str) -> Span {
    tracing::info_span!(
        "reconcile",
        op = operation,
        record = record,
        job = job,
    )
}
