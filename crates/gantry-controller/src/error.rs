//! Error types for the reconcile domain.

use crate::build_id::BuildIdError;
use crate::config::ConfigError;
use crate::forge::ForgeError;
use crate::orchestrator::OrchestratorError;

/// The result type used throughout gantry-controller.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reconcile operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cluster orchestrator call failed.
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Build-ID allocation failed; the affected record stays Triggered
    /// and is retried next tick.
    #[error("build-id allocation error: {0}")]
    BuildId(#[from] BuildIdError),

    /// A source-forge call failed while evaluating follow-on
    /// eligibility.
    #[error("forge error: {0}")]
    Forge(#[from] ForgeError),

    /// Configuration was invalid. Fatal to the tick.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A core-type invariant was violated, e.g. a follow-on spec whose
    /// job identity cannot name a record.
    #[error("core error: {0}")]
    Core(#[from] gantry_core::Error),

    /// The reporter channel was closed or full. The buffer is sized
    /// for a full tick, so this indicates a programming error in the
    /// embedding process.
    #[error("reporter channel wedged; dropping report for {record}")]
    ReporterWedged {
        /// The record whose report could not be forwarded.
        record: String,
    },

    /// One or more per-record reconciles failed during a tick.
    ///
    /// Per-record errors never abort a tick; they are drained after
    /// both fan-out stages complete and aggregated here.
    #[error("{} reconcile error(s): [{}]", .errors.len(), format_aggregate(.errors))]
    SyncAggregate {
        /// The collected per-record errors.
        errors: Vec<Error>,
    },
}

fn format_aggregate(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Wraps a non-empty error list into an aggregate, or returns `Ok`
    /// for an empty one.
    ///
    /// # Errors
    ///
    /// Returns `SyncAggregate` whenever `errors` is non-empty.
    pub fn aggregate(errors: Vec<Error>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::SyncAggregate { errors })
        }
    }
}
