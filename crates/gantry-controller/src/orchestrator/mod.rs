//! Cluster orchestrator client capability set.
//!
//! The orchestrator exclusively owns the job and pod collections; the
//! controller holds only per-tick snapshots. This module defines the
//! operations the reconciler consumes as a trait so the real cluster
//! client and in-memory test fakes are interchangeable.
//!
//! ## Design Principles
//!
//! - **Capability set, not hierarchy**: the trait lists exactly the
//!   operations the reconciler calls
//! - **Error taxonomy**: semantic rejections (`Unprocessable`) and
//!   optimistic-concurrency collisions (`Conflict`) are distinguished
//!   from transport failures, because the reconciler disposes of them
//!   differently
//! - **Testability**: [`memory::InMemoryOrchestrator`] for tests, the
//!   cluster API client for production

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use gantry_core::{JobRecord, PodRecord};

/// Label selector for list operations. Empty selects everything.
pub type Selector = HashMap<String, String>;

/// Errors returned by orchestrator operations.
///
/// The reconciler's disposition depends on the variant: unprocessable
/// is terminal for the record, conflict and transport are transient
/// and retried next tick.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The orchestrator rejected the entity as semantically invalid.
    /// Retrying the same write can never succeed.
    #[error("unprocessable entity: {message}")]
    Unprocessable {
        /// Rejection detail from the orchestrator.
        message: String,
    },

    /// Optimistic-concurrency collision: the entity changed between
    /// read and write.
    #[error("conflict: {message}")]
    Conflict {
        /// Collision detail from the orchestrator.
        message: String,
    },

    /// The named entity does not exist.
    #[error("not found: {name}")]
    NotFound {
        /// The name that was looked up.
        name: String,
    },

    /// The call failed in transit.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl OrchestratorError {
    /// Creates a transport error without an underlying cause.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true for semantic rejections that no retry can fix.
    #[must_use]
    pub const fn is_unprocessable(&self) -> bool {
        matches!(self, Self::Unprocessable { .. })
    }

    /// Returns true for optimistic-concurrency collisions.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result alias for orchestrator operations.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// The cluster orchestrator operations the reconciler consumes.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; one handle is shared across the
/// fan-out workers of a tick.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Creates a new job record.
    async fn create_job(&self, record: JobRecord) -> OrchestratorResult<JobRecord>;

    /// Lists job records matching the selector.
    async fn list_jobs(&self, selector: &Selector) -> OrchestratorResult<Vec<JobRecord>>;

    /// Replaces the job record with the given name.
    ///
    /// # Errors
    ///
    /// `Unprocessable` if the replacement is semantically invalid,
    /// `Conflict` if the record changed since it was read, `NotFound`
    /// if no record has that name.
    async fn replace_job(&self, name: &str, record: JobRecord) -> OrchestratorResult<JobRecord>;

    /// Creates a workload pod.
    ///
    /// Shares the error taxonomy of [`Orchestrator::replace_job`].
    async fn create_pod(&self, pod: PodRecord) -> OrchestratorResult<PodRecord>;

    /// Lists pods matching the selector.
    async fn list_pods(&self, selector: &Selector) -> OrchestratorResult<Vec<PodRecord>>;

    /// Deletes the named pod.
    async fn delete_pod(&self, name: &str) -> OrchestratorResult<()>;
}
