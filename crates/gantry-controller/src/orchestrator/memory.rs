//! In-memory orchestrator implementation for testing.
//!
//! This module provides [`InMemoryOrchestrator`], a simple in-memory
//! implementation of the [`Orchestrator`] trait suitable for testing
//! and development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, no cross-process
//!   coordination
//! - **Selector-blind**: list operations return everything; the
//!   reconciler only ever lists with an empty selector

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use gantry_core::{JobRecord, PodRecord};

use super::{Orchestrator, OrchestratorError, OrchestratorResult, Selector};

/// A fault to inject into pod creation.
///
/// Materialized into a fresh [`OrchestratorError`] on every failing
/// call, mirroring how the cluster API reports the same rejection for
/// every retry.
#[derive(Debug, Clone)]
pub enum InjectedFault {
    /// Reject the pod as semantically invalid.
    Unprocessable(String),
    /// Fail with an optimistic-concurrency collision.
    Conflict(String),
    /// Fail in transit.
    Transport(String),
}

impl InjectedFault {
    fn materialize(&self) -> OrchestratorError {
        match self {
            Self::Unprocessable(message) => OrchestratorError::Unprocessable {
                message: message.clone(),
            },
            Self::Conflict(message) => OrchestratorError::Conflict {
                message: message.clone(),
            },
            Self::Transport(message) => OrchestratorError::transport(message.clone()),
        }
    }
}

/// In-memory orchestrator for testing.
///
/// Provides a thread-safe implementation of the [`Orchestrator`] trait
/// using `RwLock`-guarded vectors, plus fault injection and inspection
/// helpers for asserting on end-of-tick state.
///
/// ## Example
///
/// ```rust
/// use gantry_controller::orchestrator::memory::InMemoryOrchestrator;
///
/// let orchestrator = InMemoryOrchestrator::new();
/// // Seed records, run a tick, inspect...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryOrchestrator {
    jobs: RwLock<Vec<JobRecord>>,
    pods: RwLock<Vec<PodRecord>>,
    pod_fault: RwLock<Option<InjectedFault>>,
}

/// Converts a lock poison error to a transport error.
fn poison_err<T>(_: PoisonError<T>) -> OrchestratorError {
    OrchestratorError::transport("lock poisoned")
}

impl InMemoryOrchestrator {
    /// Creates a new, empty in-memory orchestrator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the job collection.
    #[must_use]
    pub fn with_jobs(self, jobs: Vec<JobRecord>) -> Self {
        *self.jobs.write().unwrap_or_else(PoisonError::into_inner) = jobs;
        self
    }

    /// Seeds the pod collection.
    #[must_use]
    pub fn with_pods(self, pods: Vec<PodRecord>) -> Self {
        *self.pods.write().unwrap_or_else(PoisonError::into_inner) = pods;
        self
    }

    /// Makes every subsequent `create_pod` fail with the given fault.
    pub fn fail_pod_creates_with(&self, fault: InjectedFault) {
        *self
            .pod_fault
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(fault);
    }

    /// Returns a snapshot of the job collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn jobs(&self) -> OrchestratorResult<Vec<JobRecord>> {
        Ok(self.jobs.read().map_err(poison_err)?.clone())
    }

    /// Returns a snapshot of the pod collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn pods(&self) -> OrchestratorResult<Vec<PodRecord>> {
        Ok(self.pods.read().map_err(poison_err)?.clone())
    }

    /// Returns the number of jobs currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn job_count(&self) -> OrchestratorResult<usize> {
        Ok(self.jobs.read().map_err(poison_err)?.len())
    }

    /// Returns the number of pods currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn pod_count(&self) -> OrchestratorResult<usize> {
        Ok(self.pods.read().map_err(poison_err)?.len())
    }

    /// Sets the phase-bearing status of a stored pod, simulating the
    /// orchestrator observing the workload.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no pod has that name.
    pub fn set_pod_status(
        &self,
        name: &str,
        status: gantry_core::PodStatus,
    ) -> OrchestratorResult<()> {
        let mut pods = self.pods.write().map_err(poison_err)?;
        let Some(pod) = pods.iter_mut().find(|p| p.name == name) else {
            return Err(OrchestratorError::NotFound { name: name.into() });
        };
        pod.status = status;
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn create_job(&self, record: JobRecord) -> OrchestratorResult<JobRecord> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        jobs.push(record.clone());
        Ok(record)
    }

    async fn list_jobs(&self, _selector: &Selector) -> OrchestratorResult<Vec<JobRecord>> {
        Ok(self.jobs.read().map_err(poison_err)?.clone())
    }

    async fn replace_job(&self, name: &str, record: JobRecord) -> OrchestratorResult<JobRecord> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        let Some(slot) = jobs.iter_mut().find(|j| j.name == name) else {
            return Err(OrchestratorError::NotFound { name: name.into() });
        };
        *slot = record.clone();
        Ok(record)
    }

    async fn create_pod(&self, pod: PodRecord) -> OrchestratorResult<PodRecord> {
        if let Some(fault) = self
            .pod_fault
            .read()
            .map_err(poison_err)?
            .as_ref()
        {
            return Err(fault.materialize());
        }
        let mut pods = self.pods.write().map_err(poison_err)?;
        pods.push(pod.clone());
        Ok(pod)
    }

    async fn list_pods(&self, _selector: &Selector) -> OrchestratorResult<Vec<PodRecord>> {
        Ok(self.pods.read().map_err(poison_err)?.clone())
    }

    async fn delete_pod(&self, name: &str) -> OrchestratorResult<()> {
        let mut pods = self.pods.write().map_err(poison_err)?;
        let Some(index) = pods.iter().position(|p| p.name == name) else {
            return Err(OrchestratorError::NotFound { name: name.into() });
        };
        pods.remove(index);
        Ok(())
    }
}
