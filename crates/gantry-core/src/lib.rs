//! # gantry-core
//!
//! Shared vocabulary types for the Gantry CI controller.
//!
//! This crate defines the data model that the reconciler reads and
//! writes but does not own: job records and workload pods live in the
//! external cluster orchestrator, which is the store of record. The
//! types here are the controller's view of them.
//!
//! ## Core Concepts
//!
//! - **Job record**: the durable declaration of a unit of CI work
//!   (periodic, presubmit, postsubmit, batch)
//! - **Pod**: the orchestrator-native workload that actually executes
//!   the job
//! - **Refs**: the source-forge coordinates a job runs against
//!
//! ## Guarantees
//!
//! - **Terminal states are final**: a complete job is never mutated
//! - **Serializable**: every record round-trips through serde for the
//!   orchestrator API

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod job;
pub mod observability;
pub mod pod;

pub use error::{Error, Result};
pub use job::{JobRecord, JobSpec, JobState, JobStatus, JobType, Pull, Refs};
pub use pod::{Container, EnvVar, PodPhase, PodRecord, PodSpec, PodStatus, EVICTED};
