//! # gantry-controller
//!
//! Job reconciliation controller for the Gantry CI pipeline.
//!
//! This crate implements the reconcile domain, providing:
//!
//! - **Sync loop**: one tick snapshots jobs and pods, reconciles each
//!   record, and forwards state changes to a reporter channel
//! - **Admission**: per-identity and global concurrency caps gate pod
//!   creation
//! - **Duplicate pruning**: superseded presubmit/postsubmit runs are
//!   aborted, newest wins
//! - **Follow-on materialization**: child jobs spawn after a parent
//!   succeeds, filtered by change-set patterns
//!
//! ## Core Concepts
//!
//! - **Tick**: one call to [`controller::Controller::sync`]; ticks are
//!   serialized by the driver and never overlap
//! - **Admission**: the decision to start a pod for a Triggered
//!   record, gated by concurrency limits
//! - **Report**: a record whose externally visible status changed
//!   during a tick, forwarded to the reporter sink
//!
//! ## Guarantees
//!
//! - **Terminal is final**: a complete record is never mutated
//! - **Durable progress**: every state mutation is persisted to the
//!   orchestrator immediately, so a failed tick resumes where it left
//!   off
//! - **Bounded fan-out**: per-record reconciles run on a bounded
//!   worker pool; per-record errors are aggregated, never fatal to the
//!   tick
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gantry_controller::build_id::SequenceBuildIdAllocator;
//! use gantry_controller::config::Config;
//! use gantry_controller::controller::Controller;
//! use gantry_controller::error::Result;
//! use gantry_controller::forge::memory::InMemoryForge;
//! use gantry_controller::ids::UlidIdGenerator;
//! use gantry_controller::orchestrator::memory::InMemoryOrchestrator;
//!
//! # async fn run() -> Result<()> {
//! let config = Config::builder()
//!     .job_url_template("https://ci.example.com/{name}/{state}")?
//!     .build()?;
//! let (reports_tx, mut reports_rx) = tokio::sync::mpsc::channel(1024);
//!
//! let controller = Controller::new(
//!     Arc::new(InMemoryOrchestrator::new()),
//!     Arc::new(InMemoryForge::new()),
//!     Arc::new(SequenceBuildIdAllocator::new()),
//!     Arc::new(UlidIdGenerator),
//!     config,
//!     reports_tx,
//! );
//!
//! controller.sync().await?;
//! while let Ok(report) = reports_rx.try_recv() {
//!     println!("{} is now {}", report.name, report.status.state);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod build_id;
pub mod config;
pub mod controller;
pub mod dedup;
pub mod error;
pub mod follow_on;
pub mod forge;
pub mod ids;
pub mod metrics;
pub mod orchestrator;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::admission::{AdmissionDecision, AdmissionDenialReason, PendingCounts};
    pub use crate::build_id::{BuildIdAllocator, HttpBuildIdAllocator, SequenceBuildIdAllocator};
    pub use crate::config::{Config, ConfigBuilder, Presubmit, UrlTemplate};
    pub use crate::controller::Controller;
    pub use crate::error::{Error, Result};
    pub use crate::forge::{Forge, PullRequestChange};
    pub use crate::ids::{IdGenerator, UlidIdGenerator};
    pub use crate::metrics::ControllerMetrics;
    pub use crate::orchestrator::{Orchestrator, OrchestratorError, Selector};
}
