//! Job record model.
//!
//! A job record is the durable declaration of a unit of CI work. The
//! cluster orchestrator owns the collection; the controller reads
//! snapshots and writes state transitions back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pod::PodSpec;

/// The kind of trigger that produced a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Runs on a timer, independent of any change.
    #[default]
    Periodic,
    /// Runs against a proposed change before merge.
    Presubmit,
    /// Runs against a branch after merge.
    Postsubmit,
    /// Runs against a batch of changes together.
    Batch,
}

/// The state of a job record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Declared but not yet admitted; no pod exists.
    #[default]
    Triggered,
    /// Admitted; a pod has been (or should be) started.
    Pending,
    /// The pod finished successfully.
    Success,
    /// The pod finished unsuccessfully.
    Failure,
    /// Superseded by a newer run of the same identity.
    Aborted,
    /// The job could not be processed.
    Error,
}

impl JobState {
    /// Returns true if the state is terminal.
    ///
    /// Terminal states never transition again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Aborted | Self::Error
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Triggered => "triggered",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Aborted => "aborted",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A pull request included in a job's refs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pull {
    /// Pull request number.
    pub number: u64,
    /// Author login.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    /// Head commit SHA.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha: String,
}

/// Source-forge coordinates a job runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Refs {
    /// Organization or user owning the repository.
    pub org: String,
    /// Repository name.
    pub repo: String,
    /// Base branch name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_ref: String,
    /// Base commit SHA.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_sha: String,
    /// Pull requests included in this run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pulls: Vec<Pull>,
}

impl Refs {
    /// Returns the `org/repo` slug for presubmit catalog lookups.
    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }
}

impl std::fmt::Display for Refs {
    /// Renders the checkout specification: `base_ref:base_sha` followed
    /// by one `number:sha` pair per pull.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.base_ref, self.base_sha)?;
        for pull in &self.pulls {
            write!(f, ",{}:{}", pull.number, pull.sha)?;
        }
        Ok(())
    }
}

/// The declarative half of a job record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job identity. Many records may share one identity; concurrency
    /// caps apply per identity.
    pub job: String,
    /// What kind of trigger produced the job.
    #[serde(rename = "type", default)]
    pub job_type: JobType,
    /// Maximum records of this identity allowed in Pending at once.
    /// Zero means unlimited.
    #[serde(default)]
    pub max_concurrency: usize,
    /// Source coordinates, absent for periodics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Refs>,
    /// Template for the workload pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_spec: Option<PodSpec>,
    /// Child specs materialized after this job succeeds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_after_success: Vec<JobSpec>,
}

impl JobSpec {
    /// Validates that the spec can be materialized into a record.
    ///
    /// The job identity names pods, allocator vend paths, and
    /// admission buckets, so it must be non-empty and free of
    /// separators. Specs arriving through the orchestrator went
    /// through its own validation; this guards the ones the
    /// controller mints itself from embedded follow-on specs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] when the identity is empty or
    /// contains whitespace or `/`.
    pub fn validate(&self) -> Result<()> {
        if self.job.is_empty() {
            return Err(Error::InvalidId {
                message: "job identity is empty".into(),
            });
        }
        if self.job.contains(|c: char| c.is_whitespace() || c == '/') {
            return Err(Error::InvalidId {
                message: format!("job identity {:?} contains separator characters", self.job),
            });
        }
        Ok(())
    }
}

/// The mutable half of a job record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Current state.
    #[serde(default)]
    pub state: JobState,
    /// When the record was created.
    pub start_time: DateTime<Utc>,
    /// Set exactly when the record reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    /// Name of the workload pod. Once set, never changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    /// Externally allocated build identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    /// Result URL rendered from the configured template. Once set,
    /// never reverts to empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Human-readable state breadcrumb.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl JobStatus {
    /// Returns true if any externally visible field differs from
    /// `other`.
    ///
    /// The visible set is what downstream reporters act on: state,
    /// URL, pod name, build ID, and description. Timestamps are
    /// bookkeeping and do not make a record report-worthy on their
    /// own.
    #[must_use]
    pub fn visibly_differs_from(&self, other: &Self) -> bool {
        self.state != other.state
            || self.url != other.url
            || self.pod_name != other.pod_name
            || self.build_id != other.build_id
            || self.description != other.description
    }
}

/// A CI job record as stored in the cluster orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique record name, distinct from the job identity in the spec.
    pub name: String,
    /// Declarative half.
    pub spec: JobSpec,
    /// Mutable half.
    pub status: JobStatus,
}

impl JobRecord {
    /// Creates a new record in Triggered with `start_time` = now.
    #[must_use]
    pub fn new(name: impl Into<String>, spec: JobSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            status: JobStatus {
                state: JobState::Triggered,
                start_time: Utc::now(),
                ..JobStatus::default()
            },
        }
    }

    /// Returns true iff the record has completed.
    ///
    /// Completion is defined by `completion_time` being set; complete
    /// records are terminal and never mutated again.
    #[must_use]
    pub const fn complete(&self) -> bool {
        self.status.completion_time.is_some()
    }
}
