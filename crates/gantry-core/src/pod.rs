//! Workload pod model.
//!
//! Pods are the orchestrator-native unit of execution. The controller
//! creates one pod per admitted job and observes its phase; it never
//! mutates a pod in place, and deletes one only to force a respawn.

use serde::{Deserialize, Serialize};

/// Reason string the orchestrator attaches to pods it evicted.
pub const EVICTED: &str = "Evicted";

/// The observed phase of a pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    /// Accepted but not all containers are running yet.
    #[default]
    Pending,
    /// At least one container is running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container terminated in failure.
    Failed,
    /// The orchestrator lost contact with the pod's host.
    Unknown,
}

/// The observed status of a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    /// Current lifecycle phase.
    #[serde(default)]
    pub phase: PodPhase,
    /// Orchestrator-provided detail, e.g. `Evicted`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl PodStatus {
    /// Returns true if the pod was evicted from its host.
    ///
    /// Eviction is recoverable: the controller deletes the pod and
    /// respawns it on a later tick.
    #[must_use]
    pub fn evicted(&self) -> bool {
        self.phase == PodPhase::Failed && self.reason == EVICTED
    }
}

/// A name/value pair injected into a container environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

impl EnvVar {
    /// Creates a new environment variable.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A container within a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Container name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Image reference.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Entrypoint override.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Arguments to the entrypoint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// The declarative half of a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    /// Containers to run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    /// Restart policy; the controller forces `Never` on pods it mints.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restart_policy: String,
}

/// A workload pod as stored in the cluster orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRecord {
    /// Pod name; matches the owning job record's `pod_name`.
    pub name: String,
    /// Declarative half.
    #[serde(default)]
    pub spec: PodSpec,
    /// Observed status.
    #[serde(default)]
    pub status: PodStatus,
}

impl PodRecord {
    /// Looks up an environment variable across the pod's containers.
    ///
    /// Used to recover the build ID (`BUILD_NUMBER`) from a pod that
    /// already exists when the controller restarts mid-admission.
    #[must_use]
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.spec
            .containers
            .iter()
            .flat_map(|c| c.env.iter())
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }
}
