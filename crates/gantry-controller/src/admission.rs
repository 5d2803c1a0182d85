//! Admission control for pod starts.
//!
//! Two independent limits gate the Triggered → Pending transition; the
//! stricter wins:
//!
//! - a **global** cap on pending pods across all job identities
//! - a **per-identity** cap carried on the job spec
//!
//! Both are enforced against a per-tick count of pending records,
//! rebuilt from the snapshot at the start of every tick so the counts
//! cannot drift from the store of record.
//!
//! ## Design Principles
//!
//! - **Strictly serializable**: check and reserve happen under one
//!   write-lock acquisition, so two records of the same identity
//!   racing for a cap of 1 see one admitted and one denied within the
//!   same tick
//! - **Per attempt**: admission is evaluated every time a pod start is
//!   considered, never cached across records

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use gantry_core::JobSpec;

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The pod may start; the pending count was reserved.
    Admitted,
    /// The pod may not start this tick.
    Denied {
        /// Reason for denial.
        reason: AdmissionDenialReason,
    },
}

impl AdmissionDecision {
    /// Returns true if the pod may start.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Reason for admission denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDenialReason {
    /// The global pending-pod cap is saturated.
    GlobalSaturated {
        /// Pending pods across all identities.
        pending: usize,
        /// The configured global cap.
        limit: usize,
    },
    /// The job identity's own cap is saturated.
    JobSaturated {
        /// The job identity.
        job: String,
        /// Pending records of this identity.
        pending: usize,
        /// The identity's cap.
        limit: usize,
    },
}

impl std::fmt::Display for AdmissionDenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GlobalSaturated { pending, limit } => {
                write!(f, "global concurrency saturated: {pending}/{limit}")
            }
            Self::JobSaturated {
                job,
                pending,
                limit,
            } => {
                write!(f, "{job} concurrency saturated: {pending}/{limit}")
            }
        }
    }
}

/// Per-tick pending-record counts, keyed by job identity.
///
/// ## Thread Safety
///
/// Shared across the fan-out workers of a tick behind a `RwLock`.
/// Reads (sums for observability) take the read half; admission takes
/// the write half for the whole check-and-reserve.
#[derive(Debug, Default)]
pub struct PendingCounts {
    counts: RwLock<HashMap<String, usize>>,
}

impl PendingCounts {
    /// Creates an empty counter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the counts with ones tallied from a snapshot.
    ///
    /// Called at the start of every tick with one increment per record
    /// currently in Pending.
    pub fn rebuild<'a>(&self, pending_identities: impl Iterator<Item = &'a str>) {
        let mut counts = HashMap::new();
        for identity in pending_identities {
            *counts.entry(identity.to_string()).or_insert(0) += 1;
        }
        *self
            .counts
            .write()
            .unwrap_or_else(PoisonError::into_inner) = counts;
    }

    /// Checks both caps and reserves a slot when admitted.
    ///
    /// The check and the increment happen under one write-lock
    /// acquisition so that peer workers admitting in parallel observe
    /// the reservation.
    pub fn try_admit(&self, spec: &JobSpec, global_max: usize) -> AdmissionDecision {
        let mut counts = self
            .counts
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if global_max > 0 {
            let pending: usize = counts.values().sum();
            if pending >= global_max {
                return AdmissionDecision::Denied {
                    reason: AdmissionDenialReason::GlobalSaturated {
                        pending,
                        limit: global_max,
                    },
                };
            }
        }

        let entry = counts.entry(spec.job.clone()).or_insert(0);
        if spec.max_concurrency > 0 && *entry >= spec.max_concurrency {
            return AdmissionDecision::Denied {
                reason: AdmissionDenialReason::JobSaturated {
                    job: spec.job.clone(),
                    pending: *entry,
                    limit: spec.max_concurrency,
                },
            };
        }

        *entry += 1;
        AdmissionDecision::Admitted
    }

    /// Registers occupancy for a record that already owns a pod.
    ///
    /// Used when a prior tick created the pod but lost the record
    /// update: the pod exists, so the identity occupies a slot this
    /// tick's snapshot did not count. Recovery must never be
    /// cap-denied after the fact, so this bypasses both caps; peers
    /// admitting through [`PendingCounts::try_admit`] in the same tick
    /// observe the increment.
    pub fn register(&self, job: &str) {
        let mut counts = self
            .counts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *counts.entry(job.to_string()).or_insert(0) += 1;
    }

    /// Returns the pending count for one job identity.
    #[must_use]
    pub fn pending_for(&self, job: &str) -> usize {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the pending count summed across identities.
    #[must_use]
    pub fn total_pending(&self) -> usize {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(job: &str, max_concurrency: usize) -> JobSpec {
        JobSpec {
            job: job.into(),
            max_concurrency,
            ..JobSpec::default()
        }
    }

    fn seeded(entries: &[(&str, usize)]) -> PendingCounts {
        let counts = PendingCounts::new();
        counts.rebuild(
            entries
                .iter()
                .flat_map(|(job, n)| std::iter::repeat(*job).take(*n)),
        );
        counts
    }

    #[test]
    fn unlimited_admits() {
        let counts = PendingCounts::new();
        assert!(counts.try_admit(&spec("boop", 0), 0).is_admitted());
        assert_eq!(counts.pending_for("boop"), 1);
    }

    #[test]
    fn global_cap_is_strict() {
        let counts = seeded(&[("motherearth", 10), ("allagash", 8), ("krusovice", 2)]);

        let denied = counts.try_admit(&spec("same", 0), 20);
        assert_eq!(
            denied,
            AdmissionDecision::Denied {
                reason: AdmissionDenialReason::GlobalSaturated {
                    pending: 20,
                    limit: 20,
                }
            }
        );

        // One more slot of headroom admits and reserves.
        assert!(counts.try_admit(&spec("same", 0), 21).is_admitted());
        assert_eq!(counts.total_pending(), 21);
    }

    #[test]
    fn per_job_cap_is_strict() {
        let counts = seeded(&[("same", 1)]);
        let denied = counts.try_admit(&spec("same", 1), 0);
        assert!(!denied.is_admitted());

        assert!(counts.try_admit(&spec("same", 2), 0).is_admitted());
        assert_eq!(counts.pending_for("same"), 2);
    }

    #[test]
    fn admission_reserves_for_peers() {
        let counts = PendingCounts::new();
        assert!(counts.try_admit(&spec("test-bazel-build", 1), 0).is_admitted());
        // A peer in the same tick now sees the reservation.
        assert!(!counts.try_admit(&spec("test-bazel-build", 1), 0).is_admitted());
    }

    #[test]
    fn register_bypasses_caps_but_is_visible_to_peers() {
        let counts = PendingCounts::new();

        // A recovered pod occupies its slot regardless of caps.
        counts.register("test-bazel-build");
        assert_eq!(counts.pending_for("test-bazel-build"), 1);

        // A peer admitting against the same identity sees it.
        assert!(!counts.try_admit(&spec("test-bazel-build", 1), 0).is_admitted());

        // Registration itself is never denied, even past the cap.
        counts.register("test-bazel-build");
        assert_eq!(counts.pending_for("test-bazel-build"), 2);
    }

    #[test]
    fn rebuild_resets_counts() {
        let counts = seeded(&[("boop", 3)]);
        assert_eq!(counts.pending_for("boop"), 3);
        counts.rebuild(std::iter::empty());
        assert_eq!(counts.pending_for("boop"), 0);
        assert_eq!(counts.total_pending(), 0);
    }

    #[test]
    fn denial_reason_display() {
        let reason = AdmissionDenialReason::JobSaturated {
            job: "same".into(),
            pending: 1,
            limit: 1,
        };
        assert!(reason.to_string().contains("1/1"));
    }
}
