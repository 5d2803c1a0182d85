//! Duplicate pruning.
//!
//! A new push to a pull request triggers a fresh record for each of
//! its jobs while older runs may still be live. Only the newest run
//! per identity is worth finishing; the rest are aborted.
//!
//! Pruning is pure: it returns the records to abort and the caller
//! persists them. This keeps the grouping logic trivially testable.

use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use gantry_core::{JobRecord, JobState, JobType, Pull};

/// Grouping key for duplicate detection.
///
/// Two records are duplicates when they share a job identity and run
/// against the same change-set. Batch and periodic jobs have no
/// canonical latest identity under this grouping and are exempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DuplicateKey {
    job: String,
    org: String,
    repo: String,
    pulls: Vec<Pull>,
}

impl DuplicateKey {
    fn for_record(record: &JobRecord) -> Self {
        let refs = record.spec.refs.clone().unwrap_or_default();
        Self {
            job: record.spec.job.clone(),
            org: refs.org,
            repo: refs.repo,
            pulls: refs.pulls,
        }
    }
}

/// Marks a record aborted as of `now`.
fn abort(mut record: JobRecord, now: DateTime<Utc>) -> JobRecord {
    record.status.state = JobState::Aborted;
    record.status.completion_time = Some(now);
    record
}

/// Finds superseded records in a snapshot.
///
/// Groups non-complete presubmit and postsubmit records by
/// `(job, org, repo, pulls)`; within each group the record with the
/// latest `start_time` survives and every other member is returned
/// rewritten as Aborted with `completion_time = now`.
#[must_use]
pub fn find_duplicates(jobs: &[JobRecord], now: DateTime<Utc>) -> Vec<JobRecord> {
    let mut newest: HashMap<DuplicateKey, &JobRecord> = HashMap::new();
    let mut aborted = Vec::new();

    for record in jobs {
        if record.complete() {
            continue;
        }
        if !matches!(
            record.spec.job_type,
            JobType::Presubmit | JobType::Postsubmit
        ) {
            continue;
        }

        let key = DuplicateKey::for_record(record);
        match newest.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                let prev = slot.get_mut();
                if prev.status.start_time < record.status.start_time {
                    aborted.push(abort((*prev).clone(), now));
                    *prev = record;
                } else {
                    aborted.push(abort(record.clone(), now));
                }
            }
        }
    }

    aborted
}
