//! Follow-on job materialization.
//!
//! A job spec may embed child specs under `run_after_success`. When
//! the parent transitions to Success, each eligible child is
//! materialized into a fresh Triggered record. The follow-on graph is
//! a DAG of embedded specs; materialized records carry no pointer back
//! to the parent.

use gantry_core::{JobRecord, JobSpec, JobType};

use crate::config::Config;
use crate::forge::{Forge, ForgeResult};

/// Decides whether a follow-on may run after its parent succeeded.
///
/// Presubmit parents run against a pull request, so their follow-ons
/// can be gated on the change-set: a catalog entry with
/// `run_if_changed` runs iff at least one changed file matches.
/// Everything else is eligible without consulting the forge.
///
/// # Errors
///
/// Surfaces the forge error when the change-set cannot be fetched; the
/// follow-on is not created in that case.
pub async fn can_run_after_success(
    parent: &JobRecord,
    child_job: &str,
    config: &Config,
    forge: &dyn Forge,
) -> ForgeResult<bool> {
    if parent.spec.job_type != JobType::Presubmit {
        return Ok(true);
    }
    let Some(refs) = &parent.spec.refs else {
        return Ok(true);
    };
    let Some(entry) = config.find_presubmit(&refs.slug(), child_job) else {
        return Ok(true);
    };
    if entry.run_if_changed.is_none() {
        return Ok(true);
    }
    let Some(pull) = refs.pulls.first() else {
        return Ok(true);
    };

    let changes = forge
        .get_pull_request_changes(&refs.org, &refs.repo, pull.number)
        .await?;
    let filenames: Vec<&str> = changes.iter().map(|c| c.filename.as_str()).collect();
    Ok(entry.runs_against_changes(&filenames))
}

/// Materializes a child spec into a fresh Triggered record.
///
/// The record name embeds a unique suffix so repeated parents of the
/// same identity never collide.
#[must_use]
pub fn materialize(child: &JobSpec, unique_id: &str) -> JobRecord {
    JobRecord::new(format!("{}-{unique_id}", child.job), child.clone())
}
