//! The sync controller.
//!
//! One [`Controller::sync`] call is one tick:
//!
//! 1. **Snapshot** all job records and pods from the orchestrator and
//!    index pods by name.
//! 2. **Prune duplicates**: superseded presubmit/postsubmit runs are
//!    aborted, newest wins.
//! 3. **Partition** the snapshot into pending and non-pending records.
//! 4. **Reconcile** both partitions concurrently through bounded
//!    fan-out stages.
//! 5. **Report**: records whose visible status changed are forwarded
//!    to the reporter channel.
//!
//! Ticks are serialized by the driver and never overlap. Every state
//! mutation is persisted to the orchestrator immediately, so a tick
//! that fails part-way resumes from the evolved baseline. Per-record
//! errors never abort a tick; they are aggregated into
//! [`Error::SyncAggregate`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::Instrument;

use gantry_core::observability::reconcile_span;
use gantry_core::{
    Container, EnvVar, JobRecord, JobState, JobStatus, JobType, PodPhase, PodRecord, PodSpec,
};

use crate::admission::{AdmissionDecision, AdmissionDenialReason, PendingCounts};
use crate::build_id::BuildIdAllocator;
use crate::config::Config;
use crate::dedup;
use crate::error::{Error, Result};
use crate::follow_on;
use crate::forge::Forge;
use crate::ids::IdGenerator;
use crate::metrics::{ControllerMetrics, TimingGuard};
use crate::orchestrator::{Orchestrator, Selector};

/// Upper bound on concurrent per-record reconciles within one stage.
const MAX_SYNC_WORKERS: usize = 20;

/// Environment variable carrying the allocated build number.
///
/// Also read back out of existing pods to recover the build ID after a
/// controller restart mid-admission.
pub const BUILD_NUMBER_ENV: &str = "BUILD_NUMBER";

const JOB_NAME_ENV: &str = "JOB_NAME";
const REPO_OWNER_ENV: &str = "REPO_OWNER";
const REPO_NAME_ENV: &str = "REPO_NAME";
const PULL_BASE_REF_ENV: &str = "PULL_BASE_REF";
const PULL_BASE_SHA_ENV: &str = "PULL_BASE_SHA";
const PULL_REFS_ENV: &str = "PULL_REFS";
const PULL_NUMBER_ENV: &str = "PULL_NUMBER";
const PULL_PULL_SHA_ENV: &str = "PULL_PULL_SHA";

/// Name → pod index over one tick's pod snapshot.
type PodIndex = HashMap<String, PodRecord>;

/// The job reconciliation controller.
///
/// Holds shared handles to the external collaborators and the per-tick
/// pending-count map. One instance is driven by an external timer or
/// trigger; [`Controller::sync`] must not be invoked concurrently with
/// itself.
pub struct Controller {
    orchestrator: Arc<dyn Orchestrator>,
    forge: Arc<dyn Forge>,
    build_ids: Arc<dyn BuildIdAllocator>,
    ids: Arc<dyn IdGenerator>,
    config: RwLock<Arc<Config>>,
    pending: PendingCounts,
    reporter: mpsc::Sender<JobRecord>,
    metrics: ControllerMetrics,
}

impl Controller {
    /// Creates a controller over the given collaborators.
    ///
    /// `reporter` is the externally owned sink for records whose
    /// visible status changed during a tick. Its buffer is presumed
    /// ample; a full or closed reporter surfaces as
    /// [`Error::ReporterWedged`].
    #[must_use]
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        forge: Arc<dyn Forge>,
        build_ids: Arc<dyn BuildIdAllocator>,
        ids: Arc<dyn IdGenerator>,
        config: Config,
        reporter: mpsc::Sender<JobRecord>,
    ) -> Self {
        Self {
            orchestrator,
            forge,
            build_ids,
            ids,
            config: RwLock::new(Arc::new(config)),
            pending: PendingCounts::new(),
            reporter,
            metrics: ControllerMetrics::new(),
        }
    }

    /// Swaps the configuration used by subsequent ticks.
    pub fn update_config(&self, config: Config) {
        *self
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    fn config(&self) -> Arc<Config> {
        Arc::clone(
            &self
                .config
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Runs one sync tick.
    ///
    /// Returns `Ok` iff every per-record reconcile succeeded.
    ///
    /// # Errors
    ///
    /// Snapshot and pruning failures abort the tick; per-record
    /// failures are aggregated into [`Error::SyncAggregate`] after
    /// both fan-out stages drain.
    pub async fn sync(&self) -> Result<()> {
        let tick_metrics = self.metrics.clone();
        let _tick_timer = TimingGuard::new(move |d| tick_metrics.observe_tick_duration(d));

        let selector = Selector::new();
        let mut jobs = self.orchestrator.list_jobs(&selector).await?;
        let pods = self.orchestrator.list_pods(&selector).await?;
        let pod_index: PodIndex = pods.into_iter().map(|p| (p.name.clone(), p)).collect();

        // Prune duplicates, persisting each abort and folding it back
        // into the snapshot so partitioning sees the evolved state.
        let aborted = dedup::find_duplicates(&jobs, Utc::now());
        self.metrics.record_pruned(aborted.len());
        for duplicate in aborted {
            self.orchestrator
                .replace_job(&duplicate.name, duplicate.clone())
                .await?;
            if let Some(slot) = jobs.iter_mut().find(|j| j.name == duplicate.name) {
                *slot = duplicate;
            }
        }

        self.pending.rebuild(
            jobs.iter()
                .filter(|j| j.status.state == JobState::Pending)
                .map(|j| j.spec.job.as_str()),
        );
        self.metrics.set_pending_jobs(self.pending.total_pending());

        let (pending, non_pending): (Vec<_>, Vec<_>) = jobs
            .into_iter()
            .partition(|j| j.status.state == JobState::Pending);

        // Per-tick report buffer, sized so no reconcile can block on it.
        let capacity = (pending.len() + non_pending.len()).max(1) * 2 + 16;
        let (reports_tx, mut reports_rx) = mpsc::channel(capacity);

        let (mut errors, non_pending_errors) = tokio::join!(
            self.sync_stage("pending", pending, &pod_index, &reports_tx),
            self.sync_stage("non_pending", non_pending, &pod_index, &reports_tx),
        );
        errors.extend(non_pending_errors);
        drop(reports_tx);

        let mut forwarded = 0usize;
        while let Some(report) = reports_rx.recv().await {
            match self.reporter.try_send(report) {
                Ok(()) => forwarded += 1,
                Err(err) => {
                    let record = match err {
                        mpsc::error::TrySendError::Full(r)
                        | mpsc::error::TrySendError::Closed(r) => r.name,
                    };
                    errors.push(Error::ReporterWedged { record });
                }
            }
        }
        self.metrics.record_reports(forwarded);

        Error::aggregate(errors)
    }

    /// Drains one partition through a bounded fan-out, collecting
    /// per-record errors.
    async fn sync_stage(
        &self,
        stage: &'static str,
        jobs: Vec<JobRecord>,
        pods: &PodIndex,
        reports: &mpsc::Sender<JobRecord>,
    ) -> Vec<Error> {
        let results: Vec<Result<()>> = futures::stream::iter(jobs)
            .map(|job| {
                let reports = reports.clone();
                let span = reconcile_span(stage, &job.name, &job.spec.job);
                async move {
                    let outcome = if job.status.state == JobState::Pending {
                        self.sync_pending_job(job, pods, &reports).await
                    } else {
                        self.sync_non_pending_job(job, pods, &reports).await
                    };
                    if let Err(err) = &outcome {
                        tracing::warn!(error = %err, "reconcile failed");
                    }
                    self.metrics.record_reconcile(stage, outcome.is_ok());
                    outcome
                }
                .instrument(span)
            })
            .buffer_unordered(MAX_SYNC_WORKERS)
            .collect()
            .await;

        results.into_iter().filter_map(Result::err).collect()
    }

    /// Reconciles a record in Triggered or a terminal state.
    async fn sync_non_pending_job(
        &self,
        mut job: JobRecord,
        pods: &PodIndex,
        reports: &mpsc::Sender<JobRecord>,
    ) -> Result<()> {
        if job.complete() {
            return Ok(());
        }

        let snapshot = job.status.clone();
        let config = self.config();

        // Pods are named after their record, so an existing pod means a
        // previous tick got as far as creating it before the record
        // update was lost. Recover instead of double-starting.
        let started = match pods.get(&job.name) {
            Some(pod) => {
                // The snapshot counted only Pending records; this one
                // owns a pod without having been counted, so register
                // it before peers admit against the same identity.
                self.pending.register(&job.spec.job);
                Some((
                    pod.env_value(BUILD_NUMBER_ENV).unwrap_or_default().to_string(),
                    pod.name.clone(),
                ))
            }
            None => {
                match self.pending.try_admit(&job.spec, config.max_concurrency) {
                    AdmissionDecision::Denied { reason } => {
                        self.metrics.record_admission_denial(match &reason {
                            AdmissionDenialReason::GlobalSaturated { .. } => "global",
                            AdmissionDenialReason::JobSaturated { .. } => "job",
                        });
                        tracing::debug!(reason = %reason, "admission denied; retrying next tick");
                        return Ok(());
                    }
                    AdmissionDecision::Admitted => {}
                }
                match self.start_pod(&job).await {
                    Ok((build_id, pod_name)) => Some((build_id, pod_name)),
                    Err(Error::Orchestrator(err)) if err.is_unprocessable() => {
                        job.status.state = JobState::Error;
                        job.status.completion_time = Some(Utc::now());
                        job.status.description = "Job cannot be processed.".into();
                        None
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        if let Some((build_id, pod_name)) = started {
            if job.status.state == JobState::Triggered {
                job.status.state = JobState::Pending;
                job.status.pod_name = Some(pod_name);
                job.status.build_id = Some(build_id);
                job.status.description = "Job triggered.".into();
                job.status.url = Some(config.job_url_template.render(&job));
            }
        }

        self.persist_and_report(job, &snapshot, &config, reports)
            .await
    }

    /// Reconciles a record in Pending against its pod's phase.
    async fn sync_pending_job(
        &self,
        mut job: JobRecord,
        pods: &PodIndex,
        reports: &mpsc::Sender<JobRecord>,
    ) -> Result<()> {
        let snapshot = job.status.clone();
        let config = self.config();
        let mut follow_on_error: Option<Error> = None;

        let pod = job
            .status
            .pod_name
            .as_ref()
            .and_then(|name| pods.get(name));

        match pod {
            None => {
                // The pod went missing (manual deletion, node reaper).
                // Mint a replacement under the same name.
                match self.start_pod(&job).await {
                    Ok((build_id, pod_name)) => {
                        job.status.build_id = Some(build_id);
                        job.status.pod_name = Some(pod_name);
                    }
                    Err(Error::Orchestrator(err)) if err.is_unprocessable() => {
                        job.status.state = JobState::Error;
                        job.status.completion_time = Some(Utc::now());
                        job.status.description = "Job cannot be processed.".into();
                    }
                    Err(err) => return Err(err),
                }
            }
            Some(pod) => match pod.status.phase {
                PodPhase::Unknown => {
                    // Lost contact with the pod's host; delete it and
                    // respawn on a later tick.
                    self.orchestrator.delete_pod(&pod.name).await?;
                    return Ok(());
                }
                PodPhase::Failed if pod.status.evicted() => {
                    self.orchestrator.delete_pod(&pod.name).await?;
                    return Ok(());
                }
                PodPhase::Failed => {
                    job.status.state = JobState::Failure;
                    job.status.completion_time = Some(Utc::now());
                    job.status.description = "Job failed.".into();
                }
                PodPhase::Succeeded => {
                    job.status.state = JobState::Success;
                    job.status.completion_time = Some(Utc::now());
                    job.status.description = "Job succeeded.".into();
                    follow_on_error = self.materialize_follow_ons(&job, &config).await;
                }
                PodPhase::Running | PodPhase::Pending => {
                    if job.status.url.is_some() {
                        // Steady state: nothing visible can change.
                        return Ok(());
                    }
                }
            },
        }

        job.status.url = Some(config.job_url_template.render(&job));
        self.persist_and_report(job, &snapshot, &config, reports)
            .await?;

        match follow_on_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Creates every eligible follow-on of a freshly successful parent.
    ///
    /// The parent's Success transition is persisted by the caller even
    /// when a follow-on fails; retrying the whole record next tick
    /// would re-create the children that did get through. The first
    /// failure is returned for aggregation instead.
    async fn materialize_follow_ons(&self, parent: &JobRecord, config: &Config) -> Option<Error> {
        let mut first_error = None;
        for child in &parent.spec.run_after_success {
            // Embedded specs are user-authored; a malformed identity
            // would mint an unnameable record.
            if let Err(err) = child.validate() {
                first_error.get_or_insert(Error::Core(err));
                continue;
            }
            let eligible =
                match follow_on::can_run_after_success(parent, &child.job, config, &*self.forge)
                    .await
                {
                    Ok(eligible) => eligible,
                    Err(err) => {
                        first_error.get_or_insert(Error::Forge(err));
                        continue;
                    }
                };
            if !eligible {
                continue;
            }
            let record = follow_on::materialize(child, &self.ids.next_id());
            if let Err(err) = self.orchestrator.create_job(record).await {
                first_error.get_or_insert(Error::Orchestrator(err));
            }
        }
        first_error
    }

    /// Allocates a build ID and starts the record's pod.
    ///
    /// Returns the build ID and the pod name. Allocation failures and
    /// orchestrator errors propagate untouched for the caller to
    /// classify.
    async fn start_pod(&self, job: &JobRecord) -> Result<(String, String)> {
        let build_id = self.build_ids.allocate(&job.spec.job).await?;
        let pod = build_pod(job, &build_id);
        let created = self.orchestrator.create_pod(pod).await?;
        Ok((build_id, created.name))
    }

    /// Persists a mutated record and forwards it to the per-tick
    /// report buffer when its visible status changed.
    async fn persist_and_report(
        &self,
        mut job: JobRecord,
        snapshot: &JobStatus,
        config: &Config,
        reports: &mpsc::Sender<JobRecord>,
    ) -> Result<()> {
        if !job.status.visibly_differs_from(snapshot) {
            return Ok(());
        }

        match self.orchestrator.replace_job(&job.name, job.clone()).await {
            Ok(_) => {}
            Err(err) if err.is_unprocessable() => {
                job.status.state = JobState::Error;
                job.status.completion_time = Some(Utc::now());
                job.status.description = "Error updating job status.".into();
                job.status.url = Some(config.job_url_template.render(&job));
                if let Err(err) = self.orchestrator.replace_job(&job.name, job.clone()).await {
                    tracing::warn!(record = %job.name, error = %err,
                        "failed to persist terminal error state");
                }
            }
            Err(err) => return Err(err.into()),
        }

        reports
            .try_send(job)
            .map_err(|err| Error::ReporterWedged {
                record: match err {
                    mpsc::error::TrySendError::Full(r)
                    | mpsc::error::TrySendError::Closed(r) => r.name,
                },
            })
    }
}

/// Materializes the record's pod template into a startable pod.
///
/// The pod is named after the record, restart policy is forced to
/// `Never`, and the standard environment is appended to every
/// container.
fn build_pod(job: &JobRecord, build_id: &str) -> PodRecord {
    let mut spec = job.spec.pod_spec.clone().unwrap_or_else(|| PodSpec {
        containers: vec![Container::default()],
        ..PodSpec::default()
    });
    spec.restart_policy = "Never".into();

    let env = standard_env(job, build_id);
    for container in &mut spec.containers {
        container.env.extend(env.iter().cloned());
    }

    PodRecord {
        name: job.name.clone(),
        spec,
        status: gantry_core::PodStatus::default(),
    }
}

/// The standard environment injected into every job container.
fn standard_env(job: &JobRecord, build_id: &str) -> Vec<EnvVar> {
    let mut env = vec![
        EnvVar::new(JOB_NAME_ENV, &job.spec.job),
        EnvVar::new(BUILD_NUMBER_ENV, build_id),
    ];

    let Some(refs) = &job.spec.refs else {
        return env;
    };
    if job.spec.job_type == JobType::Periodic {
        return env;
    }
    env.push(EnvVar::new(REPO_OWNER_ENV, &refs.org));
    env.push(EnvVar::new(REPO_NAME_ENV, &refs.repo));
    env.push(EnvVar::new(PULL_BASE_REF_ENV, &refs.base_ref));
    env.push(EnvVar::new(PULL_BASE_SHA_ENV, &refs.base_sha));
    env.push(EnvVar::new(PULL_REFS_ENV, refs.to_string()));

    if job.spec.job_type != JobType::Presubmit {
        return env;
    }
    if let Some(pull) = refs.pulls.first() {
        env.push(EnvVar::new(PULL_NUMBER_ENV, pull.number.to_string()));
        env.push(EnvVar::new(PULL_PULL_SHA_ENV, &pull.sha));
    }
    env
}
