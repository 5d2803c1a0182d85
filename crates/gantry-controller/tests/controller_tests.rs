//! Integration tests for the gantry sync controller.
//!
//! These drive full ticks against the in-memory orchestrator and
//! forge, asserting on end-of-tick store state and on what reached the
//! reporter channel.

use std::sync::Arc;

use tokio::sync::mpsc;

use gantry_controller::build_id::{FailingBuildIdAllocator, SequenceBuildIdAllocator};
use gantry_controller::config::{Config, Presubmit};
use gantry_controller::controller::{Controller, BUILD_NUMBER_ENV};
use gantry_controller::error::{Error, Result};
use gantry_controller::forge::memory::InMemoryForge;
use gantry_controller::ids::SequenceIdGenerator;
use gantry_controller::orchestrator::memory::{InMemoryOrchestrator, InjectedFault};
use gantry_core::{
    Container, EnvVar, JobRecord, JobSpec, JobState, JobType, PodPhase, PodRecord, PodSpec,
    PodStatus, Pull, Refs, EVICTED,
};

struct Harness {
    orchestrator: Arc<InMemoryOrchestrator>,
    controller: Controller,
    reports: mpsc::Receiver<JobRecord>,
}

impl Harness {
    fn drain_reports(&mut self) -> Vec<JobRecord> {
        let mut reports = Vec::new();
        while let Ok(report) = self.reports.try_recv() {
            reports.push(report);
        }
        reports
    }

    fn job(&self, name: &str) -> JobRecord {
        self.orchestrator
            .jobs()
            .unwrap()
            .into_iter()
            .find(|j| j.name == name)
            .unwrap_or_else(|| panic!("job {name} not found"))
    }
}

fn base_config(max_concurrency: usize) -> Config {
    Config::builder()
        .job_url_template("{name}/{state}")
        .unwrap()
        .max_concurrency(max_concurrency)
        .presubmits(
            "kubernetes/kubernetes",
            vec![
                Presubmit::new("test-bazel-build").with_run_after_success(vec![
                    Presubmit::new("test-kubeadm-cloud")
                        .with_run_if_changed("^(cmd/kubeadm|build/debs).*$")
                        .unwrap(),
                ]),
                Presubmit::new("test-e2e")
                    .with_run_after_success(vec![Presubmit::new("push-image")]),
                Presubmit::new("test-bazel-test"),
            ],
        )
        .build()
        .unwrap()
}

fn harness_with_forge(
    config: Config,
    forge: InMemoryForge,
    jobs: Vec<JobRecord>,
    pods: Vec<PodRecord>,
) -> Harness {
    let orchestrator = Arc::new(InMemoryOrchestrator::new().with_jobs(jobs).with_pods(pods));
    let (reports_tx, reports) = mpsc::channel(128);
    let controller = Controller::new(
        Arc::clone(&orchestrator) as Arc<dyn gantry_controller::orchestrator::Orchestrator>,
        Arc::new(forge),
        Arc::new(SequenceBuildIdAllocator::starting_at(42)),
        Arc::new(SequenceIdGenerator::new()),
        config,
        reports_tx,
    );
    Harness {
        orchestrator,
        controller,
        reports,
    }
}

fn harness(config: Config, jobs: Vec<JobRecord>, pods: Vec<PodRecord>) -> Harness {
    harness_with_forge(config, InMemoryForge::new(), jobs, pods)
}

fn triggered(name: &str, job: &str, job_type: JobType) -> JobRecord {
    JobRecord::new(
        name,
        JobSpec {
            job: job.into(),
            job_type,
            ..JobSpec::default()
        },
    )
}

/// A Pending record in steady state: pod name and URL already set.
fn steady_pending(name: &str, job: &str) -> JobRecord {
    let mut record = triggered(name, job, JobType::Periodic);
    record.status.state = JobState::Pending;
    record.status.pod_name = Some(name.into());
    record.status.url = Some(format!("{name}/pending"));
    record
}

fn pod(name: &str, phase: PodPhase) -> PodRecord {
    PodRecord {
        name: name.into(),
        spec: PodSpec::default(),
        status: PodStatus {
            phase,
            reason: String::new(),
        },
    }
}

fn presubmit_refs() -> Refs {
    Refs {
        org: "kubernetes".into(),
        repo: "kubernetes".into(),
        base_ref: "baseref".into(),
        base_sha: "basesha".into(),
        pulls: vec![Pull {
            number: 100,
            author: "me".into(),
            sha: "sha".into(),
        }],
    }
}

// --- Non-pending reconciliation ---

#[tokio::test]
async fn completed_job_is_left_alone() -> Result<()> {
    let mut completed = triggered("done-1", "boop", JobType::Periodic);
    completed.status.state = JobState::Failure;
    completed.status.completion_time = Some(chrono::Utc::now());

    let mut h = harness(base_config(0), vec![completed], vec![]);
    h.controller.sync().await?;

    assert_eq!(h.job("done-1").status.state, JobState::Failure);
    assert_eq!(h.orchestrator.pod_count().unwrap(), 0);
    assert!(h.drain_reports().is_empty());
    Ok(())
}

#[tokio::test]
async fn triggered_job_starts_pod() -> Result<()> {
    let mut h = harness(
        base_config(0),
        vec![triggered("blabla", "boop", JobType::Periodic)],
        vec![],
    );
    h.controller.sync().await?;

    let record = h.job("blabla");
    assert_eq!(record.status.state, JobState::Pending);
    assert_eq!(record.status.pod_name.as_deref(), Some("blabla"));
    assert_eq!(record.status.build_id.as_deref(), Some("42"));
    assert!(!record.complete());

    let pods = h.orchestrator.pods().unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].name, "blabla");
    assert_eq!(pods[0].spec.restart_policy, "Never");
    assert_eq!(pods[0].env_value(BUILD_NUMBER_ENV), Some("42"));

    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status.url.as_deref(), Some("blabla/pending"));
    Ok(())
}

#[tokio::test]
async fn per_job_cap_keeps_job_triggered() -> Result<()> {
    let mut capped = triggered("beer", "same", JobType::Periodic);
    capped.spec.max_concurrency = 1;

    let mut h = harness(
        base_config(0),
        vec![steady_pending("same-42", "same"), capped],
        vec![pod("same-42", PodPhase::Running)],
    );
    h.controller.sync().await?;

    assert_eq!(h.job("beer").status.state, JobState::Triggered);
    assert_eq!(h.orchestrator.pod_count().unwrap(), 1);
    assert!(h.drain_reports().is_empty());
    Ok(())
}

#[tokio::test]
async fn global_cap_saturated_keeps_job_triggered() -> Result<()> {
    let mut jobs = Vec::new();
    let mut pods = Vec::new();
    for (identity, count) in [("motherearth", 10), ("allagash", 8), ("krusovice", 2)] {
        for i in 0..count {
            let name = format!("{identity}-{i}");
            jobs.push(steady_pending(&name, identity));
            pods.push(pod(&name, PodPhase::Running));
        }
    }
    jobs.push(triggered("beer", "same", JobType::Periodic));

    let mut h = harness(base_config(20), jobs, pods);
    h.controller.sync().await?;

    assert_eq!(h.job("beer").status.state, JobState::Triggered);
    assert_eq!(h.orchestrator.pod_count().unwrap(), 20);
    assert!(h.drain_reports().is_empty());
    Ok(())
}

#[tokio::test]
async fn global_cap_with_headroom_admits() -> Result<()> {
    let mut jobs = Vec::new();
    let mut pods = Vec::new();
    for (identity, count) in [("motherearth", 10), ("allagash", 8), ("krusovice", 2)] {
        for i in 0..count {
            let name = format!("{identity}-{i}");
            jobs.push(steady_pending(&name, identity));
            pods.push(pod(&name, PodPhase::Running));
        }
    }
    jobs.push(triggered("beer", "same", JobType::Periodic));

    let mut h = harness(base_config(21), jobs, pods);
    h.controller.sync().await?;

    assert_eq!(h.job("beer").status.state, JobState::Pending);
    assert_eq!(h.orchestrator.pod_count().unwrap(), 21);

    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status.url.as_deref(), Some("beer/pending"));
    Ok(())
}

#[tokio::test]
async fn unprocessable_pod_create_errors_the_job() -> Result<()> {
    let mut h = harness(
        base_config(0),
        vec![triggered("boop-1", "boop", JobType::Periodic)],
        vec![],
    );
    h.orchestrator
        .fail_pod_creates_with(InjectedFault::Unprocessable("no way jose".into()));
    h.controller.sync().await?;

    let record = h.job("boop-1");
    assert_eq!(record.status.state, JobState::Error);
    assert!(record.complete());
    assert_eq!(record.status.description, "Job cannot be processed.");
    assert_eq!(h.orchestrator.pod_count().unwrap(), 0);

    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);
    // The record never reached Pending, so no URL was rendered.
    assert!(reports[0].status.url.is_none());
    Ok(())
}

#[tokio::test]
async fn conflict_pod_create_is_transient() {
    let mut h = harness(
        base_config(0),
        vec![triggered("boop-1", "boop", JobType::Periodic)],
        vec![],
    );
    h.orchestrator
        .fail_pod_creates_with(InjectedFault::Conflict("no way jose".into()));

    let err = h.controller.sync().await.unwrap_err();
    assert!(matches!(err, Error::SyncAggregate { .. }));

    assert_eq!(h.job("boop-1").status.state, JobState::Triggered);
    assert!(h.drain_reports().is_empty());
}

#[tokio::test]
async fn unknown_pod_create_error_is_transient() {
    let mut h = harness(
        base_config(0),
        vec![triggered("boop-1", "boop", JobType::Periodic)],
        vec![],
    );
    h.orchestrator
        .fail_pod_creates_with(InjectedFault::Transport("no way unknown jose".into()));

    assert!(h.controller.sync().await.is_err());
    assert_eq!(h.job("boop-1").status.state, JobState::Triggered);
    assert!(h.drain_reports().is_empty());
}

#[tokio::test]
async fn existing_pod_recovers_build_id() -> Result<()> {
    let existing = PodRecord {
        name: "foo".into(),
        spec: PodSpec {
            containers: vec![Container {
                env: vec![EnvVar::new(BUILD_NUMBER_ENV, "0987654321")],
                ..Container::default()
            }],
            ..PodSpec::default()
        },
        status: PodStatus {
            phase: PodPhase::Running,
            reason: String::new(),
        },
    };
    let mut h = harness(
        base_config(0),
        vec![triggered("foo", "boop", JobType::Periodic)],
        vec![existing],
    );
    h.controller.sync().await?;

    let record = h.job("foo");
    assert_eq!(record.status.state, JobState::Pending);
    assert_eq!(record.status.build_id.as_deref(), Some("0987654321"));
    assert_eq!(h.orchestrator.pod_count().unwrap(), 1);

    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status.url.as_deref(), Some("foo/pending"));
    assert_eq!(reports[0].status.build_id.as_deref(), Some("0987654321"));
    Ok(())
}

#[tokio::test]
async fn recovered_pod_occupies_its_concurrency_slot() -> Result<()> {
    // Record A already owns an orphaned pod from a crashed prior tick;
    // record B of the same identity has none. With a cap of one, A's
    // recovery must count against the cap so B is denied in the same
    // tick.
    let mut recovering = triggered("recovered", "test-bazel-build", JobType::Postsubmit);
    recovering.spec.max_concurrency = 1;
    let mut late = triggered("late", "test-bazel-build", JobType::Postsubmit);
    late.spec.max_concurrency = 1;

    let orphan = PodRecord {
        name: "recovered".into(),
        spec: PodSpec {
            containers: vec![Container {
                env: vec![EnvVar::new(BUILD_NUMBER_ENV, "41")],
                ..Container::default()
            }],
            ..PodSpec::default()
        },
        status: PodStatus {
            phase: PodPhase::Running,
            reason: String::new(),
        },
    };

    let mut h = harness(base_config(0), vec![recovering, late], vec![orphan]);
    h.controller.sync().await?;

    assert_eq!(h.job("recovered").status.state, JobState::Pending);
    assert_eq!(h.job("late").status.state, JobState::Triggered);
    assert_eq!(h.orchestrator.pod_count().unwrap(), 1);

    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status.build_id.as_deref(), Some("41"));
    Ok(())
}

#[tokio::test]
async fn build_id_allocation_failure_defers_admission() {
    let orchestrator = Arc::new(InMemoryOrchestrator::new().with_jobs(vec![triggered(
        "boop-1",
        "boop",
        JobType::Periodic,
    )]));
    let (reports_tx, mut reports) = mpsc::channel(16);
    let controller = Controller::new(
        Arc::clone(&orchestrator) as Arc<dyn gantry_controller::orchestrator::Orchestrator>,
        Arc::new(InMemoryForge::new()),
        Arc::new(FailingBuildIdAllocator),
        Arc::new(SequenceIdGenerator::new()),
        base_config(0),
        reports_tx,
    );

    assert!(controller.sync().await.is_err());
    assert_eq!(orchestrator.jobs().unwrap()[0].status.state, JobState::Triggered);
    assert_eq!(orchestrator.pod_count().unwrap(), 0);
    assert!(reports.try_recv().is_err());
}

// --- Pending reconciliation ---

#[tokio::test]
async fn missing_pod_is_respawned() -> Result<()> {
    let mut record = triggered("boop-41", "boop", JobType::Postsubmit);
    record.status.state = JobState::Pending;
    record.status.pod_name = Some("boop-41".into());

    let mut h = harness(base_config(0), vec![record], vec![]);
    h.controller.sync().await?;

    let record = h.job("boop-41");
    assert_eq!(record.status.state, JobState::Pending);
    assert_eq!(h.orchestrator.pod_count().unwrap(), 1);

    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status.url.as_deref(), Some("boop-41/pending"));
    Ok(())
}

#[tokio::test]
async fn unknown_phase_pod_is_deleted() -> Result<()> {
    let mut h = harness(
        base_config(0),
        vec![steady_pending("boop-41", "boop")],
        vec![pod("boop-41", PodPhase::Unknown)],
    );
    h.controller.sync().await?;

    assert_eq!(h.job("boop-41").status.state, JobState::Pending);
    assert_eq!(h.orchestrator.pod_count().unwrap(), 0);
    assert!(h.drain_reports().is_empty());
    Ok(())
}

#[tokio::test]
async fn evicted_pod_is_deleted_without_failing_the_job() -> Result<()> {
    let mut evicted = pod("boop-42", PodPhase::Failed);
    evicted.status.reason = EVICTED.into();

    let mut h = harness(
        base_config(0),
        vec![steady_pending("boop-42", "boop")],
        vec![evicted],
    );
    h.controller.sync().await?;

    let record = h.job("boop-42");
    assert_eq!(record.status.state, JobState::Pending);
    assert!(!record.complete());
    assert_eq!(h.orchestrator.pod_count().unwrap(), 0);
    assert!(h.drain_reports().is_empty());
    Ok(())
}

#[tokio::test]
async fn succeeded_pod_completes_job_and_spawns_follow_on() -> Result<()> {
    let mut record = triggered("boop-42", "boop", JobType::Batch);
    record.status.state = JobState::Pending;
    record.status.pod_name = Some("boop-42".into());
    record.spec.run_after_success = vec![JobSpec {
        job: "push-image".into(),
        ..JobSpec::default()
    }];

    let mut h = harness(
        base_config(0),
        vec![record],
        vec![pod("boop-42", PodPhase::Succeeded)],
    );
    h.controller.sync().await?;

    let record = h.job("boop-42");
    assert_eq!(record.status.state, JobState::Success);
    assert!(record.complete());
    assert_eq!(record.status.description, "Job succeeded.");
    assert_eq!(h.orchestrator.pod_count().unwrap(), 1);

    let jobs = h.orchestrator.jobs().unwrap();
    assert_eq!(jobs.len(), 2);
    let child = jobs.iter().find(|j| j.spec.job == "push-image").unwrap();
    assert_eq!(child.status.state, JobState::Triggered);

    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status.url.as_deref(), Some("boop-42/success"));
    Ok(())
}

#[tokio::test]
async fn failed_pod_fails_job_without_follow_ons() -> Result<()> {
    let mut record = triggered("boop-42", "boop", JobType::Presubmit);
    record.spec.refs = Some(presubmit_refs());
    record.spec.run_after_success = vec![JobSpec {
        job: "push-image".into(),
        ..JobSpec::default()
    }];
    record.status.state = JobState::Pending;
    record.status.pod_name = Some("boop-42".into());

    let mut h = harness(
        base_config(0),
        vec![record],
        vec![pod("boop-42", PodPhase::Failed)],
    );
    h.controller.sync().await?;

    let record = h.job("boop-42");
    assert_eq!(record.status.state, JobState::Failure);
    assert!(record.complete());
    assert_eq!(h.orchestrator.job_count().unwrap(), 1);

    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status.url.as_deref(), Some("boop-42/failure"));
    Ok(())
}

#[tokio::test]
async fn running_pod_publishes_url_once() -> Result<()> {
    let mut record = triggered("boop-42", "boop", JobType::Periodic);
    record.status.state = JobState::Pending;
    record.status.pod_name = Some("boop-42".into());

    let mut h = harness(
        base_config(0),
        vec![record],
        vec![pod("boop-42", PodPhase::Running)],
    );

    // First observation publishes the URL.
    h.controller.sync().await?;
    let record = h.job("boop-42");
    assert_eq!(record.status.state, JobState::Pending);
    assert_eq!(record.status.url.as_deref(), Some("boop-42/pending"));
    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);

    // Steady state afterwards: no change, no report.
    h.controller.sync().await?;
    assert_eq!(h.job("boop-42"), record);
    assert!(h.drain_reports().is_empty());
    Ok(())
}

#[tokio::test]
async fn succeeded_pod_updates_previously_set_url() -> Result<()> {
    let mut record = steady_pending("boop-42", "boop");
    record.spec.run_after_success = vec![JobSpec {
        job: "push-image".into(),
        ..JobSpec::default()
    }];

    let mut h = harness(
        base_config(0),
        vec![record],
        vec![pod("boop-42", PodPhase::Succeeded)],
    );
    h.controller.sync().await?;

    let record = h.job("boop-42");
    assert_eq!(record.status.state, JobState::Success);
    assert_eq!(record.status.url.as_deref(), Some("boop-42/success"));
    assert_eq!(h.orchestrator.job_count().unwrap(), 2);

    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status.url.as_deref(), Some("boop-42/success"));
    Ok(())
}

#[tokio::test]
async fn unprocessable_respawn_errors_the_pending_job() -> Result<()> {
    let mut record = triggered("jose", "boop", JobType::Postsubmit);
    record.status.state = JobState::Pending;

    let mut h = harness(base_config(0), vec![record], vec![]);
    h.orchestrator
        .fail_pod_creates_with(InjectedFault::Unprocessable("no way jose".into()));
    h.controller.sync().await?;

    let record = h.job("jose");
    assert_eq!(record.status.state, JobState::Error);
    assert!(record.complete());

    let reports = h.drain_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status.url.as_deref(), Some("jose/error"));
    Ok(())
}

// --- Duplicate pruning ---

#[tokio::test]
async fn sync_aborts_superseded_presubmits() -> Result<()> {
    let mut newest = triggered("newest", "j1", JobType::Presubmit);
    newest.spec.refs = Some(presubmit_refs());
    newest.status.state = JobState::Pending;
    newest.status.pod_name = Some("newest".into());
    newest.status.url = Some("newest/pending".into());

    let mut old = newest.clone();
    old.name = "old".into();
    old.status.start_time = newest.status.start_time - chrono::Duration::hours(1);
    old.status.pod_name = Some("old".into());
    old.status.url = Some("old/pending".into());

    let mut h = harness(
        base_config(0),
        vec![newest, old],
        vec![
            pod("newest", PodPhase::Running),
            pod("old", PodPhase::Running),
        ],
    );
    h.controller.sync().await?;

    assert_eq!(h.job("old").status.state, JobState::Aborted);
    assert!(h.job("old").complete());
    assert_eq!(h.job("newest").status.state, JobState::Pending);
    // Pruning is not a reconcile-driven change; nothing is reported.
    assert!(h.drain_reports().is_empty());
    Ok(())
}

// --- Admission races within a tick ---

#[tokio::test]
async fn two_triggered_jobs_with_cap_one_start_one_pod() -> Result<()> {
    let mut first = triggered("build-1", "test-bazel-build", JobType::Postsubmit);
    first.spec.max_concurrency = 1;
    let mut second = triggered("build-2", "test-bazel-build", JobType::Postsubmit);
    second.spec.max_concurrency = 1;

    let mut h = harness(base_config(0), vec![first, second], vec![]);
    h.controller.sync().await?;

    assert_eq!(h.orchestrator.pod_count().unwrap(), 1);
    let states: Vec<JobState> = h
        .orchestrator
        .jobs()
        .unwrap()
        .iter()
        .map(|j| j.status.state)
        .collect();
    assert_eq!(
        states.iter().filter(|s| **s == JobState::Pending).count(),
        1
    );
    assert_eq!(
        states.iter().filter(|s| **s == JobState::Triggered).count(),
        1
    );
    assert_eq!(h.drain_reports().len(), 1);
    Ok(())
}

#[tokio::test]
async fn two_triggered_jobs_with_cap_two_both_start() -> Result<()> {
    let mut first = triggered("build-1", "test-bazel-build", JobType::Postsubmit);
    first.spec.max_concurrency = 2;
    let mut second = triggered("build-2", "test-bazel-build", JobType::Postsubmit);
    second.spec.max_concurrency = 2;

    let mut h = harness(base_config(0), vec![first, second], vec![]);
    h.controller.sync().await?;

    assert_eq!(h.orchestrator.pod_count().unwrap(), 2);
    assert_eq!(h.drain_reports().len(), 2);
    Ok(())
}

#[tokio::test]
async fn saturated_identity_starts_no_pods() -> Result<()> {
    let mut jobs = Vec::new();
    let mut pods = Vec::new();
    for i in 0..5 {
        let name = format!("test-bazel-build-{i}");
        jobs.push(steady_pending(&name, "test-bazel-build"));
        pods.push(pod(&name, PodPhase::Running));
    }
    for name in ["late-1", "late-2"] {
        let mut record = triggered(name, "test-bazel-build", JobType::Postsubmit);
        record.spec.max_concurrency = 5;
        jobs.push(record);
    }

    let h = harness(base_config(0), jobs, pods);
    h.controller.sync().await?;

    assert_eq!(h.orchestrator.pod_count().unwrap(), 5);
    assert_eq!(h.job("late-1").status.state, JobState::Triggered);
    assert_eq!(h.job("late-2").status.state, JobState::Triggered);
    Ok(())
}

// --- Follow-on eligibility ---

async fn follow_on_scenario(forge: InMemoryForge) -> Result<Harness> {
    let mut parent = triggered("bazel-1", "test-bazel-build", JobType::Presubmit);
    parent.spec.refs = Some(presubmit_refs());
    parent.spec.run_after_success = vec![JobSpec {
        job: "test-kubeadm-cloud".into(),
        job_type: JobType::Presubmit,
        refs: Some(presubmit_refs()),
        ..JobSpec::default()
    }];
    parent.status.state = JobState::Pending;
    parent.status.pod_name = Some("bazel-1".into());
    parent.status.url = Some("bazel-1/pending".into());

    let h = harness_with_forge(
        base_config(0),
        forge,
        vec![parent],
        vec![pod("bazel-1", PodPhase::Succeeded)],
    );
    h.controller.sync().await?;
    Ok(h)
}

#[tokio::test]
async fn follow_on_created_when_changes_match() -> Result<()> {
    let h = follow_on_scenario(InMemoryForge::with_changes(&[
        "cmd/kubeadm/kubeadm.go",
        "vendor/BUILD",
    ]))
    .await?;

    let jobs = h.orchestrator.jobs().unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().any(|j| j.spec.job == "test-kubeadm-cloud"));
    Ok(())
}

#[tokio::test]
async fn follow_on_skipped_when_changes_do_not_match() -> Result<()> {
    let h = follow_on_scenario(InMemoryForge::with_changes(&[
        "vendor/BUILD",
        ".gitattributes",
    ]))
    .await?;

    assert_eq!(h.orchestrator.job_count().unwrap(), 1);
    assert_eq!(h.job("bazel-1").status.state, JobState::Success);
    Ok(())
}

#[tokio::test]
async fn forge_failure_surfaces_and_skips_the_follow_on() {
    let forge = InMemoryForge::new();
    forge.fail_with("rate limited");

    let result = follow_on_scenario(forge).await;
    let err = result.err().expect("tick should surface the forge error");
    assert!(matches!(err, Error::SyncAggregate { .. }));
}

#[tokio::test]
async fn malformed_follow_on_is_skipped_but_surfaced() {
    let mut parent = triggered("boop-42", "boop", JobType::Batch);
    parent.status.state = JobState::Pending;
    parent.status.pod_name = Some("boop-42".into());
    parent.spec.run_after_success = vec![
        JobSpec {
            job: String::new(),
            ..JobSpec::default()
        },
        JobSpec {
            job: "push-image".into(),
            ..JobSpec::default()
        },
    ];

    let mut h = harness(
        base_config(0),
        vec![parent],
        vec![pod("boop-42", PodPhase::Succeeded)],
    );
    let err = h.controller.sync().await.unwrap_err();
    assert!(err.to_string().contains("job identity is empty"));

    // The valid sibling was still created and the parent completed.
    let jobs = h.orchestrator.jobs().unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().any(|j| j.spec.job == "push-image"));
    assert_eq!(h.job("boop-42").status.state, JobState::Success);
    assert_eq!(h.drain_reports().len(), 1);
}

#[tokio::test]
async fn forge_failure_still_completes_the_parent() {
    let forge = InMemoryForge::new();
    forge.fail_with("rate limited");

    let mut parent = triggered("bazel-1", "test-bazel-build", JobType::Presubmit);
    parent.spec.refs = Some(presubmit_refs());
    parent.spec.run_after_success = vec![JobSpec {
        job: "test-kubeadm-cloud".into(),
        ..JobSpec::default()
    }];
    parent.status.state = JobState::Pending;
    parent.status.pod_name = Some("bazel-1".into());

    let mut h = harness_with_forge(
        base_config(0),
        forge,
        vec![parent],
        vec![pod("bazel-1", PodPhase::Succeeded)],
    );
    assert!(h.controller.sync().await.is_err());

    // The Success transition persisted, so the next tick will not
    // re-run the follow-on fan-out and double-create children.
    let record = h.job("bazel-1");
    assert_eq!(record.status.state, JobState::Success);
    assert!(record.complete());
    assert_eq!(h.orchestrator.job_count().unwrap(), 1);
    assert_eq!(h.drain_reports().len(), 1);
}

// --- Periodic happy path across ticks ---

#[tokio::test]
async fn periodic_job_walks_through_its_lifecycle() -> Result<()> {
    let child_spec = JobSpec {
        job: "ci-periodic-job-2".into(),
        job_type: JobType::Periodic,
        pod_spec: Some(PodSpec::default()),
        ..JobSpec::default()
    };
    let spec = JobSpec {
        job: "ci-periodic-job".into(),
        job_type: JobType::Periodic,
        pod_spec: Some(PodSpec {
            containers: vec![Container {
                name: "test".into(),
                ..Container::default()
            }],
            ..PodSpec::default()
        }),
        run_after_success: vec![child_spec],
        ..JobSpec::default()
    };

    let h = harness(
        base_config(0),
        vec![JobRecord::new("ci-periodic-job-1", spec)],
        vec![],
    );

    // First tick starts the pod.
    h.controller.sync().await?;
    let pods = h.orchestrator.pods().unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].spec.containers.len(), 1);
    assert!(!pods[0].spec.containers[0].env.is_empty());
    assert_eq!(h.job("ci-periodic-job-1").status.state, JobState::Pending);

    // Second tick is steady state.
    h.controller.sync().await?;
    assert_eq!(h.orchestrator.pod_count().unwrap(), 1);

    // The pod finishes; third tick completes the record and spawns the
    // follow-on.
    h.orchestrator
        .set_pod_status(
            "ci-periodic-job-1",
            PodStatus {
                phase: PodPhase::Succeeded,
                reason: String::new(),
            },
        )
        .unwrap();
    h.controller.sync().await?;
    let record = h.job("ci-periodic-job-1");
    assert!(record.complete());
    assert_eq!(record.status.state, JobState::Success);
    assert_eq!(h.orchestrator.job_count().unwrap(), 2);

    // Fourth tick starts the follow-on's pod.
    h.controller.sync().await?;
    assert_eq!(h.orchestrator.pod_count().unwrap(), 2);
    let jobs = h.orchestrator.jobs().unwrap();
    let child = jobs
        .iter()
        .find(|j| j.spec.job == "ci-periodic-job-2")
        .unwrap();
    assert_eq!(child.status.state, JobState::Pending);
    Ok(())
}
