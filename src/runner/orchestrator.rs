//! The orchestrator control loop.
//!
//! One call to [`Orchestrator::run_pass`] is one pass:
//!
//! 1. apply the automatic retry policy, if configured
//! 2. materialize missing work items (resume seeds, adoption, external steps)
//! 3. reconcile in-flight items with the scheduler, cancelling overruns
//! 4. pre-filter and submit the frontier
//! 5. persist a run record and report
//!
//! A pass never waits for jobs; progress happens across passes. Passes are
//! re-entrant: nothing `Submitted`, `Running` or `Succeeded` is submitted
//! again.

use crate::cohort::PairKey;
use crate::config::{FlowConfig, RetryMode};
use crate::error::{FlowError, Result};
use crate::runner::graph::{pair_blockers, Blocker, GraphBuilder};
use crate::sanity::{
    recorded_versions, verify_prerequisites, SanityContext, PREREQUISITE_INVALID_EXIT_CODE,
};
use crate::scheduler::{
    BackoffPolicy, BatchScheduler, JobHandle, JobStatus, SchedulerJobState, SubmissionAdapter,
    SubmitOutcome, SubmitRequest,
};
use crate::script::{renderer_for, unit_path, write_unit, Invocation, JobUnit, SchedulerHeader};
use crate::state::{
    ConfigSnapshot, FailureReason, ItemOrigin, RunStateStore, RunSummary, SlotKey, WorkItemId,
    WorkItemState,
};
use crate::steps::{StepCatalog, StepDefinition};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Markers may be stamped by a compute node whose clock runs slightly
/// behind the submitting host.
const MARKER_CLOCK_SKEW_SECS: i64 = 120;

/// Inputs to one pass.
#[derive(Debug, Clone)]
pub struct PassOptions {
    /// Pairs whose frontier is considered. In-flight items of every pair
    /// are reconciled regardless.
    pub pairs: Vec<PairKey>,
    /// How generated units call back into this executable.
    pub invocation: Invocation,
    /// Override the configured submission backoff.
    pub backoff: Option<BackoffPolicy>,
}

impl PassOptions {
    pub fn new(pairs: Vec<PairKey>, invocation: Invocation) -> Self {
        Self {
            pairs,
            invocation,
            backoff: None,
        }
    }
}

/// A job handed to the scheduler during a pass.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub id: WorkItemId,
    pub job: JobHandle,
    pub script: PathBuf,
    pub after_ok: Vec<JobHandle>,
}

/// A state change made during a pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassTransition {
    pub id: WorkItemId,
    pub from: WorkItemState,
    pub to: WorkItemState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// What one pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub run_id: Option<String>,
    pub scheduler: String,
    pub dry_run: bool,
    pub pairs: usize,
    /// Work items created for slots seen for the first time.
    pub materialized: usize,
    /// Attempts added by the automatic retry policy.
    pub retried: Vec<WorkItemId>,
    pub submitted: Vec<Submission>,
    pub transitions: Vec<PassTransition>,
    /// Ready items held back by a step's concurrency cap.
    pub deferred: Vec<WorkItemId>,
    /// Per pair, what stops progress.
    pub blockers: BTreeMap<String, Vec<Blocker>>,
    pub warnings: Vec<String>,
    pub summary: RunSummary,
}

impl PassReport {
    /// Nothing in flight and nothing left that another pass could submit.
    pub fn settled(&self) -> bool {
        self.summary.in_flight() == 0 && self.submitted.is_empty() && self.deferred.is_empty()
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Drives work items for a fixed config and catalog.
pub struct Orchestrator<'a> {
    config: &'a FlowConfig,
    catalog: &'a StepCatalog,
    ctx: SanityContext<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a FlowConfig, catalog: &'a StepCatalog) -> Self {
        Self {
            config,
            catalog,
            ctx: SanityContext::new(catalog, &config.paths),
        }
    }

    pub fn context(&self) -> &SanityContext<'a> {
        &self.ctx
    }

    /// Run one pass over `options.pairs`.
    pub fn run_pass(
        &self,
        store: &mut RunStateStore,
        scheduler: &mut dyn BatchScheduler,
        options: &PassOptions,
    ) -> Result<PassReport> {
        let mut report = PassReport {
            scheduler: scheduler.name().to_string(),
            dry_run: store.is_scratch(),
            pairs: options.pairs.len(),
            ..Default::default()
        };
        tracing::debug!(
            pairs = options.pairs.len(),
            steps = self.catalog.len(),
            scheduler = scheduler.name(),
            "Starting pass"
        );

        self.apply_retry_policy(store, &options.pairs, &mut report)?;
        self.materialize(store, &options.pairs, &mut report)?;
        self.reconcile(store, scheduler, &mut report)?;

        let mut adapter = SubmissionAdapter::new(scheduler, &self.config.scheduler);
        if let Some(backoff) = options.backoff {
            adapter = adapter.with_backoff(backoff);
        }
        self.submit_frontier(store, &mut adapter, options, &mut report)?;

        for pair in &options.pairs {
            let blockers = pair_blockers(self.catalog, store, pair);
            if !blockers.is_empty() {
                for blocker in &blockers {
                    tracing::warn!(pair = %pair, "Blocked: {}", blocker.summary());
                }
                report.blockers.insert(pair.to_string(), blockers);
            }
        }

        let config = ConfigSnapshot::of(self.config)?;
        let record = store.snapshot(
            report.submitted.len(),
            Some(&config),
            self.config.orchestrator.history_retention,
        )?;
        report.run_id = Some(record.run_id);
        report.summary = record.summary;
        tracing::info!(
            submitted = report.submitted.len(),
            transitions = report.transitions.len(),
            in_flight = report.summary.in_flight(),
            "Pass complete"
        );
        Ok(report)
    }

    fn transition(
        &self,
        store: &mut RunStateStore,
        report: &mut PassReport,
        id: &WorkItemId,
        to: WorkItemState,
        reason: Option<FailureReason>,
        detail: Option<String>,
    ) -> Result<bool> {
        let from = store
            .get(id)
            .map(|i| i.state)
            .ok_or_else(|| FlowError::UnknownWorkItem { key: id.to_string() })?;
        let changed = store.record_transition(id, to, reason, detail.clone())?;
        if changed {
            report.transitions.push(PassTransition {
                id: id.clone(),
                from,
                to,
                reason,
                detail,
            });
        }
        Ok(changed)
    }

    fn apply_retry_policy(
        &self,
        store: &mut RunStateStore,
        pairs: &[PairKey],
        report: &mut PassReport,
    ) -> Result<()> {
        let policy = &self.config.orchestrator.retry;
        if policy.indeterminate != RetryMode::Automatic {
            return Ok(());
        }

        let candidates: Vec<(SlotKey, u32)> = store
            .current_items()
            .filter(|i| i.state == WorkItemState::Indeterminate && pairs.contains(&i.id.pair()))
            .map(|i| (i.slot(), i.retry_count()))
            .collect();

        for (slot, retries) in candidates {
            let Some(step) = self.catalog.get(&slot.step) else {
                continue;
            };
            if !step.enabled || retries >= policy.max_automatic_retries {
                continue;
            }
            let id = store.retry(&slot, &step.version, ItemOrigin::Retry)?;
            tracing::info!(item = %id, "Automatically retrying indeterminate work item");
            report.retried.push(id);
        }
        Ok(())
    }

    fn materialize(
        &self,
        store: &mut RunStateStore,
        pairs: &[PairKey],
        report: &mut PassReport,
    ) -> Result<()> {
        let prior = match store.latest_run_record() {
            Ok(prior) => prior,
            Err(e) => {
                report.warn(format!("Ignoring unreadable latest run record: {}", e));
                None
            }
        };

        let mut builder = GraphBuilder::new(self.catalog).with_prior(prior.as_ref());
        if self.config.orchestrator.adopt_existing_outputs {
            builder = builder.with_adoption(&self.ctx);
        }
        let graphs = builder.build(pairs, store);

        for graph in graphs {
            for item in graph.new_items {
                if store.materialize(item)? {
                    report.materialized += 1;
                }
            }
        }

        let stale: Vec<String> = store
            .current_items()
            .filter(|i| i.state == WorkItemState::Succeeded && pairs.contains(&i.id.pair()))
            .filter_map(|i| {
                let step = self.catalog.get(&i.id.step)?;
                (step.version != i.version).then(|| {
                    format!(
                        "{} succeeded with version {} but {} is now at {}; retry it to rerun",
                        i.id, i.version, step.name, step.version
                    )
                })
            })
            .collect();
        for message in stale {
            report.warn(message);
        }
        Ok(())
    }

    fn reconcile(
        &self,
        store: &mut RunStateStore,
        scheduler: &mut dyn BatchScheduler,
        report: &mut PassReport,
    ) -> Result<()> {
        let in_flight: Vec<(WorkItemId, JobHandle)> = store
            .current_items()
            .filter(|i| i.state.is_in_flight())
            .filter_map(|i| i.job.clone().map(|job| (i.id.clone(), job)))
            .collect();
        if in_flight.is_empty() {
            return Ok(());
        }

        let handles: Vec<JobHandle> = in_flight.iter().map(|(_, job)| job.clone()).collect();
        let statuses = match scheduler.status(&handles) {
            Ok(statuses) => statuses,
            Err(e) => {
                report.warn(format!(
                    "Could not query {} for {} in-flight job(s): {}",
                    scheduler.name(),
                    handles.len(),
                    e
                ));
                return Ok(());
            }
        };

        for (id, job) in in_flight {
            match statuses.get(&job) {
                Some(status) => self.apply_status(store, scheduler, report, &id, &job, status)?,
                None => self.resolve_missing(store, report, &id, &job)?,
            }
        }
        Ok(())
    }

    fn apply_status(
        &self,
        store: &mut RunStateStore,
        scheduler: &mut dyn BatchScheduler,
        report: &mut PassReport,
        id: &WorkItemId,
        job: &JobHandle,
        status: &JobStatus,
    ) -> Result<()> {
        let Some(step) = self.catalog.get(&id.step) else {
            report.warn(format!(
                "{} belongs to step '{}' which is no longer configured; leaving it {}",
                id,
                id.step,
                status.reported
            ));
            return Ok(());
        };
        let pair = id.pair();

        match &status.state {
            SchedulerJobState::Queued => {}
            SchedulerJobState::Running => {
                self.transition(store, report, id, WorkItemState::Running, None, None)?;
                self.watchdog(store, scheduler, report, id, job, step, status)?;
            }
            SchedulerJobState::Succeeded => {
                let (version, not_before) = match store.get(id) {
                    Some(item) => (
                        item.version.clone(),
                        item.submitted_at
                            .map(|t| t - chrono::Duration::seconds(MARKER_CLOCK_SKEW_SECS)),
                    ),
                    None => (step.version.clone(), None),
                };
                let verdict = self.ctx.check_output(step, &pair, &version, not_before);
                if verdict.satisfied {
                    self.transition(
                        store,
                        report,
                        id,
                        WorkItemState::Succeeded,
                        None,
                        Some(format!("job {} completed; {}", job, verdict.summary())),
                    )?;
                } else {
                    tracing::warn!(item = %id, %job, "Job exited 0 but its output is invalid");
                    self.transition(
                        store,
                        report,
                        id,
                        WorkItemState::Failed,
                        Some(FailureReason::ExecutionFailed),
                        Some(format!(
                            "job {} exited 0 but output is invalid: {}",
                            job,
                            verdict.summary()
                        )),
                    )?;
                }
            }
            SchedulerJobState::Failed { exit_code } => {
                let (reason, detail) = if *exit_code == Some(PREREQUISITE_INVALID_EXIT_CODE) {
                    (
                        FailureReason::PrerequisiteInvalid,
                        format!(
                            "job {} stopped in its prerequisite check (exit {})",
                            job, PREREQUISITE_INVALID_EXIT_CODE
                        ),
                    )
                } else {
                    let code = exit_code.map_or("unknown".to_string(), |c| c.to_string());
                    (
                        FailureReason::ExecutionFailed,
                        format!("job {} {} with exit code {}", job, status.reported, code),
                    )
                };
                self.transition(store, report, id, WorkItemState::Failed, Some(reason), Some(detail))?;
            }
            SchedulerJobState::Cancelled => {
                let elapsed = status.elapsed.or_else(|| self.observed_runtime(store, id));
                let timed_out = status.reported_timeout()
                    || elapsed.is_some_and(|e| e >= step.resources.time_limit);
                let (reason, detail) = if timed_out {
                    (
                        FailureReason::TimedOut,
                        format!("job {} hit its time limit", job),
                    )
                } else {
                    (
                        FailureReason::Cancelled,
                        format!("job {} was {}", job, status.reported.to_ascii_lowercase()),
                    )
                };
                self.transition(
                    store,
                    report,
                    id,
                    WorkItemState::Indeterminate,
                    Some(reason),
                    Some(detail),
                )?;
            }
            SchedulerJobState::Unknown(label) => {
                self.transition(
                    store,
                    report,
                    id,
                    WorkItemState::Indeterminate,
                    Some(FailureReason::UnknownSchedulerState),
                    Some(format!("scheduler reported '{}' for job {}", label, job)),
                )?;
            }
        }
        Ok(())
    }

    /// Time limit plus grace; past this a job is presumed lost.
    fn overrun_limit(&self, step: &StepDefinition) -> Duration {
        step.resources.time_limit
            + Duration::from_secs(self.config.orchestrator.timeout_grace_minutes * 60)
    }

    /// A job the scheduler does not report. Shortly after submission that is
    /// accounting lag; past the overrun limit the job is gone.
    fn resolve_missing(
        &self,
        store: &mut RunStateStore,
        report: &mut PassReport,
        id: &WorkItemId,
        job: &JobHandle,
    ) -> Result<()> {
        let Some(step) = self.catalog.get(&id.step) else {
            return Ok(());
        };
        let Some(submitted_at) = store.get(id).and_then(|i| i.submitted_at) else {
            return Ok(());
        };
        let waited = (Utc::now() - submitted_at).to_std().unwrap_or_default();
        let limit = self.overrun_limit(step);
        if waited <= limit {
            tracing::debug!(item = %id, %job, "Scheduler has no record of job yet");
            return Ok(());
        }

        tracing::warn!(item = %id, %job, "Job is unknown to the scheduler");
        self.transition(
            store,
            report,
            id,
            WorkItemState::Indeterminate,
            Some(FailureReason::UnknownSchedulerState),
            Some(format!(
                "job {} unknown to scheduler {}s after submission (limit plus grace {}s)",
                job,
                waited.as_secs(),
                limit.as_secs()
            )),
        )?;
        Ok(())
    }

    fn observed_runtime(&self, store: &RunStateStore, id: &WorkItemId) -> Option<Duration> {
        let started = store.get(id)?.started_at?;
        (Utc::now() - started).to_std().ok()
    }

    #[allow(clippy::too_many_arguments)]
    fn watchdog(
        &self,
        store: &mut RunStateStore,
        scheduler: &mut dyn BatchScheduler,
        report: &mut PassReport,
        id: &WorkItemId,
        job: &JobHandle,
        step: &StepDefinition,
        status: &JobStatus,
    ) -> Result<()> {
        let Some(elapsed) = status.elapsed.or_else(|| self.observed_runtime(store, id)) else {
            return Ok(());
        };
        let limit = self.overrun_limit(step);
        if elapsed <= limit {
            return Ok(());
        }

        if let Err(e) = scheduler.cancel(job) {
            report.warn(format!("Could not cancel overrunning job {} ({}): {}", job, id, e));
            return Ok(());
        }
        self.transition(
            store,
            report,
            id,
            WorkItemState::Indeterminate,
            Some(FailureReason::TimedOut),
            Some(format!(
                "job {} ran {}s, past its limit plus grace ({}s); cancelled",
                job,
                elapsed.as_secs(),
                limit.as_secs()
            )),
        )?;
        Ok(())
    }

    fn submit_frontier(
        &self,
        store: &mut RunStateStore,
        adapter: &mut SubmissionAdapter<'_>,
        options: &PassOptions,
        report: &mut PassReport,
    ) -> Result<()> {
        let renderer = renderer_for(self.config.scheduler.kind);
        let header = SchedulerHeader::from(&self.config.scheduler);
        let write_scripts = adapter.scheduler().needs_scripts();

        for pair in &options.pairs {
            for step in self.catalog.iter() {
                let slot = SlotKey::new(pair.clone(), &step.name);
                let Some(item) = store.current(&slot) else {
                    continue;
                };
                if item.state != WorkItemState::Pending {
                    continue;
                }
                let id = item.id.clone();

                if !step.enabled {
                    let verdict = self.ctx.check_output(step, pair, &step.version, None);
                    if verdict.satisfied {
                        self.transition(
                            store,
                            report,
                            &id,
                            WorkItemState::Succeeded,
                            None,
                            Some(format!("external output: {}", verdict.summary())),
                        )?;
                    }
                    continue;
                }

                let mut after_ok = Vec::new();
                let mut ready = true;
                for prereq in &step.prerequisites {
                    match store.current(&SlotKey::new(pair.clone(), prereq)) {
                        Some(p) if p.state == WorkItemState::Succeeded => {
                            after_ok.extend(p.job.clone());
                        }
                        _ => {
                            ready = false;
                            break;
                        }
                    }
                }
                if !ready {
                    continue;
                }

                let versions = recorded_versions(store, pair);
                let check = verify_prerequisites(&self.ctx, step, pair, &versions);
                if !check.satisfied() {
                    tracing::warn!(item = %id, "Pre-filter rejected work item: {}", check.summary());
                    self.transition(
                        store,
                        report,
                        &id,
                        WorkItemState::Failed,
                        Some(FailureReason::PrerequisiteInvalid),
                        Some(check.summary()),
                    )?;
                    continue;
                }

                if !adapter.has_capacity(store, step) {
                    tracing::debug!(item = %id, "Concurrency cap reached; deferring");
                    report.deferred.push(id);
                    continue;
                }

                let unit = JobUnit::build(&self.ctx, step, &id, &options.invocation, header.clone())?;
                let script = if write_scripts {
                    write_unit(store.layout(), &unit, renderer.as_ref())?
                } else {
                    unit_path(store.layout(), &unit)
                };
                let request = SubmitRequest {
                    item: id.clone(),
                    job_name: unit.job_name.clone(),
                    script: script.clone(),
                    after_ok: after_ok.clone(),
                    resources: unit.resources.clone(),
                    stdout: unit.stdout.clone(),
                    stderr: unit.stderr.clone(),
                };

                match adapter.submit(store, &request)? {
                    SubmitOutcome::Submitted(job) => {
                        report.transitions.push(PassTransition {
                            id: id.clone(),
                            from: WorkItemState::Pending,
                            to: WorkItemState::Submitted,
                            reason: None,
                            detail: None,
                        });
                        report.submitted.push(Submission {
                            id,
                            job,
                            script,
                            after_ok,
                        });
                    }
                    SubmitOutcome::Rejected { attempts, error } => {
                        let detail = store.get(&id).and_then(|i| i.detail.clone());
                        report.transitions.push(PassTransition {
                            id: id.clone(),
                            from: WorkItemState::Pending,
                            to: WorkItemState::Failed,
                            reason: Some(FailureReason::SubmissionRejected),
                            detail,
                        });
                        report.warn(format!(
                            "{} rejected by {} after {} attempt(s): {}",
                            id,
                            adapter.scheduler_name(),
                            attempts,
                            error
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Operator retry: a fresh attempt at the current catalog version.
    pub fn retry(&self, store: &mut RunStateStore, slot: &SlotKey) -> Result<WorkItemId> {
        let step = self.catalog.require(&slot.step)?;
        store.retry(slot, &step.version, ItemOrigin::Retry)
    }

    /// Operator cancel of an in-flight item.
    pub fn cancel(
        &self,
        store: &mut RunStateStore,
        scheduler: &mut dyn BatchScheduler,
        slot: &SlotKey,
    ) -> Result<WorkItemId> {
        let item = store.current(slot).ok_or_else(|| FlowError::UnknownWorkItem {
            key: slot.to_string(),
        })?;
        if !item.state.is_in_flight() {
            return Err(FlowError::InvalidTransition {
                item: item.id.to_string(),
                from: item.state.to_string(),
                to: "Indeterminate (cancel)".to_string(),
            });
        }
        let id = item.id.clone();
        if let Some(job) = item.job.clone() {
            scheduler.cancel(&job)?;
        }
        store.record_transition(
            &id,
            WorkItemState::Indeterminate,
            Some(FailureReason::Cancelled),
            Some("cancelled by operator".to_string()),
        )?;
        Ok(id)
    }
}
