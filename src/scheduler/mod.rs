//! Batch scheduler backends and the submission adapter.
//!
//! Every backend implements [`BatchScheduler`]:
//!
//! - [`SlurmScheduler`] - `sbatch`, `sacct` and `scancel`
//! - [`LocalScheduler`] - runs units to completion on this machine
//! - [`InMemoryScheduler`] - records submissions, for dry runs and tests
//!
//! [`SubmissionAdapter`] sits between the orchestrator and a backend and
//! owns rejection retries, backoff and per-step concurrency caps.

pub mod adapter;
pub mod backoff;
pub mod local;
pub mod memory;
pub mod slurm;

pub use adapter::{SubmissionAdapter, SubmitOutcome};
pub use backoff::BackoffPolicy;
pub use local::LocalScheduler;
pub use memory::InMemoryScheduler;
pub use slurm::SlurmScheduler;

use crate::config::{FlowConfig, SchedulerKind};
use crate::error::Result;
use crate::state::WorkItemId;
use crate::steps::ResourceProfile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Opaque identifier a scheduler returns for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a backend needs to submit one rendered job unit.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub item: WorkItemId,
    pub job_name: String,
    pub script: PathBuf,
    /// Start only after these jobs completed successfully.
    pub after_ok: Vec<JobHandle>,
    pub resources: ResourceProfile,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

/// A job's lifecycle as the scheduler reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerJobState {
    Queued,
    Running,
    Succeeded,
    Failed { exit_code: Option<i32> },
    Cancelled,
    Unknown(String),
}

/// Scheduler view of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: SchedulerJobState,
    /// Wall time used so far, if reported.
    pub elapsed: Option<Duration>,
    /// The scheduler's own state label, for diagnostics.
    pub reported: String,
}

impl JobStatus {
    pub fn new(state: SchedulerJobState, reported: impl Into<String>) -> Self {
        Self {
            state,
            elapsed: None,
            reported: reported.into(),
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    /// Whether the scheduler itself says the job hit its time limit.
    pub fn reported_timeout(&self) -> bool {
        self.reported.eq_ignore_ascii_case("TIMEOUT")
    }
}

/// A submission the scheduler refused. Always retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SubmitError {
    pub message: String,
}

impl SubmitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A batch scheduler backend.
pub trait BatchScheduler {
    /// Short backend name for logs and reports.
    fn name(&self) -> &'static str;

    /// Submit one unit, returning its handle.
    fn submit(&mut self, request: &SubmitRequest) -> std::result::Result<JobHandle, SubmitError>;

    /// Query many jobs at once. Jobs the scheduler does not report are
    /// absent from the map.
    fn status(&mut self, handles: &[JobHandle]) -> Result<BTreeMap<JobHandle, JobStatus>>;

    /// Ask the scheduler to stop a job.
    fn cancel(&mut self, handle: &JobHandle) -> Result<()>;

    /// Whether units should be written to disk before submission.
    fn needs_scripts(&self) -> bool {
        true
    }
}

/// Build the backend named in config.
///
/// `dry_run` forces the in-memory backend regardless of config.
pub fn from_config(config: &FlowConfig, dry_run: bool) -> Box<dyn BatchScheduler> {
    if dry_run {
        return Box::new(InMemoryScheduler::dry_run());
    }
    match config.scheduler.kind {
        SchedulerKind::Slurm => Box::new(SlurmScheduler::from_config(&config.scheduler)),
        SchedulerKind::Local => Box::new(LocalScheduler::new(config.paths.state_dir())),
        SchedulerKind::DryRun => Box::new(InMemoryScheduler::dry_run()),
    }
}
