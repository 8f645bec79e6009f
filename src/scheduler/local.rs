//! Local backend: each unit runs to completion when it is submitted.
//!
//! Results are kept under `<state_dir>/local/<handle>.json` so that the
//! next pass (a separate process) can query them like any scheduler.

use super::{BatchScheduler, JobHandle, JobStatus, SchedulerJobState, SubmitError, SubmitRequest};
use crate::error::{FlowError, Result};
use crate::shell::{run, CommandOptions};
use crate::state::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable carrying the handle into a locally run unit.
pub const LOCAL_JOB_ID_VAR: &str = "BIDSFLOW_JOB_ID";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalJob {
    item: String,
    exit_code: Option<i32>,
    elapsed_ms: u64,
    timed_out: bool,
}

/// Runs units with `bash` on this machine.
#[derive(Debug, Clone)]
pub struct LocalScheduler {
    dir: PathBuf,
    shell: String,
}

impl LocalScheduler {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join("local"),
            shell: "bash".to_string(),
        }
    }

    fn record_path(&self, handle: &JobHandle) -> PathBuf {
        self.dir.join(format!("{}.json", handle))
    }

    fn next_handle(&self) -> Result<JobHandle> {
        let mut highest = 0u64;
        if self.dir.is_dir() {
            for entry in fs::read_dir(&self.dir)? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if let Some(n) = name
                    .strip_prefix("local-")
                    .and_then(|rest| rest.strip_suffix(".json"))
                    .and_then(|n| n.parse::<u64>().ok())
                {
                    highest = highest.max(n);
                }
            }
        }
        Ok(JobHandle::new(format!("local-{}", highest + 1)))
    }

    fn execute(&self, request: &SubmitRequest) -> Result<JobHandle> {
        fs::create_dir_all(&self.dir)?;
        let handle = self.next_handle()?;

        let mut options = CommandOptions {
            timeout: Some(request.resources.time_limit),
            stdout_file: Some(request.stdout.clone()),
            stderr_file: Some(request.stderr.clone()),
            ..Default::default()
        };
        options
            .env
            .insert(LOCAL_JOB_ID_VAR.to_string(), handle.to_string());

        tracing::info!(item = %request.item, job = %handle, "Running unit locally");
        let result = run(&self.shell, &[request.script.display().to_string()], &options)?;

        let job = LocalJob {
            item: request.item.to_string(),
            exit_code: result.exit_code,
            elapsed_ms: result.duration.as_millis() as u64,
            timed_out: result.timed_out,
        };
        let body = serde_json::to_vec_pretty(&job).map_err(anyhow::Error::from)?;
        write_atomic(&self.record_path(&handle), &body)?;
        Ok(handle)
    }

    fn read(&self, handle: &JobHandle) -> Result<Option<LocalJob>> {
        let path = self.record_path(handle);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| FlowError::Scheduler {
                message: format!("unreadable local job record {}: {}", path.display(), e),
            })
    }
}

impl BatchScheduler for LocalScheduler {
    fn name(&self) -> &'static str {
        "local"
    }

    fn submit(&mut self, request: &SubmitRequest) -> std::result::Result<JobHandle, SubmitError> {
        self.execute(request).map_err(|e| SubmitError::new(e.to_string()))
    }

    fn status(&mut self, handles: &[JobHandle]) -> Result<BTreeMap<JobHandle, JobStatus>> {
        let mut statuses = BTreeMap::new();
        for handle in handles {
            let Some(job) = self.read(handle)? else {
                continue;
            };
            let status = if job.timed_out {
                JobStatus::new(SchedulerJobState::Cancelled, "TIMEOUT")
            } else if job.exit_code == Some(0) {
                JobStatus::new(SchedulerJobState::Succeeded, "COMPLETED")
            } else {
                JobStatus::new(
                    SchedulerJobState::Failed {
                        exit_code: job.exit_code,
                    },
                    "FAILED",
                )
            };
            statuses.insert(
                handle.clone(),
                status.with_elapsed(Duration::from_millis(job.elapsed_ms)),
            );
        }
        Ok(statuses)
    }

    fn cancel(&mut self, handle: &JobHandle) -> Result<()> {
        tracing::debug!(job = %handle, "Local jobs finish at submission; nothing to cancel");
        Ok(())
    }
}
