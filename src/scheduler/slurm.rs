//! Slurm backend.

use super::{BatchScheduler, JobHandle, JobStatus, SchedulerJobState, SubmitError, SubmitRequest};
use crate::config::SchedulerConfig;
use crate::error::{FlowError, Result};
use crate::shell::{run, CommandOptions};
use crate::steps::parse_slurm_duration;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives `sbatch`, `sacct` and `scancel`.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    sbatch: String,
    sacct: String,
    scancel: String,
    options: CommandOptions,
}

impl SlurmScheduler {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            sbatch: config.sbatch.clone(),
            sacct: config.sacct.clone(),
            scancel: config.scancel.clone(),
            options: CommandOptions::with_timeout(COMMAND_TIMEOUT),
        }
    }

    fn sbatch(&self, request: &SubmitRequest, with_dependency: bool) -> std::result::Result<JobHandle, SubmitError> {
        let mut args = vec!["--parsable".to_string()];
        if with_dependency && !request.after_ok.is_empty() {
            args.push(dependency_flag(&request.after_ok));
        }
        args.push(request.script.display().to_string());

        let result = run(&self.sbatch, &args, &self.options)
            .map_err(|e| SubmitError::new(e.to_string()))?;
        if result.timed_out {
            return Err(SubmitError::new(format!(
                "{} did not answer within {}s",
                self.sbatch,
                COMMAND_TIMEOUT.as_secs()
            )));
        }
        if !result.success {
            return Err(SubmitError::new(result.diagnostic()));
        }
        parse_job_id(&result.stdout)
            .map(JobHandle::new)
            .ok_or_else(|| SubmitError::new(format!("unrecognised sbatch output: {}", result.stdout.trim())))
    }
}

impl BatchScheduler for SlurmScheduler {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn submit(&mut self, request: &SubmitRequest) -> std::result::Result<JobHandle, SubmitError> {
        match self.sbatch(request, true) {
            Err(e) if !request.after_ok.is_empty() && is_dependency_error(&e.message) => {
                tracing::debug!(
                    item = %request.item,
                    error = %e,
                    "Predecessor jobs unknown to the controller, submitting without afterok"
                );
                self.sbatch(request, false)
            }
            other => other,
        }
    }

    fn status(&mut self, handles: &[JobHandle]) -> Result<BTreeMap<JobHandle, JobStatus>> {
        if handles.is_empty() {
            return Ok(BTreeMap::new());
        }
        let ids: Vec<&str> = handles.iter().map(JobHandle::as_str).collect();
        let args = vec![
            "--noheader".to_string(),
            "--parsable2".to_string(),
            "--allocations".to_string(),
            "--format=JobIDRaw,State,ExitCode,Elapsed".to_string(),
            "--jobs".to_string(),
            ids.join(","),
        ];
        let result = run(&self.sacct, &args, &self.options)?;
        if !result.success {
            return Err(FlowError::Scheduler {
                message: format!("{} failed: {}", self.sacct, result.diagnostic()),
            });
        }
        Ok(parse_sacct(&result.stdout))
    }

    fn cancel(&mut self, handle: &JobHandle) -> Result<()> {
        let result = run(&self.scancel, &[handle.to_string()], &self.options)?;
        if !result.success {
            return Err(FlowError::Scheduler {
                message: format!("{} {} failed: {}", self.scancel, handle, result.diagnostic()),
            });
        }
        tracing::info!(job = %handle, "Cancelled job");
        Ok(())
    }
}

/// `--dependency=afterok:<h1>:<h2>`
pub fn dependency_flag(after_ok: &[JobHandle]) -> String {
    let ids: Vec<&str> = after_ok.iter().map(JobHandle::as_str).collect();
    format!("--dependency=afterok:{}", ids.join(":"))
}

fn is_dependency_error(message: &str) -> bool {
    message.to_ascii_lowercase().contains("dependency")
}

/// Job id from `sbatch --parsable` (`1234` or `1234;cluster`) or the
/// classic `Submitted batch job 1234` line.
pub fn parse_job_id(output: &str) -> Option<String> {
    static CLASSIC: OnceLock<Option<Regex>> = OnceLock::new();
    let classic = CLASSIC.get_or_init(|| Regex::new(r"Submitted batch job (\d+)").ok());
    if let Some(caps) = classic.as_ref().and_then(|re| re.captures(output)) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let id = line.split(';').next()?.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        Some(id.to_string())
    } else {
        None
    }
}

/// Map an sacct `State` (first word) and `ExitCode` to a job state.
pub fn map_state(label: &str, exit_code: Option<i32>) -> SchedulerJobState {
    match label {
        "PENDING" | "REQUEUED" | "CONFIGURING" | "RESIZING" | "SUSPENDED" => {
            SchedulerJobState::Queued
        }
        "RUNNING" | "COMPLETING" => SchedulerJobState::Running,
        "COMPLETED" => SchedulerJobState::Succeeded,
        "FAILED" | "OUT_OF_MEMORY" | "NODE_FAIL" | "BOOT_FAIL" => {
            SchedulerJobState::Failed { exit_code }
        }
        "CANCELLED" | "TIMEOUT" | "PREEMPTED" | "DEADLINE" => SchedulerJobState::Cancelled,
        other => SchedulerJobState::Unknown(other.to_string()),
    }
}

fn parse_exit_code(field: &str) -> Option<i32> {
    field.split(':').next()?.trim().parse().ok()
}

/// Parse `sacct --parsable2` rows of `JobIDRaw|State|ExitCode|Elapsed`.
pub fn parse_sacct(output: &str) -> BTreeMap<JobHandle, JobStatus> {
    let mut statuses = BTreeMap::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split('|').collect();
        let [id, state, exit, elapsed, ..] = fields.as_slice() else {
            tracing::debug!(line, "Skipping malformed sacct row");
            continue;
        };
        // Step rows (1234.batch) are covered by --allocations, but be safe.
        if id.contains('.') {
            continue;
        }
        // "CANCELLED by 1234" -> "CANCELLED"
        let label = state.split_whitespace().next().unwrap_or_default();
        let mut status = JobStatus::new(map_state(label, parse_exit_code(exit)), label);
        if let Ok(elapsed) = parse_slurm_duration(elapsed) {
            status = status.with_elapsed(elapsed);
        }
        statuses.insert(JobHandle::new(*id), status);
    }
    statuses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkItemId;
    use crate::steps::ResourceProfile;
    use std::path::{Path, PathBuf};

    #[test]
    fn parses_parsable_and_classic_output() {
        assert_eq!(parse_job_id("4242\n").as_deref(), Some("4242"));
        assert_eq!(parse_job_id("4242;cluster\n").as_deref(), Some("4242"));
        assert_eq!(parse_job_id("Submitted batch job 77\n").as_deref(), Some("77"));
        assert_eq!(parse_job_id("sbatch: error: oops"), None);
        assert_eq!(parse_job_id(""), None);
    }

    #[test]
    fn maps_sacct_states() {
        assert_eq!(map_state("PENDING", None), SchedulerJobState::Queued);
        assert_eq!(map_state("COMPLETING", None), SchedulerJobState::Running);
        assert_eq!(map_state("COMPLETED", Some(0)), SchedulerJobState::Succeeded);
        assert_eq!(
            map_state("OUT_OF_MEMORY", Some(0)),
            SchedulerJobState::Failed { exit_code: Some(0) }
        );
        assert_eq!(map_state("TIMEOUT", None), SchedulerJobState::Cancelled);
        assert_eq!(
            map_state("SPECIAL_EXIT", None),
            SchedulerJobState::Unknown("SPECIAL_EXIT".into())
        );
    }

    #[test]
    fn parses_sacct_rows() {
        let output = "\
101|COMPLETED|0:0|00:10:00
102|FAILED|97:0|00:00:03
103|CANCELLED by 1000|0:15|1-00:00:00
103.batch|CANCELLED|0:15|1-00:00:00
garbage
";
        let statuses = parse_sacct(output);
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[&JobHandle::new("101")].state, SchedulerJobState::Succeeded);
        assert_eq!(
            statuses[&JobHandle::new("102")].state,
            SchedulerJobState::Failed { exit_code: Some(97) }
        );
        let cancelled = &statuses[&JobHandle::new("103")];
        assert_eq!(cancelled.state, SchedulerJobState::Cancelled);
        assert_eq!(cancelled.reported, "CANCELLED");
        assert_eq!(cancelled.elapsed, Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn formats_dependency_flag() {
        let flag = dependency_flag(&[JobHandle::new("1"), JobHandle::new("2")]);
        assert_eq!(flag, "--dependency=afterok:1:2");
    }

    #[cfg(unix)]
    fn fake_binary(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn request(after_ok: Vec<JobHandle>) -> SubmitRequest {
        SubmitRequest {
            item: WorkItemId {
                subject: "sub-01".into(),
                session: "ses-01".into(),
                step: "segment".into(),
                attempt: 1,
            },
            job_name: "segment_sub-01_ses-01".into(),
            script: PathBuf::from("/tmp/unit.sh"),
            after_ok,
            resources: ResourceProfile::default(),
            stdout: PathBuf::from("/tmp/unit.out"),
            stderr: PathBuf::from("/tmp/unit.err"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn submits_through_sbatch() {
        let temp = tempfile::TempDir::new().unwrap();
        let args_log = temp.path().join("args");
        let config = SchedulerConfig {
            sbatch: fake_binary(
                temp.path(),
                "sbatch",
                &format!("echo \"$@\" > {}\necho 555", args_log.display()),
            ),
            ..Default::default()
        };
        let mut slurm = SlurmScheduler::from_config(&config);
        let handle = slurm.submit(&request(vec![JobHandle::new("9")])).unwrap();
        assert_eq!(handle.as_str(), "555");
        let args = std::fs::read_to_string(args_log).unwrap();
        assert!(args.contains("--parsable --dependency=afterok:9 /tmp/unit.sh"));
    }

    #[cfg(unix)]
    #[test]
    fn rejection_carries_stderr() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = SchedulerConfig {
            sbatch: fake_binary(
                temp.path(),
                "sbatch",
                "echo 'sbatch: error: QOSMaxSubmitJobPerUserLimit' >&2; exit 1",
            ),
            ..Default::default()
        };
        let err = SlurmScheduler::from_config(&config)
            .submit(&request(Vec::new()))
            .unwrap_err();
        assert!(err.message.contains("QOSMaxSubmitJobPerUserLimit"));
    }

    #[cfg(unix)]
    #[test]
    fn purged_dependency_is_dropped_on_resubmit() {
        let temp = tempfile::TempDir::new().unwrap();
        let body = "case \"$*\" in\n  *--dependency*) echo 'sbatch: error: Job dependency problem' >&2; exit 1;;\n  *) echo 808;;\nesac";
        let config = SchedulerConfig {
            sbatch: fake_binary(temp.path(), "sbatch", body),
            ..Default::default()
        };
        let handle = SlurmScheduler::from_config(&config)
            .submit(&request(vec![JobHandle::new("1")]))
            .unwrap();
        assert_eq!(handle.as_str(), "808");
    }

    #[cfg(unix)]
    #[test]
    fn status_failure_is_scheduler_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = SchedulerConfig {
            sacct: fake_binary(temp.path(), "sacct", "echo 'slurmdbd down' >&2; exit 1"),
            ..Default::default()
        };
        let err = SlurmScheduler::from_config(&config)
            .status(&[JobHandle::new("1")])
            .unwrap_err();
        assert!(matches!(err, FlowError::Scheduler { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn status_queries_sacct() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = SchedulerConfig {
            sacct: fake_binary(temp.path(), "sacct", "echo '7|RUNNING|0:0|00:05:00'"),
            ..Default::default()
        };
        let statuses = SlurmScheduler::from_config(&config)
            .status(&[JobHandle::new("7")])
            .unwrap();
        assert_eq!(statuses[&JobHandle::new("7")].state, SchedulerJobState::Running);
    }
}
