//! In-memory backend for dry runs and tests.

use super::{BatchScheduler, JobHandle, JobStatus, SchedulerJobState, SubmitError, SubmitRequest};
use crate::error::{FlowError, Result};
use std::collections::{BTreeMap, VecDeque};

/// Records submissions; outcomes are set by the caller.
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    name: &'static str,
    prefix: &'static str,
    next_id: u64,
    submissions: Vec<(JobHandle, SubmitRequest)>,
    statuses: BTreeMap<JobHandle, JobStatus>,
    rejections: VecDeque<String>,
    reject_always: Option<String>,
    status_error: Option<String>,
    cancelled: Vec<JobHandle>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self {
            name: "memory",
            prefix: "mem",
            ..Default::default()
        }
    }

    /// Backend used by `run --dry-run`; writes no scripts.
    pub fn dry_run() -> Self {
        Self {
            name: "dry-run",
            prefix: "dry",
            ..Default::default()
        }
    }

    /// Reject the next `count` submissions with `message`.
    pub fn reject_next(&mut self, count: usize, message: &str) {
        self.rejections
            .extend(std::iter::repeat(message.to_string()).take(count));
    }

    /// Reject every submission until cleared.
    pub fn reject_always(&mut self, message: Option<&str>) {
        self.reject_always = message.map(str::to_string);
    }

    /// Make status queries fail.
    pub fn fail_status(&mut self, message: Option<&str>) {
        self.status_error = message.map(str::to_string);
    }

    /// Every accepted submission, in order.
    pub fn submissions(&self) -> &[(JobHandle, SubmitRequest)] {
        &self.submissions
    }

    /// Set what the scheduler reports for a job.
    pub fn set_status(&mut self, handle: &JobHandle, status: JobStatus) {
        self.statuses.insert(handle.clone(), status);
    }

    pub fn set_state(&mut self, handle: &JobHandle, state: SchedulerJobState) {
        let label = label_for(&state);
        self.set_status(handle, JobStatus::new(state, label));
    }

    /// Forget a job, as if accounting had purged it.
    pub fn forget(&mut self, handle: &JobHandle) {
        self.statuses.remove(handle);
    }

    pub fn cancelled(&self) -> &[JobHandle] {
        &self.cancelled
    }
}

fn label_for(state: &SchedulerJobState) -> String {
    match state {
        SchedulerJobState::Queued => "PENDING".to_string(),
        SchedulerJobState::Running => "RUNNING".to_string(),
        SchedulerJobState::Succeeded => "COMPLETED".to_string(),
        SchedulerJobState::Failed { .. } => "FAILED".to_string(),
        SchedulerJobState::Cancelled => "CANCELLED".to_string(),
        SchedulerJobState::Unknown(label) => label.clone(),
    }
}

impl BatchScheduler for InMemoryScheduler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn submit(&mut self, request: &SubmitRequest) -> std::result::Result<JobHandle, SubmitError> {
        if let Some(message) = self.rejections.pop_front().or_else(|| self.reject_always.clone()) {
            return Err(SubmitError::new(message));
        }
        self.next_id += 1;
        let handle = JobHandle::new(format!("{}-{}", self.prefix, self.next_id));
        self.statuses.insert(
            handle.clone(),
            JobStatus::new(SchedulerJobState::Queued, "PENDING"),
        );
        self.submissions.push((handle.clone(), request.clone()));
        Ok(handle)
    }

    fn status(&mut self, handles: &[JobHandle]) -> Result<BTreeMap<JobHandle, JobStatus>> {
        if let Some(message) = &self.status_error {
            return Err(FlowError::Scheduler {
                message: message.clone(),
            });
        }
        Ok(handles
            .iter()
            .filter_map(|h| self.statuses.get(h).map(|s| (h.clone(), s.clone())))
            .collect())
    }

    fn cancel(&mut self, handle: &JobHandle) -> Result<()> {
        self.cancelled.push(handle.clone());
        self.set_state(handle, SchedulerJobState::Cancelled);
        Ok(())
    }

    fn needs_scripts(&self) -> bool {
        self.name != "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkItemId;
    use crate::steps::ResourceProfile;
    use std::path::PathBuf;

    fn request(step: &str) -> SubmitRequest {
        SubmitRequest {
            item: WorkItemId {
                subject: "sub-01".into(),
                session: "ses-01".into(),
                step: step.into(),
                attempt: 1,
            },
            job_name: step.into(),
            script: PathBuf::from("unit.sh"),
            after_ok: Vec::new(),
            resources: ResourceProfile::default(),
            stdout: PathBuf::from("unit.out"),
            stderr: PathBuf::from("unit.err"),
        }
    }

    #[test]
    fn submissions_are_queued() {
        let mut scheduler = InMemoryScheduler::new();
        let handle = scheduler.submit(&request("segment")).unwrap();
        let statuses = scheduler.status(&[handle.clone()]).unwrap();
        assert_eq!(statuses[&handle].state, SchedulerJobState::Queued);
        assert_eq!(scheduler.submissions().len(), 1);
    }

    #[test]
    fn injected_rejections_are_consumed_in_order() {
        let mut scheduler = InMemoryScheduler::new();
        scheduler.reject_next(1, "queue full");
        assert_eq!(scheduler.submit(&request("a")).unwrap_err().message, "queue full");
        assert!(scheduler.submit(&request("a")).is_ok());
    }

    #[test]
    fn cancel_marks_job_cancelled() {
        let mut scheduler = InMemoryScheduler::new();
        let handle = scheduler.submit(&request("segment")).unwrap();
        scheduler.cancel(&handle).unwrap();
        let statuses = scheduler.status(&[handle.clone()]).unwrap();
        assert_eq!(statuses[&handle].state, SchedulerJobState::Cancelled);
        assert_eq!(scheduler.cancelled(), &[handle]);
    }

    #[test]
    fn unknown_handles_are_absent() {
        let mut scheduler = InMemoryScheduler::new();
        let statuses = scheduler.status(&[JobHandle::new("nope")]).unwrap();
        assert!(statuses.is_empty());
    }

    #[test]
    fn dry_run_skips_scripts() {
        assert!(!InMemoryScheduler::dry_run().needs_scripts());
        assert!(InMemoryScheduler::new().needs_scripts());
    }
}
