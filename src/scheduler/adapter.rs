//! Submission adapter: retries, backoff and concurrency caps.

use super::{BackoffPolicy, BatchScheduler, JobHandle, SubmitRequest};
use crate::config::SchedulerConfig;
use crate::error::{FlowError, Result};
use crate::state::{FailureReason, RunStateStore, WorkItemState};
use crate::steps::StepDefinition;
use std::time::Duration;

/// Result of handing one work item to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted; the item is now `Submitted`.
    Submitted(JobHandle),
    /// Rejected `attempts` times; the item is now `Failed`.
    Rejected { attempts: u32, error: String },
}

/// Wraps a backend with the store transitions around submission.
pub struct SubmissionAdapter<'s> {
    scheduler: &'s mut dyn BatchScheduler,
    backoff: BackoffPolicy,
    max_attempts: u32,
    sleep: fn(Duration),
}

impl<'s> SubmissionAdapter<'s> {
    pub fn new(scheduler: &'s mut dyn BatchScheduler, config: &SchedulerConfig) -> Self {
        Self {
            scheduler,
            backoff: BackoffPolicy::from(&config.backoff),
            max_attempts: config.max_submit_attempts.max(1),
            sleep: std::thread::sleep,
        }
    }

    /// Replace the delay schedule.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn scheduler(&mut self) -> &mut dyn BatchScheduler {
        &mut *self.scheduler
    }

    pub fn scheduler_name(&self) -> &'static str {
        self.scheduler.name()
    }

    /// Whether `step` is below its in-flight cap.
    pub fn has_capacity(&self, store: &RunStateStore, step: &StepDefinition) -> bool {
        match step.max_concurrent {
            Some(cap) => store.in_flight_for_step(&step.name) < cap,
            None => true,
        }
    }

    /// Submit one pending item, retrying rejections with backoff.
    ///
    /// Rejections already counted on the item (from an interrupted pass)
    /// count towards the ceiling.
    pub fn submit(&mut self, store: &mut RunStateStore, request: &SubmitRequest) -> Result<SubmitOutcome> {
        let id = &request.item;
        let item = store.get(id).ok_or_else(|| FlowError::UnknownWorkItem {
            key: id.to_string(),
        })?;
        if item.state != WorkItemState::Pending {
            return Err(FlowError::InvalidTransition {
                item: id.to_string(),
                from: item.state.to_string(),
                to: WorkItemState::Submitted.to_string(),
            });
        }
        let mut attempts = item.submit_attempts;
        let mut last_error = item.detail.clone().unwrap_or_default();

        while attempts < self.max_attempts {
            match self.scheduler.submit(request) {
                Ok(handle) => {
                    store.record_submitted(id, handle.clone(), request.script.clone())?;
                    tracing::info!(
                        item = %id,
                        job = %handle,
                        scheduler = self.scheduler.name(),
                        after_ok = request.after_ok.len(),
                        "Submitted work item"
                    );
                    return Ok(SubmitOutcome::Submitted(handle));
                }
                Err(e) => {
                    attempts = store.record_submit_rejection(id, &e.message)?;
                    last_error = e.message;
                    if attempts < self.max_attempts {
                        let delay = self.backoff.delay(attempts - 1);
                        tracing::debug!(item = %id, attempts, delay_ms = delay.as_millis() as u64, "Backing off");
                        (self.sleep)(delay);
                    }
                }
            }
        }

        let detail = format!(
            "rejected {} time(s), last error: {}",
            attempts, last_error
        );
        store.record_transition(
            id,
            WorkItemState::Failed,
            Some(FailureReason::SubmissionRejected),
            Some(detail),
        )?;
        Ok(SubmitOutcome::Rejected {
            attempts,
            error: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::PairKey;
    use crate::scheduler::InMemoryScheduler;
    use crate::state::{ItemOrigin, WorkItem, WorkItemId};
    use crate::steps::ResourceProfile;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup(temp: &TempDir) -> (RunStateStore, SubmitRequest) {
        let mut store = RunStateStore::open(temp.path(), false).unwrap();
        let id = WorkItemId::first(&PairKey::new("01", "01"), "segment");
        store
            .materialize(WorkItem::pending(id.clone(), "1", ItemOrigin::Scheduled))
            .unwrap();
        let request = SubmitRequest {
            item: id,
            job_name: "segment".into(),
            script: PathBuf::from("unit.sh"),
            after_ok: Vec::new(),
            resources: ResourceProfile::default(),
            stdout: PathBuf::from("out"),
            stderr: PathBuf::from("err"),
        };
        (store, request)
    }

    fn config(max: u32) -> SchedulerConfig {
        SchedulerConfig {
            max_submit_attempts: max,
            ..Default::default()
        }
    }

    #[test]
    fn accepted_submission_records_handle() {
        let temp = TempDir::new().unwrap();
        let (mut store, request) = setup(&temp);
        let mut scheduler = InMemoryScheduler::new();
        let mut adapter =
            SubmissionAdapter::new(&mut scheduler, &config(3)).with_backoff(BackoffPolicy::immediate());

        let outcome = adapter.submit(&mut store, &request).unwrap();
        let SubmitOutcome::Submitted(handle) = outcome else {
            panic!("expected submission");
        };
        let item = store.get(&request.item).unwrap();
        assert_eq!(item.state, WorkItemState::Submitted);
        assert_eq!(item.job.as_ref(), Some(&handle));
    }

    #[test]
    fn transient_rejection_is_retried() {
        let temp = TempDir::new().unwrap();
        let (mut store, request) = setup(&temp);
        let mut scheduler = InMemoryScheduler::new();
        scheduler.reject_next(2, "Socket timed out");
        let mut adapter =
            SubmissionAdapter::new(&mut scheduler, &config(3)).with_backoff(BackoffPolicy::immediate());

        let outcome = adapter.submit(&mut store, &request).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Submitted(_)));
        assert_eq!(store.get(&request.item).unwrap().submit_attempts, 2);
    }

    #[test]
    fn persistent_rejection_fails_item() {
        let temp = TempDir::new().unwrap();
        let (mut store, request) = setup(&temp);
        let mut scheduler = InMemoryScheduler::new();
        scheduler.reject_always(Some("invalid partition"));
        let mut adapter =
            SubmissionAdapter::new(&mut scheduler, &config(3)).with_backoff(BackoffPolicy::immediate());

        let outcome = adapter.submit(&mut store, &request).unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Rejected {
                attempts: 3,
                error: "invalid partition".into()
            }
        );
        let item = store.get(&request.item).unwrap();
        assert_eq!(item.state, WorkItemState::Failed);
        assert_eq!(item.reason, Some(FailureReason::SubmissionRejected));
        assert!(scheduler.submissions().is_empty());
    }

    #[test]
    fn earlier_rejections_count_towards_ceiling() {
        let temp = TempDir::new().unwrap();
        let (mut store, request) = setup(&temp);
        store.record_submit_rejection(&request.item, "first").unwrap();
        store.record_submit_rejection(&request.item, "second").unwrap();
        let mut scheduler = InMemoryScheduler::new();
        scheduler.reject_always(Some("third"));
        let mut adapter =
            SubmissionAdapter::new(&mut scheduler, &config(3)).with_backoff(BackoffPolicy::immediate());

        let outcome = adapter.submit(&mut store, &request).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Rejected { attempts: 3, .. }));
    }

    #[test]
    fn only_pending_items_are_submitted() {
        let temp = TempDir::new().unwrap();
        let (mut store, request) = setup(&temp);
        let mut scheduler = InMemoryScheduler::new();
        let mut adapter =
            SubmissionAdapter::new(&mut scheduler, &config(3)).with_backoff(BackoffPolicy::immediate());
        adapter.submit(&mut store, &request).unwrap();
        assert!(adapter.submit(&mut store, &request).is_err());
    }

    #[test]
    fn concurrency_cap_counts_in_flight_items() {
        let temp = TempDir::new().unwrap();
        let (mut store, request) = setup(&temp);
        let mut step = crate::steps::StepDefinition::from_config(
            "segment",
            &crate::config::StepConfig::default(),
            None,
        )
        .unwrap();
        step.max_concurrent = Some(1);

        let mut scheduler = InMemoryScheduler::new();
        let mut adapter =
            SubmissionAdapter::new(&mut scheduler, &config(3)).with_backoff(BackoffPolicy::immediate());
        assert!(adapter.has_capacity(&store, &step));
        adapter.submit(&mut store, &request).unwrap();
        assert!(!adapter.has_capacity(&store, &step));
    }
}
