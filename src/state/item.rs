//! Work items and their state machine.

use crate::cohort::PairKey;
use crate::scheduler::JobHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identity of one attempt of one step for one pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId {
    pub subject: String,
    pub session: String,
    pub step: String,
    pub attempt: u32,
}

impl WorkItemId {
    /// First attempt of `step` for `pair`.
    pub fn first(pair: &PairKey, step: &str) -> Self {
        Self {
            subject: pair.subject.clone(),
            session: pair.session.clone(),
            step: step.to_string(),
            attempt: 1,
        }
    }

    /// The same slot, one attempt later.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    pub fn pair(&self) -> PairKey {
        PairKey {
            subject: self.subject.clone(),
            session: self.session.clone(),
        }
    }

    /// The slot key shared by every attempt: `sub-01/ses-01/segment`.
    pub fn slot(&self) -> SlotKey {
        SlotKey {
            pair: self.pair(),
            step: self.step.clone(),
        }
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.subject, self.session, self.step, self.attempt
        )
    }
}

/// A (subject, session, step) slot; attempts of the same slot share it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub pair: PairKey,
    pub step: String,
}

impl SlotKey {
    pub fn new(pair: PairKey, step: &str) -> Self {
        Self {
            pair,
            step: step.to_string(),
        }
    }

    /// Parse `sub-01/ses-01/segment` (prefixes optional, `#N` suffix ignored).
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.split('#').next()?;
        let mut parts = input.split('/');
        let subject = parts.next().filter(|s| !s.is_empty())?;
        let session = parts.next().filter(|s| !s.is_empty())?;
        let step = parts.next().filter(|s| !s.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(PairKey::new(subject, session), step))
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pair, self.step)
    }
}

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkItemState {
    Pending,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Indeterminate,
}

impl WorkItemState {
    /// Terminal states are never left; a retry creates a new attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Indeterminate)
    }

    /// Known to the scheduler and not finished.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitted | Self::Running)
    }

    /// Whether the state machine allows `self -> next`.
    ///
    /// `Pending -> Succeeded` is adoption of output produced outside the
    /// scheduler (external steps, pre-existing derivatives).
    pub fn can_transition_to(self, next: Self) -> bool {
        use WorkItemState::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Failed)
                | (Pending, Succeeded)
                | (Submitted, Running)
                | (Submitted, Succeeded)
                | (Submitted, Failed)
                | (Submitted, Indeterminate)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Indeterminate)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Submitted => "Submitted",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Indeterminate => "Indeterminate",
        }
    }
}

impl fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a work item failed or could not be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// A prerequisite's output did not pass its validator.
    PrerequisiteInvalid,
    /// The scheduler refused the submission past the attempt ceiling.
    SubmissionRejected,
    /// Non-zero exit, or exit 0 without valid output.
    ExecutionFailed,
    /// Killed for exceeding its time limit.
    TimedOut,
    /// Cancelled by an operator or the scheduler.
    Cancelled,
    /// The scheduler reported a state that maps to nothing known.
    UnknownSchedulerState,
}

impl FailureReason {
    /// The terminal state this reason belongs to.
    pub fn terminal_state(self) -> WorkItemState {
        match self {
            Self::PrerequisiteInvalid | Self::SubmissionRejected | Self::ExecutionFailed => {
                WorkItemState::Failed
            }
            Self::TimedOut | Self::Cancelled | Self::UnknownSchedulerState => {
                WorkItemState::Indeterminate
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrerequisiteInvalid => "PrerequisiteInvalid",
            Self::SubmissionRejected => "SubmissionRejected",
            Self::ExecutionFailed => "ExecutionFailed",
            Self::TimedOut => "TimedOut",
            Self::Cancelled => "Cancelled",
            Self::UnknownSchedulerState => "UnknownSchedulerState",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a work item came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrigin {
    /// Created for submission by the orchestrator
    #[default]
    Scheduled,
    /// Output already valid when first seen
    Adopted,
    /// Disabled step whose output was produced elsewhere
    External,
    /// Seeded from a prior run record
    Resumed,
    /// Operator or policy retry of a previous attempt
    Retry,
}

/// One step instantiated for one (subject, session), at one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    /// Version tag of the step when this attempt was created.
    pub version: String,
    pub state: WorkItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    #[serde(default)]
    pub origin: ItemOrigin,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Rejected submission attempts so far.
    #[serde(default)]
    pub submit_attempts: u32,
}

impl WorkItem {
    /// A fresh pending item.
    pub fn pending(id: WorkItemId, version: &str, origin: ItemOrigin) -> Self {
        Self {
            id,
            version: version.to_string(),
            state: WorkItemState::Pending,
            reason: None,
            detail: None,
            job: None,
            script: None,
            origin,
            created_at: Utc::now(),
            submitted_at: None,
            started_at: None,
            finished_at: None,
            submit_attempts: 0,
        }
    }

    /// An item that starts life succeeded (adoption, resume).
    pub fn seeded(id: WorkItemId, version: &str, origin: ItemOrigin, detail: &str) -> Self {
        let mut item = Self::pending(id, version, origin);
        item.state = WorkItemState::Succeeded;
        item.detail = Some(detail.to_string());
        item.finished_at = Some(item.created_at);
        item
    }

    pub fn retry_count(&self) -> u32 {
        self.id.attempt.saturating_sub(1)
    }

    pub fn slot(&self) -> SlotKey {
        self.id.slot()
    }
}
