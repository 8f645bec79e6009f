//! The run state store.
//!
//! Every change is appended to `transitions.jsonl` (one JSON event per
//! line, synced before the in-memory view changes). Opening a store replays
//! the log into the current view. Run records are written atomically under
//! `runs/`.
//!
//! Layout of a state directory:
//!
//! ```text
//! <state_dir>/
//!   lock
//!   transitions.jsonl
//!   runs/<timestamp>-<id>.json
//!   runs/latest.json
//!   runs/config-<digest>.yml
//!   units/<subject>/<session>/<step>-<attempt>.sh
//!   markers/<subject>/<session>/<step>.json
//! ```

use crate::cohort::PairKey;
use crate::error::{FlowError, Result};
use crate::scheduler::JobHandle;
use crate::state::item::{
    FailureReason, ItemOrigin, SlotKey, WorkItem, WorkItemId, WorkItemState,
};
use crate::state::lock::StoreLock;
use crate::state::record::{ConfigSnapshot, RunRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Paths inside a state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    pub fn transitions(&self) -> PathBuf {
        self.root.join("transitions.jsonl")
    }

    pub fn runs(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn latest_run(&self) -> PathBuf {
        self.runs().join("latest.json")
    }

    /// Resolved config a run record points at.
    pub fn config_copy(&self, digest: &str) -> PathBuf {
        self.runs().join(format!("config-{}.yml", digest))
    }

    /// Directory holding generated job units for a pair.
    pub fn units(&self, pair: &PairKey) -> PathBuf {
        self.root
            .join("units")
            .join(&pair.subject)
            .join(&pair.session)
    }

    /// Completion marker written by a unit's postamble.
    pub fn marker(&self, pair: &PairKey, step: &str) -> PathBuf {
        self.root
            .join("markers")
            .join(&pair.subject)
            .join(&pair.session)
            .join(format!("{}.json", step))
    }

    /// Scheduler log files for one attempt.
    pub fn logs(&self, id: &WorkItemId) -> (PathBuf, PathBuf) {
        let dir = self.root.join("logs").join(&id.subject).join(&id.session);
        let stem = format!("{}-{}", id.step, id.attempt);
        (
            dir.join(format!("{}.out", stem)),
            dir.join(format!("{}.err", stem)),
        )
    }
}

/// One line of the transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A new work item (first attempt, seeded item or retry).
    Created { at: DateTime<Utc>, item: WorkItem },

    /// A state change of an existing work item.
    Transition {
        at: DateTime<Utc>,
        id: WorkItemId,
        from: WorkItemState,
        to: WorkItemState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<FailureReason>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job: Option<JobHandle>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script: Option<PathBuf>,
    },

    /// The scheduler refused a submission; the item stays pending.
    SubmitRejected {
        at: DateTime<Utc>,
        id: WorkItemId,
        attempt: u32,
        error: String,
    },
}

/// Write `bytes` to `path` via a temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// How a store persists what it is told.
#[derive(Debug)]
enum StoreMode {
    ReadOnly,
    Locked(StoreLock),
    /// Writes change the in-memory view only (dry runs).
    Scratch,
}

/// Owner of every work item and run record.
#[derive(Debug)]
pub struct RunStateStore {
    layout: StateLayout,
    items: BTreeMap<WorkItemId, WorkItem>,
    current: BTreeMap<SlotKey, WorkItemId>,
    mode: StoreMode,
}

impl RunStateStore {
    /// Open a state directory for writing, taking its lock.
    pub fn open(dir: &Path, break_lock: bool) -> Result<Self> {
        let layout = StateLayout::new(dir);
        fs::create_dir_all(layout.runs())?;
        let lock = StoreLock::acquire(&layout.lock(), break_lock)?;
        let mut store = Self::replay(layout)?;
        store.mode = StoreMode::Locked(lock);
        Ok(store)
    }

    /// Load a state directory read-only. A missing directory is empty state.
    pub fn load(dir: &Path) -> Result<Self> {
        Self::replay(StateLayout::new(dir))
    }

    /// Turn a loaded store into one whose writes never reach disk.
    pub fn into_scratch(mut self) -> Self {
        self.mode = StoreMode::Scratch;
        self
    }

    /// Whether writes are kept in memory only.
    pub fn is_scratch(&self) -> bool {
        matches!(self.mode, StoreMode::Scratch)
    }

    fn replay(layout: StateLayout) -> Result<Self> {
        let mut store = Self {
            layout,
            items: BTreeMap::new(),
            current: BTreeMap::new(),
            mode: StoreMode::ReadOnly,
        };

        let path = store.layout.transitions();
        if !path.exists() {
            return Ok(store);
        }

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoreEvent>(line) {
                Ok(event) => store.apply(event)?,
                Err(e) if idx + 1 == lines.len() => {
                    tracing::warn!(line = idx + 1, error = %e, "Ignoring truncated last transition");
                }
                Err(e) => {
                    return Err(FlowError::StateCorrupt {
                        path,
                        message: format!("line {}: {}", idx + 1, e),
                    })
                }
            }
        }

        tracing::debug!(items = store.items.len(), "Replayed transition log");
        Ok(store)
    }

    fn apply(&mut self, event: StoreEvent) -> Result<()> {
        match event {
            StoreEvent::Created { item, .. } => {
                self.current.insert(item.slot(), item.id.clone());
                self.items.insert(item.id.clone(), item);
            }
            StoreEvent::Transition {
                at,
                id,
                to,
                reason,
                detail,
                job,
                script,
                ..
            } => {
                let item = self.items.get_mut(&id).ok_or_else(|| FlowError::StateCorrupt {
                    path: self.layout.transitions(),
                    message: format!("transition for unknown item {}", id),
                })?;
                item.state = to;
                if reason.is_some() {
                    item.reason = reason;
                }
                if detail.is_some() {
                    item.detail = detail;
                }
                if job.is_some() {
                    item.job = job;
                }
                if script.is_some() {
                    item.script = script;
                }
                match to {
                    WorkItemState::Submitted => item.submitted_at = Some(at),
                    WorkItemState::Running => item.started_at = Some(at),
                    s if s.is_terminal() => item.finished_at = Some(at),
                    _ => {}
                }
            }
            StoreEvent::SubmitRejected { id, attempt, error, .. } => {
                let item = self.items.get_mut(&id).ok_or_else(|| FlowError::StateCorrupt {
                    path: self.layout.transitions(),
                    message: format!("rejection for unknown item {}", id),
                })?;
                item.submit_attempts = attempt;
                item.detail = Some(error);
            }
        }
        Ok(())
    }

    fn append(&mut self, event: StoreEvent) -> Result<()> {
        match self.mode {
            StoreMode::ReadOnly => {
                return Err(FlowError::Other(anyhow::anyhow!(
                    "run state at {} was opened read-only",
                    self.layout.root().display()
                )))
            }
            StoreMode::Scratch => return self.apply(event),
            StoreMode::Locked(_) => {}
        }
        let line = serde_json::to_string(&event).map_err(anyhow::Error::from)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.layout.transitions())?;
        writeln!(file, "{}", line)?;
        file.sync_data()?;
        self.apply(event)
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Insert a work item for a slot that has none yet.
    ///
    /// Returns `false` (and changes nothing) if the slot already has an item.
    pub fn materialize(&mut self, item: WorkItem) -> Result<bool> {
        if self.current.contains_key(&item.slot()) {
            return Ok(false);
        }
        tracing::debug!(item = %item.id, state = %item.state, origin = ?item.origin, "Materialized work item");
        self.append(StoreEvent::Created {
            at: Utc::now(),
            item,
        })?;
        Ok(true)
    }

    /// Move a work item to a new state.
    ///
    /// Recording the state an item is already in is a no-op returning
    /// `false`. `Failed` and `Indeterminate` require a reason of the
    /// matching kind. Leaving a terminal state is rejected.
    pub fn record_transition(
        &mut self,
        id: &WorkItemId,
        to: WorkItemState,
        reason: Option<FailureReason>,
        detail: Option<String>,
    ) -> Result<bool> {
        self.transition(id, to, reason, detail, None, None)
    }

    /// Record a successful submission (`Pending -> Submitted`).
    pub fn record_submitted(
        &mut self,
        id: &WorkItemId,
        job: JobHandle,
        script: PathBuf,
    ) -> Result<bool> {
        self.transition(id, WorkItemState::Submitted, None, None, Some(job), Some(script))
    }

    fn transition(
        &mut self,
        id: &WorkItemId,
        to: WorkItemState,
        reason: Option<FailureReason>,
        detail: Option<String>,
        job: Option<JobHandle>,
        script: Option<PathBuf>,
    ) -> Result<bool> {
        let item = self.get(id).ok_or_else(|| FlowError::UnknownWorkItem {
            key: id.to_string(),
        })?;
        let from = item.state;

        if from == to {
            return Ok(false);
        }

        let invalid = |to_label: String| FlowError::InvalidTransition {
            item: id.to_string(),
            from: from.to_string(),
            to: to_label,
        };

        if !from.can_transition_to(to) {
            return Err(invalid(to.to_string()));
        }

        match (to, reason) {
            (WorkItemState::Failed | WorkItemState::Indeterminate, Some(r))
                if r.terminal_state() == to => {}
            (WorkItemState::Failed | WorkItemState::Indeterminate, r) => {
                return Err(invalid(format!(
                    "{} ({})",
                    to,
                    r.map_or("no reason", FailureReason::as_str)
                )))
            }
            (_, Some(r)) => return Err(invalid(format!("{} ({})", to, r))),
            _ => {}
        }

        tracing::info!(item = %id, %from, %to, reason = ?reason, "Work item transition");
        self.append(StoreEvent::Transition {
            at: Utc::now(),
            id: id.clone(),
            from,
            to,
            reason,
            detail,
            job,
            script,
        })?;
        Ok(true)
    }

    /// Count a rejected submission; returns the attempts made so far.
    pub fn record_submit_rejection(&mut self, id: &WorkItemId, error: &str) -> Result<u32> {
        let item = self.get(id).ok_or_else(|| FlowError::UnknownWorkItem {
            key: id.to_string(),
        })?;
        if item.state != WorkItemState::Pending {
            return Err(FlowError::InvalidTransition {
                item: id.to_string(),
                from: item.state.to_string(),
                to: "Pending (rejected submission)".to_string(),
            });
        }
        let attempt = item.submit_attempts + 1;
        tracing::warn!(item = %id, attempt, error, "Submission rejected");
        self.append(StoreEvent::SubmitRejected {
            at: Utc::now(),
            id: id.clone(),
            attempt,
            error: error.to_string(),
        })?;
        Ok(attempt)
    }

    /// Create a fresh pending attempt for a failed or indeterminate slot.
    ///
    /// The previous attempt is kept unchanged.
    pub fn retry(&mut self, slot: &SlotKey, version: &str, origin: ItemOrigin) -> Result<WorkItemId> {
        let item = self.current(slot).ok_or_else(|| FlowError::UnknownWorkItem {
            key: slot.to_string(),
        })?;
        if !matches!(
            item.state,
            WorkItemState::Failed | WorkItemState::Indeterminate
        ) {
            return Err(FlowError::InvalidTransition {
                item: item.id.to_string(),
                from: item.state.to_string(),
                to: "Pending (retry)".to_string(),
            });
        }
        let next = WorkItem::pending(item.id.next_attempt(), version, origin);
        let id = next.id.clone();
        tracing::info!(item = %id, "Created retry attempt");
        self.append(StoreEvent::Created {
            at: Utc::now(),
            item: next,
        })?;
        Ok(id)
    }

    /// Look up any attempt by id.
    pub fn get(&self, id: &WorkItemId) -> Option<&WorkItem> {
        self.items.get(id)
    }

    /// The latest attempt for a slot.
    pub fn current(&self, slot: &SlotKey) -> Option<&WorkItem> {
        self.current.get(slot).and_then(|id| self.items.get(id))
    }

    /// Latest attempts of every slot, ordered by slot.
    pub fn current_items(&self) -> impl Iterator<Item = &WorkItem> {
        self.current.values().filter_map(|id| self.items.get(id))
    }

    /// Every attempt of a slot, oldest first.
    pub fn attempts(&self, slot: &SlotKey) -> Vec<&WorkItem> {
        self.items.values().filter(|i| &i.slot() == slot).collect()
    }

    /// Ids of current items that the scheduler knows about.
    pub fn in_flight(&self) -> Vec<WorkItemId> {
        self.current_items()
            .filter(|i| i.state.is_in_flight())
            .map(|i| i.id.clone())
            .collect()
    }

    /// In-flight items of one step.
    pub fn in_flight_for_step(&self, step: &str) -> usize {
        self.current_items()
            .filter(|i| i.id.step == step && i.state.is_in_flight())
            .count()
    }

    /// Persist a run record of the current view.
    ///
    /// The resolved config is written once per digest. Old records are
    /// pruned only when a retention is given.
    pub fn snapshot(
        &mut self,
        submitted: usize,
        config: Option<&ConfigSnapshot>,
        retention: Option<usize>,
    ) -> Result<RunRecord> {
        let record = RunRecord::new(self.current_items().cloned().collect(), submitted)
            .with_config(config);
        match self.mode {
            StoreMode::ReadOnly => {
                return Err(FlowError::Other(anyhow::anyhow!(
                    "cannot snapshot a read-only run state"
                )))
            }
            StoreMode::Scratch => return Ok(record),
            StoreMode::Locked(_) => {}
        }
        if let Some(config) = config {
            let path = self.layout.config_copy(&config.digest);
            if !path.exists() {
                write_atomic(&path, config.yaml.as_bytes())?;
                tracing::info!(digest = %config.digest, "Recorded resolved configuration");
            }
        }
        let body = serde_json::to_vec_pretty(&record).map_err(anyhow::Error::from)?;
        write_atomic(&self.layout.runs().join(record.file_name()), &body)?;
        write_atomic(&self.layout.latest_run(), &body)?;
        if let Some(retention) = retention {
            self.prune(retention)?;
        }
        tracing::debug!(run = %record.run_id, "Wrote run record");
        Ok(record)
    }

    fn prune(&self, retention: usize) -> Result<()> {
        let mut files = self.record_files()?;
        if files.len() <= retention.max(1) {
            return Ok(());
        }
        let excess = files.len() - retention.max(1);
        for path in files.drain(..excess) {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Timestamped record files, oldest first.
    fn record_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.layout.runs();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension().is_some_and(|e| e == "json")
                    && p.file_name().is_some_and(|n| n != "latest.json")
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn read_record(path: &Path) -> Result<RunRecord> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| FlowError::StateCorrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// The most recent run record, used to seed a resumed graph.
    pub fn latest_run_record(&self) -> Result<Option<RunRecord>> {
        let path = self.layout.latest_run();
        if !path.exists() {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    /// All retained run records, newest first.
    pub fn run_records(&self) -> Result<Vec<RunRecord>> {
        let mut records = self
            .record_files()?
            .iter()
            .map(|p| Self::read_record(p))
            .collect::<Result<Vec<_>>>()?;
        records.reverse();
        Ok(records)
    }
}
