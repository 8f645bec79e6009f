//! Run records: one timestamped snapshot per orchestrator pass.

use crate::config::FlowConfig;
use crate::error::Result;
use crate::state::item::{SlotKey, WorkItem, WorkItemState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Counts of current work items per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub pending: usize,
    pub submitted: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub indeterminate: usize,
}

impl RunSummary {
    /// Tally a set of items.
    pub fn of<'a>(items: impl IntoIterator<Item = &'a WorkItem>) -> Self {
        let mut summary = Self::default();
        for item in items {
            summary.total += 1;
            match item.state {
                WorkItemState::Pending => summary.pending += 1,
                WorkItemState::Submitted => summary.submitted += 1,
                WorkItemState::Running => summary.running += 1,
                WorkItemState::Succeeded => summary.succeeded += 1,
                WorkItemState::Failed => summary.failed += 1,
                WorkItemState::Indeterminate => summary.indeterminate += 1,
            }
        }
        summary
    }

    /// Items still queued or executing.
    pub fn in_flight(&self) -> usize {
        self.submitted + self.running
    }
}

/// The resolved configuration a pass ran under, keyed by content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub digest: String,
    pub yaml: String,
}

impl ConfigSnapshot {
    pub fn of(config: &FlowConfig) -> Result<Self> {
        let yaml = serde_yaml::to_string(config).map_err(anyhow::Error::from)?;
        let digest = hex::encode(Sha256::digest(yaml.as_bytes()));
        Ok(Self {
            digest: digest[..16].to_string(),
            yaml,
        })
    }
}

/// Snapshot of every current work item at the end of a pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    /// Digest of the resolved config; the YAML sits beside the record
    /// as `config-<digest>.yml`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_digest: Option<String>,
    /// Jobs submitted during the pass that produced this record.
    #[serde(default)]
    pub submitted: usize,
    pub summary: RunSummary,
    pub items: Vec<WorkItem>,
}

impl RunRecord {
    /// Build a record for the given items.
    pub fn new(items: Vec<WorkItem>, submitted: usize) -> Self {
        let created_at = Utc::now();
        let run_id = run_id(created_at, &items);
        Self {
            run_id,
            created_at,
            config_digest: None,
            submitted,
            summary: RunSummary::of(&items),
            items,
        }
    }

    pub fn with_config(mut self, config: Option<&ConfigSnapshot>) -> Self {
        self.config_digest = config.map(|c| c.digest.clone());
        self
    }

    /// The recorded item for a slot, if any.
    pub fn item(&self, slot: &SlotKey) -> Option<&WorkItem> {
        self.items.iter().find(|i| &i.slot() == slot)
    }

    /// Whether the slot was succeeded in this record.
    pub fn succeeded(&self, slot: &SlotKey) -> bool {
        self.item(slot)
            .is_some_and(|i| i.state == WorkItemState::Succeeded)
    }

    /// File name under `runs/`: sortable timestamp plus id.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.json",
            self.created_at.format("%Y%m%dT%H%M%S%.3fZ"),
            self.run_id
        )
    }
}

fn run_id(at: DateTime<Utc>, items: &[WorkItem]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(at.to_rfc3339().as_bytes());
    for item in items {
        hasher.update(item.id.to_string().as_bytes());
        hasher.update(item.state.as_str().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}
