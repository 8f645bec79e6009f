//! Per-pair work item graphs.
//!
//! Every (subject, session) pair gets the same DAG shape as the step
//! catalog. [`GraphBuilder`] decides how each slot the store has never seen
//! should start life:
//!
//! - succeeded in the latest run record: seeded `Succeeded` (resumed)
//! - output already valid and adoption enabled: seeded `Succeeded` (adopted)
//! - disabled step with valid output: seeded `Succeeded` (external)
//! - otherwise `Pending`

use crate::cohort::PairKey;
use crate::sanity::SanityContext;
use crate::state::{
    FailureReason, ItemOrigin, RunRecord, RunStateStore, SlotKey, WorkItem, WorkItemId,
    WorkItemState,
};
use crate::steps::{StepCatalog, StepDefinition};
use serde::Serialize;

/// One pair's DAG plus the items the store does not know yet.
#[derive(Debug, Clone)]
pub struct PairGraph {
    pub pair: PairKey,
    /// Step names in topological order.
    pub steps: Vec<String>,
    /// Items to materialize, in topological order.
    pub new_items: Vec<WorkItem>,
}

impl PairGraph {
    pub fn slot(&self, step: &str) -> SlotKey {
        SlotKey::new(self.pair.clone(), step)
    }
}

/// Builds [`PairGraph`]s from the catalog, the store and the latest record.
pub struct GraphBuilder<'a> {
    catalog: &'a StepCatalog,
    prior: Option<&'a RunRecord>,
    adoption: Option<&'a SanityContext<'a>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(catalog: &'a StepCatalog) -> Self {
        Self {
            catalog,
            prior: None,
            adoption: None,
        }
    }

    /// Seed slots that succeeded in a prior run record.
    pub fn with_prior(mut self, prior: Option<&'a RunRecord>) -> Self {
        self.prior = prior;
        self
    }

    /// Check outputs of unseen slots, adopting valid ones.
    pub fn with_adoption(mut self, ctx: &'a SanityContext<'a>) -> Self {
        self.adoption = Some(ctx);
        self
    }

    pub fn build(&self, pairs: &[PairKey], store: &RunStateStore) -> Vec<PairGraph> {
        pairs.iter().map(|pair| self.build_pair(pair, store)).collect()
    }

    fn build_pair(&self, pair: &PairKey, store: &RunStateStore) -> PairGraph {
        let mut new_items = Vec::new();
        for step in self.catalog.iter() {
            let slot = SlotKey::new(pair.clone(), &step.name);
            if store.current(&slot).is_some() {
                continue;
            }
            new_items.push(self.seed(pair, step, &slot));
        }
        PairGraph {
            pair: pair.clone(),
            steps: self.catalog.order().to_vec(),
            new_items,
        }
    }

    fn seed(&self, pair: &PairKey, step: &StepDefinition, slot: &SlotKey) -> WorkItem {
        let id = WorkItemId::first(pair, &step.name);

        if let Some(prior) = self.prior.and_then(|r| r.item(slot)) {
            if prior.state == WorkItemState::Succeeded {
                tracing::debug!(slot = %slot, "Seeded from prior run record");
                return WorkItem::seeded(
                    id,
                    &prior.version,
                    ItemOrigin::Resumed,
                    "succeeded in a prior run",
                );
            }
        }

        let origin = if step.enabled {
            ItemOrigin::Scheduled
        } else {
            ItemOrigin::External
        };

        if let Some(ctx) = self.adoption {
            let verdict = ctx.check_output(step, pair, &step.version, None);
            if verdict.satisfied {
                let origin = if step.enabled {
                    ItemOrigin::Adopted
                } else {
                    ItemOrigin::External
                };
                tracing::debug!(slot = %slot, ?origin, "Adopted existing output");
                return WorkItem::seeded(id, &step.version, origin, &verdict.summary());
            }
        }

        WorkItem::pending(id, &step.version, origin)
    }
}

/// Why a pair cannot make progress on some lineage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Blocker {
    pub step: String,
    pub state: WorkItemState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Downstream steps that cannot start until this is resolved.
    pub blocks: Vec<String>,
}

impl Blocker {
    pub fn summary(&self) -> String {
        let mut text = match self.reason {
            Some(reason) => format!("{} {} ({})", self.step, self.state, reason),
            None => format!("{} {}", self.step, self.state),
        };
        if let Some(detail) = &self.detail {
            text.push_str(": ");
            text.push_str(detail);
        }
        if !self.blocks.is_empty() {
            text.push_str(&format!(" [blocks {}]", self.blocks.join(", ")));
        }
        text
    }
}

/// Failed, indeterminate and unsatisfied external steps of one pair.
pub fn pair_blockers(catalog: &StepCatalog, store: &RunStateStore, pair: &PairKey) -> Vec<Blocker> {
    let mut blockers = Vec::new();
    for step in catalog.iter() {
        let slot = SlotKey::new(pair.clone(), &step.name);
        let Some(item) = store.current(&slot) else {
            continue;
        };
        let blocked = match item.state {
            WorkItemState::Failed | WorkItemState::Indeterminate => true,
            WorkItemState::Pending => !step.enabled,
            _ => false,
        };
        if !blocked {
            continue;
        }
        let detail = if item.state == WorkItemState::Pending {
            Some("waiting on external step".to_string())
        } else {
            item.detail.clone()
        };
        blockers.push(Blocker {
            step: step.name.clone(),
            state: item.state,
            reason: item.reason,
            detail,
            blocks: catalog
                .graph()
                .transitive_dependents(&step.name)
                .into_iter()
                .collect(),
        });
    }
    blockers
}
