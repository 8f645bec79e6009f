//! Status command implementation.
//!
//! The `bidsflow status` command shows the current work item of every
//! (pair, step) slot and what blocks each pair. It reads the store without
//! taking the lock, so it can run while a pass is in progress.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::args::StatusArgs;
use crate::cohort::{resolve_pairs, CohortFilter, PairKey};
use crate::error::Result;
use crate::runner::{pair_blockers, Blocker};
use crate::state::{RunStateStore, SlotKey, WorkItem};
use crate::ui::{format_relative_time, FlowTheme, Table, UserInterface};

use super::dispatcher::{Command, CommandResult};
use super::display;
use super::project::{Project, CONFIG_ERROR_EXIT_CODE};

/// The status command implementation.
pub struct StatusCommand {
    project_root: PathBuf,
    config_override: Option<PathBuf>,
    args: StatusArgs,
}

#[derive(Debug, Serialize)]
struct PairStatus<'a> {
    pair: String,
    items: Vec<&'a WorkItem>,
    /// Steps with no work item yet.
    unseen: Vec<String>,
    blockers: Vec<Blocker>,
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    last_run: Option<String>,
    pairs: Vec<PairStatus<'a>>,
}

impl StatusCommand {
    pub fn new(project_root: &Path, config_override: Option<&Path>, args: StatusArgs) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_override: config_override.map(Path::to_path_buf),
            args,
        }
    }

    fn pair_status<'a>(&self, project: &Project, store: &'a RunStateStore, pair: &PairKey) -> PairStatus<'a> {
        let mut items = Vec::new();
        let mut unseen = Vec::new();
        for step in project.catalog.iter() {
            if self.args.step.as_ref().is_some_and(|s| s != &step.name) {
                continue;
            }
            match store.current(&SlotKey::new(pair.clone(), &step.name)) {
                Some(item) => items.push(item),
                None => unseen.push(step.name.clone()),
            }
        }
        let blockers = pair_blockers(&project.catalog, store, pair)
            .into_iter()
            .filter(|b| self.args.step.as_ref().map_or(true, |s| s == &b.step))
            .collect();
        PairStatus {
            pair: pair.to_string(),
            items,
            unseen,
            blockers,
        }
    }
}

impl Command for StatusCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let project = match Project::load(&self.project_root, self.config_override.as_deref()) {
            Ok(project) => project,
            Err(e) if e.is_config_error() => {
                ui.error(&e.to_string());
                return Ok(CommandResult::failure(CONFIG_ERROR_EXIT_CODE));
            }
            Err(e) => return Err(e),
        };
        if let Some(step) = &self.args.step {
            project.catalog.require(step)?;
        }

        let store = RunStateStore::load(&project.state_dir())?;
        let filter = CohortFilter {
            subjects: self.args.cohort.subjects.clone(),
            sessions: self.args.cohort.sessions.clone(),
        };
        let pairs = resolve_pairs(&project.config, &filter)?;
        let last = store.latest_run_record().ok().flatten();

        let report = StatusReport {
            last_run: last.as_ref().map(|r| r.run_id.clone()),
            pairs: pairs
                .iter()
                .map(|p| self.pair_status(&project, &store, p))
                .collect(),
        };

        if self.args.json {
            let text = serde_json::to_string_pretty(&report).map_err(anyhow::Error::from)?;
            println!("{}", text);
            return Ok(CommandResult::success());
        }

        let title = project.config.project.as_deref().unwrap_or("bidsflow");
        ui.show_header(&format!("{} - Status", title));
        match &last {
            Some(record) => ui.message(&format!(
                "Last pass: {} ({}), {}",
                record.run_id,
                format_relative_time(record.created_at),
                display::summary_line(&record.summary)
            )),
            None => ui.message("No passes recorded yet. Run 'bidsflow run'."),
        }

        let theme = FlowTheme::detect();
        for pair in &report.pairs {
            ui.show_header(&pair.pair);
            let mut table = Table::new(&["Step", "State", "Attempt", "Job", "Runtime", "Reason"]);
            for item in &pair.items {
                table.add_row(vec![
                    item.id.step.clone(),
                    theme.format_state(item.state),
                    item.id.attempt.to_string(),
                    item.job.as_ref().map(|j| j.to_string()).unwrap_or_default(),
                    display::item_runtime(item).unwrap_or_default(),
                    item.reason.map(|r| r.to_string()).unwrap_or_default(),
                ]);
            }
            for step in &pair.unseen {
                table.add_row(vec![step.clone(), theme.format_hint("not yet seen")]);
            }
            ui.show_table(&table);
            for blocker in &pair.blockers {
                ui.warning(&format!("{} blocked: {}", pair.pair, blocker.summary()));
            }
        }

        if report.pairs.is_empty() {
            ui.warning("No subject/session pairs matched");
        }
        Ok(CommandResult::success())
    }
}
