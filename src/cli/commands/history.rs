//! History command implementation.
//!
//! The `bidsflow history` command lists recorded passes, newest first.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::args::HistoryArgs;
use crate::error::Result;
use crate::state::{RunStateStore, RunSummary};
use crate::ui::{format_relative_time, Table, UserInterface};

use super::dispatcher::{Command, CommandResult};
use super::project::{Project, CONFIG_ERROR_EXIT_CODE};

/// The history command implementation.
pub struct HistoryCommand {
    project_root: PathBuf,
    config_override: Option<PathBuf>,
    args: HistoryArgs,
}

#[derive(Debug, Serialize)]
struct HistoryEntry {
    run_id: String,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_digest: Option<String>,
    submitted: usize,
    summary: RunSummary,
}

impl HistoryCommand {
    pub fn new(project_root: &Path, config_override: Option<&Path>, args: HistoryArgs) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_override: config_override.map(Path::to_path_buf),
            args,
        }
    }
}

impl Command for HistoryCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let project = match Project::load(&self.project_root, self.config_override.as_deref()) {
            Ok(project) => project,
            Err(e) if e.is_config_error() => {
                ui.error(&e.to_string());
                return Ok(CommandResult::failure(CONFIG_ERROR_EXIT_CODE));
            }
            Err(e) => return Err(e),
        };
        let store = RunStateStore::load(&project.state_dir())?;
        let entries: Vec<HistoryEntry> = store
            .run_records()?
            .into_iter()
            .take(self.args.limit)
            .map(|r| HistoryEntry {
                run_id: r.run_id,
                created_at: r.created_at,
                config_digest: r.config_digest,
                submitted: r.submitted,
                summary: r.summary,
            })
            .collect();

        if self.args.json {
            let text = serde_json::to_string_pretty(&entries).map_err(anyhow::Error::from)?;
            println!("{}", text);
            return Ok(CommandResult::success());
        }

        if entries.is_empty() {
            ui.message("No passes recorded yet.");
            return Ok(CommandResult::success());
        }

        ui.show_header("Pass history");
        let mut table = Table::new(&[
            "Run", "When", "Config", "Submitted", "Pending", "In flight", "Succeeded", "Failed", "Indeterminate",
        ]);
        for entry in &entries {
            let s = &entry.summary;
            table.add_row(vec![
                entry.run_id.clone(),
                format_relative_time(entry.created_at),
                entry.config_digest.clone().unwrap_or_else(|| "-".to_string()),
                entry.submitted.to_string(),
                s.pending.to_string(),
                s.in_flight().to_string(),
                s.succeeded.to_string(),
                s.failed.to_string(),
                s.indeterminate.to_string(),
            ]);
        }
        ui.show_table(&table);
        Ok(CommandResult::success())
    }
}
