//! Check command implementation.
//!
//! `bidsflow check` is the preamble of every job unit. It re-validates the
//! outputs of a step's prerequisites (and its raw inputs) on the compute
//! node and exits with [`PREREQUISITE_INVALID_EXIT_CODE`] when any is
//! missing or malformed, so the payload never runs on bad data.

use std::path::{Path, PathBuf};

use crate::cli::args::CheckArgs;
use crate::error::Result;
use crate::sanity::{
    recorded_versions, verify_prerequisites, SanityContext, PREREQUISITE_INVALID_EXIT_CODE,
};
use crate::state::RunStateStore;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandResult};
use super::project::{Project, CONFIG_ERROR_EXIT_CODE};

/// The check command implementation.
pub struct CheckCommand {
    project_root: PathBuf,
    config_override: Option<PathBuf>,
    args: CheckArgs,
}

impl CheckCommand {
    pub fn new(project_root: &Path, config_override: Option<&Path>, args: CheckArgs) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_override: config_override.map(Path::to_path_buf),
            args,
        }
    }
}

impl Command for CheckCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let project = match Project::load(&self.project_root, self.config_override.as_deref()) {
            Ok(project) => project,
            Err(e) if e.is_config_error() => {
                ui.error(&e.to_string());
                return Ok(CommandResult::failure(CONFIG_ERROR_EXIT_CODE));
            }
            Err(e) => return Err(e),
        };
        let slot = project.slot(&self.args.subject, &self.args.session, &self.args.step)?;
        let step = project.catalog.require(&slot.step)?;
        let ctx = SanityContext::new(&project.catalog, &project.config.paths);
        let store = RunStateStore::load(&project.state_dir())?;
        let versions = recorded_versions(&store, &slot.pair);

        let report = verify_prerequisites(&ctx, step, &slot.pair, &versions);

        if self.args.json {
            let text = serde_json::to_string_pretty(&report).map_err(anyhow::Error::from)?;
            println!("{}", text);
        } else if report.satisfied() {
            ui.success(&format!("{}: {}", slot, report.summary()));
        } else {
            ui.error(&format!("{}: {}", slot, report.summary()));
        }

        if report.satisfied() {
            Ok(CommandResult::success())
        } else {
            Ok(CommandResult::failure(PREREQUISITE_INVALID_EXIT_CODE))
        }
    }
}
