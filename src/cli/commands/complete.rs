//! Complete command implementation.
//!
//! `bidsflow complete` is the postamble of every job unit. It runs only
//! after the payload exited 0 and writes the completion marker the
//! `marker` validator looks for.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::cli::args::CompleteArgs;
use crate::error::Result;
use crate::sanity::CompletionMarker;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandResult};
use super::project::{Project, CONFIG_ERROR_EXIT_CODE};

/// The complete command implementation.
pub struct CompleteCommand {
    project_root: PathBuf,
    config_override: Option<PathBuf>,
    args: CompleteArgs,
}

impl CompleteCommand {
    pub fn new(project_root: &Path, config_override: Option<&Path>, args: CompleteArgs) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_override: config_override.map(Path::to_path_buf),
            args,
        }
    }
}

impl Command for CompleteCommand {
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

        let marker = CompletionMarker {
            step: slot.step.clone(),
            version: self
                .args
                .step_version
                .clone()
                .unwrap_or_else(|| step.version.clone()),
            subject: slot.pair.subject.clone(),
            session: slot.pair.session.clone(),
            job_id: self.args.job_id.clone().filter(|j| !j.trim().is_empty()),
            attempt: self.args.attempt,
            finished_at: Utc::now(),
        };
        let path = project.layout().marker(&slot.pair, &slot.step);
        marker.write(&path)?;

        tracing::info!(slot = %slot, version = %marker.version, path = %path.display(), "Wrote completion marker");
        ui.success(&format!("Marked {} complete (version {})", slot, marker.version));
        Ok(CommandResult::success())
    }
}
