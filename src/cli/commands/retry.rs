//! Retry command implementation.
//!
//! `bidsflow retry` adds a fresh attempt for a `Failed` or `Indeterminate`
//! slot. The attempt is submitted by the next `bidsflow run`.

use std::path::{Path, PathBuf};

use crate::cli::args::TargetArgs;
use crate::error::{FlowError, Result};
use crate::runner::Orchestrator;
use crate::state::RunStateStore;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandResult};
use super::project::{Project, CONFIG_ERROR_EXIT_CODE};

/// The retry command implementation.
pub struct RetryCommand {
    project_root: PathBuf,
    config_override: Option<PathBuf>,
    args: TargetArgs,
}

impl RetryCommand {
    pub fn new(project_root: &Path, config_override: Option<&Path>, args: TargetArgs) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_override: config_override.map(Path::to_path_buf),
            args,
        }
    }
}

impl Command for RetryCommand {
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
        let mut store = RunStateStore::open(&project.state_dir(), self.args.break_lock)?;
        let orchestrator = Orchestrator::new(&project.config, &project.catalog);

        match orchestrator.retry(&mut store, &slot) {
            Ok(id) => {
                ui.success(&format!("Created attempt {}", id));
                ui.show_hint("It will be submitted on the next 'bidsflow run'");
                Ok(CommandResult::success())
            }
            Err(e @ (FlowError::InvalidTransition { .. } | FlowError::UnknownWorkItem { .. })) => {
                ui.error(&format!("Cannot retry {}: {}", slot, e));
                Ok(CommandResult::failure(1))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::PairKey;
    use crate::config::CONFIG_DIR;
    use crate::state::{FailureReason, ItemOrigin, SlotKey, WorkItem, WorkItemId, WorkItemState};
    use crate::ui::MockUI;
    use std::fs;
    use tempfile::TempDir;

    fn study() -> TempDir {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.yml"),
            "paths:\n  input_dir: bids\n  derivatives: out\nsteps:\n  segment:\n    version: \"2\"\n    command: recon-all\n",
        )
        .unwrap();
        temp
    }

    fn target() -> TargetArgs {
        TargetArgs {
            subject: "01".into(),
            session: "01".into(),
            step: "segment".into(),
            break_lock: false,
        }
    }

    #[test]
    fn retries_indeterminate_item_at_current_version() {
        let temp = study();
        let state = temp.path().join("out/.bidsflow");
        {
            let mut store = RunStateStore::open(&state, false).unwrap();
            let id = WorkItemId::first(&PairKey::new("01", "01"), "segment");
            store
                .materialize(WorkItem::pending(id.clone(), "1", ItemOrigin::Scheduled))
                .unwrap();
            store.record_transition(&id, WorkItemState::Submitted, None, None).unwrap();
            store
                .record_transition(&id, WorkItemState::Indeterminate, Some(FailureReason::TimedOut), None)
                .unwrap();
        }

        let mut ui = MockUI::new();
        let result = RetryCommand::new(temp.path(), None, target()).execute(&mut ui).unwrap();
        assert!(result.success);
        assert!(ui.has_success("sub-01/ses-01/segment#2"));

        let store = RunStateStore::load(&state).unwrap();
        let slot = SlotKey::new(PairKey::new("01", "01"), "segment");
        let current = store.current(&slot).unwrap();
        assert_eq!(current.state, WorkItemState::Pending);
        assert_eq!(current.version, "2");
    }

    #[test]
    fn unknown_slot_is_reported() {
        let temp = study();
        let mut ui = MockUI::new();
        let result = RetryCommand::new(temp.path(), None, target()).execute(&mut ui).unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(ui.has_error("Cannot retry sub-01/ses-01/segment"));
    }
}
