//! Cancel command implementation.
//!
//! `bidsflow cancel` asks the scheduler to cancel an in-flight work item and
//! records it `Indeterminate/Cancelled`.

use std::path::{Path, PathBuf};

use crate::cli::args::TargetArgs;
use crate::error::{FlowError, Result};
use crate::runner::Orchestrator;
use crate::scheduler;
use crate::state::RunStateStore;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandResult};
use super::project::{Project, CONFIG_ERROR_EXIT_CODE};

/// The cancel command implementation.
pub struct CancelCommand {
    project_root: PathBuf,
    config_override: Option<PathBuf>,
    args: TargetArgs,
}

impl CancelCommand {
    pub fn new(project_root: &Path, config_override: Option<&Path>, args: TargetArgs) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_override: config_override.map(Path::to_path_buf),
            args,
        }
    }
}

impl Command for CancelCommand {
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
        let mut backend = scheduler::from_config(&project.config, false);
        let orchestrator = Orchestrator::new(&project.config, &project.catalog);

        match orchestrator.cancel(&mut store, backend.as_mut(), &slot) {
            Ok(id) => {
                ui.success(&format!("Cancelled {}", id));
                ui.show_hint(&format!(
                    "Retry with 'bidsflow retry --subject {} --session {} --step {}'",
                    slot.pair.subject, slot.pair.session, slot.step
                ));
                Ok(CommandResult::success())
            }
            Err(e @ (FlowError::InvalidTransition { .. } | FlowError::UnknownWorkItem { .. })) => {
                ui.error(&format!("Cannot cancel {}: {}", slot, e));
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
    use crate::state::{ItemOrigin, WorkItem, WorkItemId, WorkItemState};
    use crate::ui::MockUI;
    use std::fs;
    use tempfile::TempDir;

    fn study(kind: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.yml"),
            format!(
                "paths:\n  input_dir: bids\n  derivatives: out\nscheduler:\n  kind: {}\nsteps:\n  segment:\n    command: recon-all\n",
                kind
            ),
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
    fn pending_item_cannot_be_cancelled() {
        let temp = study("local");
        {
            let mut store = RunStateStore::open(&temp.path().join("out/.bidsflow"), false).unwrap();
            store
                .materialize(WorkItem::pending(
                    WorkItemId::first(&PairKey::new("01", "01"), "segment"),
                    "0",
                    ItemOrigin::Scheduled,
                ))
                .unwrap();
        }
        let mut ui = MockUI::new();
        let result = CancelCommand::new(temp.path(), None, target()).execute(&mut ui).unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(ui.has_error("Cannot cancel"));
    }

    #[test]
    fn in_flight_item_becomes_indeterminate() {
        let temp = study("dry_run");
        let state = temp.path().join("out/.bidsflow");
        let id = WorkItemId::first(&PairKey::new("01", "01"), "segment");
        {
            let mut store = RunStateStore::open(&state, false).unwrap();
            store
                .materialize(WorkItem::pending(id.clone(), "0", ItemOrigin::Scheduled))
                .unwrap();
            store.record_transition(&id, WorkItemState::Submitted, None, None).unwrap();
        }

        let mut ui = MockUI::new();
        let result = CancelCommand::new(temp.path(), None, target()).execute(&mut ui).unwrap();
        assert!(result.success);
        assert!(ui.has_hint("bidsflow retry --subject sub-01"));

        let store = RunStateStore::load(&state).unwrap();
        assert_eq!(store.get(&id).unwrap().state, WorkItemState::Indeterminate);
    }
}
