//! Run command implementation.
//!
//! `bidsflow run` executes one orchestrator pass. With `--watch` it keeps
//! passing, releasing the store lock between passes, until every pair has
//! settled or `--max-passes` is reached.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::args::RunArgs;
use crate::cohort::{resolve_pairs, CohortFilter};
use crate::config::SchedulerKind;
use crate::error::Result;
use crate::runner::{Orchestrator, PassOptions, PassReport};
use crate::scheduler;
use crate::script::Invocation;
use crate::state::RunStateStore;
use crate::ui::{FlowTheme, UserInterface};

use super::dispatcher::{Command, CommandResult};
use super::display;
use super::project::{Project, CONFIG_ERROR_EXIT_CODE};

/// The run command implementation.
pub struct RunCommand {
    project_root: PathBuf,
    config_override: Option<PathBuf>,
    args: RunArgs,
}

impl RunCommand {
    pub fn new(project_root: &Path, config_override: Option<&Path>, args: RunArgs) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_override: config_override.map(Path::to_path_buf),
            args,
        }
    }

    pub fn args(&self) -> &RunArgs {
        &self.args
    }

    fn open_store(&self, state_dir: &Path, dry_run: bool, first_pass: bool) -> Result<RunStateStore> {
        if dry_run {
            Ok(RunStateStore::load(state_dir)?.into_scratch())
        } else {
            RunStateStore::open(state_dir, self.args.break_lock && first_pass)
        }
    }

    fn report(&self, ui: &mut dyn UserInterface, theme: &FlowTheme, report: &PassReport) -> Result<()> {
        if self.args.json {
            let line = serde_json::to_string(report).map_err(anyhow::Error::from)?;
            println!("{}", line);
        } else {
            display::show_pass(ui, theme, report);
        }
        Ok(())
    }
}

impl Command for RunCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let project = match Project::load(&self.project_root, self.config_override.as_deref())
            .and_then(|p| p.select_steps(&self.args.steps))
        {
            Ok(project) => project,
            Err(e) if e.is_config_error() => {
                ui.error(&e.to_string());
                return Ok(CommandResult::failure(CONFIG_ERROR_EXIT_CODE));
            }
            Err(e) => return Err(e),
        };

        let filter = CohortFilter {
            subjects: self.args.cohort.subjects.clone(),
            sessions: self.args.cohort.sessions.clone(),
        };
        let pairs = resolve_pairs(&project.config, &filter)?;
        if pairs.is_empty() {
            ui.warning("No subject/session pairs matched; nothing to do");
            return Ok(CommandResult::success());
        }

        // a dry-run backend never learns job outcomes, so its state is never kept
        let dry_run = self.args.dry_run || project.config.scheduler.kind == SchedulerKind::DryRun;
        let watch = match (self.args.watch, dry_run) {
            (Some(_), true) => {
                ui.warning("--watch is ignored with --dry-run");
                None
            }
            (watch, _) => watch.map(Duration::from_secs),
        };

        let invocation = Invocation::current()
            .with_project(&project.root)
            .with_config(project.config_override.clone());
        let options = PassOptions::new(pairs, invocation);
        let orchestrator = Orchestrator::new(&project.config, &project.catalog);
        let mut scheduler = scheduler::from_config(&project.config, dry_run);
        let state_dir = project.state_dir();
        let theme = FlowTheme::detect();

        let mut passes = 0;
        let last = loop {
            passes += 1;
            let report = {
                let mut store = self.open_store(&state_dir, dry_run, passes == 1)?;
                orchestrator.run_pass(&mut store, scheduler.as_mut(), &options)?
            };
            self.report(ui, &theme, &report)?;

            let Some(interval) = watch else {
                break report;
            };
            if report.settled() {
                tracing::info!(passes, "All pairs settled");
                break report;
            }
            if self.args.max_passes.is_some_and(|max| passes >= max) {
                tracing::info!(passes, "Reached --max-passes");
                break report;
            }
            std::thread::sleep(interval);
        };

        if last.blockers.values().any(|b| !b.is_empty()) {
            Ok(CommandResult::failure(1))
        } else {
            Ok(CommandResult::success())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::CohortArgs;
    use crate::config::CONFIG_DIR;
    use crate::ui::MockUI;
    use std::fs;
    use tempfile::TempDir;

    fn study(steps: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::create_dir_all(temp.path().join("bids/sub-01/ses-01")).unwrap();
        fs::write(
            dir.join("config.yml"),
            format!(
                "paths:\n  input_dir: bids\n  derivatives: derivatives\nscheduler:\n  kind: dry_run\nsteps:\n{}",
                steps
            ),
        )
        .unwrap();
        temp
    }

    #[test]
    fn dry_run_reports_without_state() {
        let temp = study("  segment:\n    command: recon-all\n");
        let args = RunArgs {
            dry_run: true,
            ..Default::default()
        };
        let mut ui = MockUI::new();
        let result = RunCommand::new(temp.path(), None, args).execute(&mut ui).unwrap();

        assert!(result.success);
        assert!(ui.has_success("Would submit 1 job(s)"));
        assert!(!temp.path().join("derivatives/.bidsflow").exists());
    }

    #[test]
    fn unknown_step_filter_is_config_error() {
        let temp = study("  segment:\n    command: recon-all\n");
        let args = RunArgs {
            steps: vec!["nope".into()],
            ..Default::default()
        };
        let mut ui = MockUI::new();
        let result = RunCommand::new(temp.path(), None, args).execute(&mut ui).unwrap();
        assert_eq!(result.exit_code, CONFIG_ERROR_EXIT_CODE);
        assert!(ui.has_error("nope"));
    }

    #[test]
    fn unmatched_cohort_is_a_no_op() {
        let temp = study("  segment:\n    command: recon-all\n");
        let args = RunArgs {
            cohort: CohortArgs {
                subjects: vec!["99".into()],
                sessions: Vec::new(),
            },
            ..Default::default()
        };
        let mut ui = MockUI::new();
        let result = RunCommand::new(temp.path(), None, args).execute(&mut ui).unwrap();
        assert!(result.success);
        assert!(ui.has_warning("No subject/session pairs matched"));
    }

    #[test]
    fn dry_run_backend_never_keeps_state() {
        let temp = study("  segment:\n    command: recon-all\n");
        let mut ui = MockUI::new();
        let result = RunCommand::new(temp.path(), None, RunArgs::default())
            .execute(&mut ui)
            .unwrap();

        assert!(result.success);
        assert!(ui.headers()[0].ends_with("(dry run)"));
        assert!(!temp.path().join("derivatives/.bidsflow").exists());
    }
}
