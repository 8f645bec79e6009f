//! Command dispatching.
//!
//! This module provides the core command infrastructure:
//! - [`Command`] trait for implementing commands
//! - [`CommandResult`] for uniform result reporting
//! - [`CommandDispatcher`] for routing CLI subcommands

use std::path::{Path, PathBuf};

use crate::cli::args::{Cli, Commands};
use crate::error::Result;
use crate::ui::UserInterface;

use super::{cancel, check, complete, completions, config, history, retry, run, status, validate};

/// Trait for command implementations.
pub trait Command {
    /// Execute the command, reporting through `ui`.
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult>;
}

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult {
    /// Whether the command succeeded.
    pub success: bool,

    /// Exit code to use (0 for success, non-zero for failure).
    pub exit_code: i32,
}

impl CommandResult {
    /// Create a successful result.
    pub fn success() -> Self {
        Self {
            success: true,
            exit_code: 0,
        }
    }

    /// Create a failure result.
    pub fn failure(exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code,
        }
    }
}

/// Dispatches CLI commands to their implementations.
pub struct CommandDispatcher {
    project_root: PathBuf,
    config_override: Option<PathBuf>,
}

impl CommandDispatcher {
    /// Create a new dispatcher for the given study root.
    pub fn new(project_root: PathBuf) -> Self {
        Self {
            project_root,
            config_override: None,
        }
    }

    /// Use an explicit config file instead of `.bidsflow/config.yml`.
    pub fn with_config(mut self, config: Option<PathBuf>) -> Self {
        self.config_override = config;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Route the CLI subcommand to its implementation and execute it.
    pub fn dispatch(&self, cli: &Cli, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let root = self.project_root.as_path();
        let alt = self.config_override.as_deref();
        match &cli.command {
            Commands::Run(args) => run::RunCommand::new(root, alt, args.clone()).execute(ui),
            Commands::Status(args) => {
                status::StatusCommand::new(root, alt, args.clone()).execute(ui)
            }
            Commands::Retry(args) => {
                retry::RetryCommand::new(root, alt, args.clone()).execute(ui)
            }
            Commands::Cancel(args) => {
                cancel::CancelCommand::new(root, alt, args.clone()).execute(ui)
            }
            Commands::History(args) => {
                history::HistoryCommand::new(root, alt, args.clone()).execute(ui)
            }
            Commands::Validate(args) => {
                validate::ValidateCommand::new(root, alt, args.clone()).execute(ui)
            }
            Commands::Config(args) => {
                config::ConfigCommand::new(root, alt, args.clone()).execute(ui)
            }
            Commands::Check(args) => {
                check::CheckCommand::new(root, alt, args.clone()).execute(ui)
            }
            Commands::Complete(args) => {
                complete::CompleteCommand::new(root, alt, args.clone()).execute(ui)
            }
            Commands::Completions(args) => {
                completions::CompletionsCommand::new(args.clone()).execute(ui)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_result_success() {
        let result = CommandResult::success();
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn command_result_failure() {
        let result = CommandResult::failure(97);
        assert!(!result.success);
        assert_eq!(result.exit_code, 97);
    }

    #[test]
    fn dispatcher_keeps_root_and_override() {
        let dispatcher = CommandDispatcher::new(PathBuf::from("/study"))
            .with_config(Some(PathBuf::from("/study/alt.yml")));
        assert_eq!(dispatcher.project_root(), Path::new("/study"));
        assert_eq!(dispatcher.config_override.as_deref(), Some(Path::new("/study/alt.yml")));
    }
}
