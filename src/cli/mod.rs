//! Command-line interface for bidsflow.
//!
//! - [`args`] - Argument definitions using clap derive macros
//! - [`commands`] - Command implementations

pub mod args;
pub mod commands;

pub use args::{
    CheckArgs, Cli, CohortArgs, Commands, CompleteArgs, ConfigArgs, HistoryArgs, RunArgs,
    StatusArgs, TargetArgs, ValidateArgs,
};
pub use commands::{Command, CommandDispatcher, CommandResult};
