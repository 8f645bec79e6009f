//! CLI command implementations.
//!
//! Each command implements the [`Command`] trait, which provides a uniform
//! interface for executing commands and reporting results.
//!
//! # Architecture
//!
//! Commands are dispatched via [`CommandDispatcher`], which routes CLI
//! subcommands to their implementations. Operator commands (`run`,
//! `status`, `retry`, `cancel`, `history`) load the study through
//! [`project::Project`]; `check` and `complete` are called from inside job
//! units on the compute node.

pub mod cancel;
pub mod check;
pub mod complete;
pub mod completions;
pub mod config;
pub mod dispatcher;
pub mod display;
pub mod history;
pub mod project;
pub mod retry;
pub mod run;
pub mod status;
pub mod validate;

pub use dispatcher::{Command, CommandDispatcher, CommandResult};
pub use project::{Project, CONFIG_ERROR_EXIT_CODE};
