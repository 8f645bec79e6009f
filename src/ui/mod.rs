//! Terminal output for commands.
//!
//! This module provides:
//! - [`UserInterface`] trait so commands can be tested against [`MockUI`]
//! - [`TerminalUI`] writing styled output through `console`
//! - [`Table`] and the formatting helpers used by `status` and `history`
//!
//! # Example
//!
//! ```
//! use bidsflow::ui::{MockUI, UserInterface};
//!
//! let mut ui = MockUI::new();
//! ui.show_header("Cohort");
//! ui.success("Pass complete");
//! assert!(ui.has_success("Pass complete"));
//! ```

pub mod format;
pub mod mock;
pub mod output;
pub mod table;
pub mod terminal;
pub mod theme;

pub use format::{format_duration, format_relative_time};
pub use mock::MockUI;
pub use output::OutputMode;
pub use table::Table;
pub use terminal::{create_ui, TerminalUI};
pub use theme::{should_use_colors, FlowTheme};

/// Trait for user-facing output.
///
/// Warnings and errors go to stderr; everything else to stdout so that
/// `--json` output stays machine readable.
pub trait UserInterface {
    /// Get the current output mode.
    fn output_mode(&self) -> OutputMode;

    /// Display a plain line.
    fn message(&mut self, msg: &str);

    /// Display a success message.
    fn success(&mut self, msg: &str);

    /// Display a warning message.
    fn warning(&mut self, msg: &str);

    /// Display an error message. Shown in every mode.
    fn error(&mut self, msg: &str);

    /// Show a section header.
    fn show_header(&mut self, title: &str);

    /// Show a dim follow-up suggestion.
    fn show_hint(&mut self, hint: &str);

    /// Print a table.
    fn show_table(&mut self, table: &Table);
}
