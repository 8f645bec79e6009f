//! Styled terminal output.

use console::Term;
use std::io::Write;

use super::{FlowTheme, OutputMode, Table, UserInterface};

/// Terminal UI writing status to stdout and problems to stderr.
pub struct TerminalUI {
    out: Term,
    err: Term,
    theme: FlowTheme,
    mode: OutputMode,
}

impl TerminalUI {
    pub fn new(mode: OutputMode) -> Self {
        Self::with_theme(mode, FlowTheme::detect())
    }

    pub fn with_theme(mode: OutputMode, theme: FlowTheme) -> Self {
        Self {
            out: Term::stdout(),
            err: Term::stderr(),
            theme,
            mode,
        }
    }

    pub fn theme(&self) -> &FlowTheme {
        &self.theme
    }
}

impl UserInterface for TerminalUI {
    fn output_mode(&self) -> OutputMode {
        self.mode
    }

    fn message(&mut self, msg: &str) {
        if self.mode.shows_status() {
            writeln!(self.out, "{}", msg).ok();
        }
    }

    fn success(&mut self, msg: &str) {
        if self.mode.shows_status() {
            writeln!(self.out, "{}", self.theme.format_success(msg)).ok();
        }
    }

    fn warning(&mut self, msg: &str) {
        writeln!(self.err, "{}", self.theme.format_warning(msg)).ok();
    }

    fn error(&mut self, msg: &str) {
        writeln!(self.err, "{}", self.theme.format_error(msg)).ok();
    }

    fn show_header(&mut self, title: &str) {
        if self.mode.shows_status() {
            writeln!(self.out).ok();
            writeln!(self.out, "{}", self.theme.format_header(title)).ok();
        }
    }

    fn show_hint(&mut self, hint: &str) {
        if self.mode.shows_status() {
            writeln!(self.out, "  {}", self.theme.format_hint(hint)).ok();
        }
    }

    fn show_table(&mut self, table: &Table) {
        if self.mode.shows_status() {
            writeln!(self.out, "{}", table.render()).ok();
        }
    }
}

/// Create the UI for a command run.
pub fn create_ui(mode: OutputMode) -> Box<dyn UserInterface> {
    Box::new(TerminalUI::new(mode))
}
