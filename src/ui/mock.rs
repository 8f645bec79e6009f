//! Mock UI for testing.
//!
//! `MockUI` implements [`UserInterface`] and captures all output for later
//! assertion.

use super::{OutputMode, Table, UserInterface};

/// Captures every UI call.
#[derive(Debug, Default)]
pub struct MockUI {
    mode: OutputMode,
    messages: Vec<String>,
    successes: Vec<String>,
    warnings: Vec<String>,
    errors: Vec<String>,
    headers: Vec<String>,
    hints: Vec<String>,
    tables: Vec<String>,
}

impl MockUI {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: OutputMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn successes(&self) -> &[String] {
        &self.successes
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn hints(&self) -> &[String] {
        &self.hints
    }

    /// Rendered tables, in order.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Substring match against captured messages.
    pub fn has_message(&self, needle: &str) -> bool {
        self.messages.iter().any(|m| m.contains(needle))
    }

    pub fn has_success(&self, needle: &str) -> bool {
        self.successes.iter().any(|m| m.contains(needle))
    }

    pub fn has_warning(&self, needle: &str) -> bool {
        self.warnings.iter().any(|m| m.contains(needle))
    }

    pub fn has_error(&self, needle: &str) -> bool {
        self.errors.iter().any(|m| m.contains(needle))
    }

    pub fn has_hint(&self, needle: &str) -> bool {
        self.hints.iter().any(|m| m.contains(needle))
    }

    /// Everything printed to stdout, joined by newlines.
    pub fn stdout(&self) -> String {
        self.headers
            .iter()
            .chain(&self.messages)
            .chain(&self.successes)
            .chain(&self.tables)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl UserInterface for MockUI {
    fn output_mode(&self) -> OutputMode {
        self.mode
    }

    fn message(&mut self, msg: &str) {
        self.messages.push(msg.to_string());
    }

    fn success(&mut self, msg: &str) {
        self.successes.push(msg.to_string());
    }

    fn warning(&mut self, msg: &str) {
        self.warnings.push(msg.to_string());
    }

    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }

    fn show_header(&mut self, title: &str) {
        self.headers.push(title.to_string());
    }

    fn show_hint(&mut self, hint: &str) {
        self.hints.push(hint.to_string());
    }

    fn show_table(&mut self, table: &Table) {
        self.tables.push(table.render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_by_kind() {
        let mut ui = MockUI::new();
        ui.message("hello");
        ui.warning("careful");
        ui.error("broken");
        ui.show_hint("try retry");

        assert!(ui.has_message("hell"));
        assert!(ui.has_warning("careful"));
        assert!(ui.has_error("broken"));
        assert!(ui.has_hint("retry"));
        assert!(!ui.has_success("hello"));
    }

    #[test]
    fn tables_are_rendered() {
        let mut ui = MockUI::with_mode(OutputMode::Verbose);
        let mut table = Table::new(&["Step"]);
        table.add_row(vec!["segment".into()]);
        ui.show_table(&table);
        assert!(ui.tables()[0].contains("segment"));
        assert_eq!(ui.output_mode(), OutputMode::Verbose);
    }
}
