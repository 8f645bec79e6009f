//! Visual theme and styling.

use crate::state::WorkItemState;
use console::Style;

/// Styles used across command output.
#[derive(Debug, Clone)]
pub struct FlowTheme {
    /// Succeeded items and success lines (green).
    pub success: Style,
    /// Warnings and indeterminate items (orange).
    pub warning: Style,
    /// Errors and failed items (red bold).
    pub error: Style,
    /// In-flight items (cyan).
    pub active: Style,
    /// Secondary text such as timestamps and hints.
    pub dim: Style,
    /// Section headers.
    pub header: Style,
    /// Labels in key-value lines.
    pub key: Style,
}

impl Default for FlowTheme {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowTheme {
    pub fn new() -> Self {
        Self {
            success: Style::new().green(),
            warning: Style::new().color256(208),
            error: Style::new().red().bold(),
            active: Style::new().cyan(),
            dim: Style::new().dim(),
            header: Style::new().bold().cyan(),
            key: Style::new().bold(),
        }
    }

    /// Colored when stdout is a terminal and `NO_COLOR` is unset.
    pub fn detect() -> Self {
        if should_use_colors() {
            Self::new()
        } else {
            Self::plain()
        }
    }

    /// A theme without colors (for non-TTY or --no-color).
    pub fn plain() -> Self {
        Self {
            success: Style::new(),
            warning: Style::new(),
            error: Style::new(),
            active: Style::new(),
            dim: Style::new(),
            header: Style::new(),
            key: Style::new(),
        }
    }

    pub fn format_success(&self, msg: &str) -> String {
        format!("{}", self.success.apply_to(format!("✓ {}", msg)))
    }

    pub fn format_warning(&self, msg: &str) -> String {
        format!("{}", self.warning.apply_to(format!("⚠ {}", msg)))
    }

    pub fn format_error(&self, msg: &str) -> String {
        format!("{}", self.error.apply_to(format!("✗ {}", msg)))
    }

    pub fn format_header(&self, title: &str) -> String {
        format!("{}", self.header.apply_to(format!("▸ {}", title)))
    }

    pub fn format_hint(&self, hint: &str) -> String {
        format!("{}", self.dim.apply_to(hint))
    }

    /// Icon plus state name, colored by state.
    pub fn format_state(&self, state: WorkItemState) -> String {
        let (icon, style) = match state {
            WorkItemState::Pending => ("○", &self.dim),
            WorkItemState::Submitted => ("◌", &self.active),
            WorkItemState::Running => ("◉", &self.active),
            WorkItemState::Succeeded => ("✓", &self.success),
            WorkItemState::Failed => ("✗", &self.error),
            WorkItemState::Indeterminate => ("?", &self.warning),
        };
        format!("{}", style.apply_to(format!("{} {}", icon, state)))
    }
}

/// Check if colors should be enabled.
pub fn should_use_colors() -> bool {
    // https://no-color.org/
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }
    console::Term::stdout().is_term()
}
