//! Box-drawn tables for `status` and `history`.

use console::measure_text_width;

/// A simple table. Cells may carry ANSI styling; widths ignore escapes.
#[derive(Debug)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    column_widths: Vec<usize>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        let headers: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
        let column_widths = headers.iter().map(|h| measure_text_width(h)).collect();
        Self {
            headers,
            rows: Vec::new(),
            column_widths,
        }
    }

    /// Add a row. Extra cells are dropped; missing cells render empty.
    pub fn add_row(&mut self, row: Vec<String>) {
        for (width, cell) in self.column_widths.iter_mut().zip(&row) {
            *width = (*width).max(measure_text_width(cell));
        }
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let mut lines = vec![self.border('┌', '┬', '┐'), self.row(&self.headers)];
        lines.push(self.border('├', '┼', '┤'));
        lines.extend(self.rows.iter().map(|r| self.row(r)));
        lines.push(self.border('└', '┴', '┘'));
        lines.join("\n")
    }

    fn border(&self, left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = self
            .column_widths
            .iter()
            .map(|w| "─".repeat(w + 2))
            .collect();
        format!("{}{}{}", left, segments.join(&mid.to_string()), right)
    }

    fn row(&self, row: &[String]) -> String {
        let mut s = String::from("│");
        for (i, width) in self.column_widths.iter().enumerate() {
            let cell = row.get(i).map(String::as_str).unwrap_or("");
            let pad = width - measure_text_width(cell).min(*width);
            s.push_str(&format!(" {}{} │", cell, " ".repeat(pad)));
        }
        s
    }
}
