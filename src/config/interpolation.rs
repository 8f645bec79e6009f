//! Path and command templating.
//!
//! Step commands, output locations and validator paths are templates over a
//! small set of per-work-item variables.
//!
//! # Syntax
//!
//! - `${variable}` - replaced with the variable's value
//! - `$${escaped}` - produces a literal `${escaped}` (for shell expansions
//!   that must survive into the job unit, e.g. `$${SLURM_CPUS_PER_TASK}`)
//!
//! # Variables
//!
//! `subject`, `session`, `step`, `version`, `input_dir`, `derivatives`,
//! `output`, and `cpus` / `memory_gb` for the step's resource profile.

use crate::error::{FlowError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Variables a template may reference.
pub const KNOWN_VARIABLES: &[&str] = &[
    "subject",
    "session",
    "step",
    "version",
    "input_dir",
    "derivatives",
    "output",
    "cpus",
    "memory_gb",
];

/// A segment of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text
    Literal(String),
    /// Variable reference: ${name}
    Variable(String),
}

/// Parse a string containing `${var}` interpolations.
pub fn parse_interpolation(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut chars = input.chars().peekable();
    let mut literal = String::new();

    while let Some(c) = chars.next() {
        if c != '$' {
            literal.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                if chars.peek() == Some(&'{') {
                    chars.next();
                    literal.push_str("${");
                    for c in chars.by_ref() {
                        literal.push(c);
                        if c == '}' {
                            break;
                        }
                    }
                } else {
                    literal.push('$');
                }
            }
            Some('{') => {
                chars.next();
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                segments.push(Segment::Variable(name.trim().to_string()));
            }
            _ => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Extract all variable names from an interpolated string.
pub fn extract_variables(input: &str) -> BTreeSet<String> {
    parse_interpolation(input)
        .into_iter()
        .filter_map(|seg| match seg {
            Segment::Variable(name) => Some(name),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// Variables that are not in [`KNOWN_VARIABLES`].
pub fn unknown_variables(input: &str) -> Vec<String> {
    extract_variables(input)
        .into_iter()
        .filter(|name| !KNOWN_VARIABLES.contains(&name.as_str()))
        .collect()
}

/// Values for one work item.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    vars: BTreeMap<String, String>,
}

impl InterpolationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, returning the context.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    /// Set a variable in place.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.vars.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Resolve all variables in an interpolated string.
///
/// # Errors
///
/// Returns `ConfigValidationError` naming the first unresolved variable.
pub fn resolve_string(input: &str, context: &InterpolationContext) -> Result<String> {
    let mut result = String::with_capacity(input.len());
    for segment in parse_interpolation(input) {
        match segment {
            Segment::Literal(text) => result.push_str(&text),
            Segment::Variable(name) => match context.resolve(&name) {
                Some(value) => result.push_str(value),
                None => {
                    return Err(FlowError::ConfigValidationError {
                        message: format!("Unresolved variable '${{{}}}' in '{}'", name, input),
                    })
                }
            },
        }
    }
    Ok(result)
}
