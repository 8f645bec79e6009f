//! Output validator evaluation.
//!
//! [`evaluate`] is a pure function of the filesystem: it never consults the
//! scheduler or the run state, so the orchestrator and a job unit's preamble
//! reach the same verdict for the same files.

use crate::config::{resolve_string, InterpolationContext, OutputValidator};
use crate::sanity::marker::{CompletionMarker, MarkerExpectation, MarkerReadError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Why a validator was not satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticReason {
    Missing,
    Empty,
    MalformedMarker,
    StaleMarker,
    PatternNotFound,
    Unreadable,
}

impl fmt::Display for DiagnosticReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Missing => "missing",
            Self::Empty => "empty",
            Self::MalformedMarker => "malformed marker",
            Self::StaleMarker => "stale marker",
            Self::PatternNotFound => "pattern not found",
            Self::Unreadable => "unreadable",
        };
        f.write_str(s)
    }
}

/// Outcome of evaluating a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub satisfied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DiagnosticReason>,
    /// What was checked, for display.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Verdict {
    pub fn satisfied(description: impl Into<String>) -> Self {
        Self {
            satisfied: true,
            reason: None,
            description: description.into(),
            detail: None,
        }
    }

    pub fn unsatisfied(
        reason: DiagnosticReason,
        description: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            satisfied: false,
            reason: Some(reason),
            description: description.into(),
            detail: Some(detail.into()),
        }
    }

    /// One-line summary: description plus detail when unsatisfied.
    pub fn summary(&self) -> String {
        match (&self.detail, self.satisfied) {
            (Some(detail), false) => format!("{} ({})", self.description, detail),
            _ => self.description.clone(),
        }
    }
}

/// Where and against what a validator is evaluated.
#[derive(Debug, Clone)]
pub struct CheckTarget {
    /// Relative validator paths resolve against this directory.
    pub base: PathBuf,
    /// Completion marker location for `marker` checks.
    pub marker: PathBuf,
    pub expected: MarkerExpectation,
    /// Markers older than this are stale.
    pub not_before: Option<DateTime<Utc>>,
    /// Values for `${...}` in validator paths.
    pub vars: InterpolationContext,
}

impl CheckTarget {
    fn resolve(&self, template: &str) -> Result<PathBuf, Verdict> {
        let resolved = resolve_string(template, &self.vars).map_err(|e| {
            Verdict::unsatisfied(
                DiagnosticReason::Unreadable,
                format!("Path template {}", template),
                e.to_string(),
            )
        })?;
        let path = Path::new(&resolved);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        })
    }
}

/// Evaluate a validator against the filesystem.
pub fn evaluate(validator: &OutputValidator, target: &CheckTarget) -> Verdict {
    let result = match validator {
        OutputValidator::FileExists { path } => target.resolve(path).map(|p| file_exists(path, &p)),
        OutputValidator::NonEmptyFile { path } => {
            target.resolve(path).map(|p| non_empty_file(path, &p))
        }
        OutputValidator::NonEmptyDir { path } => {
            target.resolve(path).map(|p| non_empty_dir(path, &p))
        }
        OutputValidator::FileContains { path, pattern } => target
            .resolve(path)
            .map(|p| file_contains(path, &p, pattern)),
        OutputValidator::Marker => Ok(marker(target)),
        OutputValidator::All { checks } => Ok(all(checks, target)),
        OutputValidator::Any { checks } => Ok(any(checks, target)),
    };
    result.unwrap_or_else(|verdict| verdict)
}

fn file_exists(label: &str, path: &Path) -> Verdict {
    if path.exists() {
        Verdict::satisfied(format!("Exists: {}", label))
    } else {
        Verdict::unsatisfied(
            DiagnosticReason::Missing,
            format!("Missing: {}", label),
            format!("expected at {}", path.display()),
        )
    }
}

fn non_empty_file(label: &str, path: &Path) -> Verdict {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {
            Verdict::satisfied(format!("Non-empty file: {}", label))
        }
        Ok(meta) if meta.is_file() => Verdict::unsatisfied(
            DiagnosticReason::Empty,
            format!("Empty file: {}", label),
            format!("{} has zero bytes", path.display()),
        ),
        Ok(_) => Verdict::unsatisfied(
            DiagnosticReason::Missing,
            format!("Not a file: {}", label),
            format!("{} is not a regular file", path.display()),
        ),
        Err(e) => io_failure(label, path, e),
    }
}

fn non_empty_dir(label: &str, path: &Path) -> Verdict {
    if !path.is_dir() {
        return Verdict::unsatisfied(
            DiagnosticReason::Missing,
            format!("Missing directory: {}", label),
            format!("expected at {}", path.display()),
        );
    }
    match fs::read_dir(path) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                Verdict::satisfied(format!("Non-empty directory: {}", label))
            } else {
                Verdict::unsatisfied(
                    DiagnosticReason::Empty,
                    format!("Empty directory: {}", label),
                    format!("{} has no entries", path.display()),
                )
            }
        }
        Err(e) => io_failure(label, path, e),
    }
}

fn file_contains(label: &str, path: &Path, pattern: &str) -> Verdict {
    let regex = match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => {
            return Verdict::unsatisfied(
                DiagnosticReason::Unreadable,
                format!("Invalid pattern for {}", label),
                e.to_string(),
            )
        }
    };
    match fs::read(path) {
        Ok(bytes) => {
            let content = String::from_utf8_lossy(&bytes);
            if regex.is_match(&content) {
                Verdict::satisfied(format!("{} contains /{}/", label, pattern))
            } else {
                Verdict::unsatisfied(
                    DiagnosticReason::PatternNotFound,
                    format!("{} lacks /{}/", label, pattern),
                    format!("searched {}", path.display()),
                )
            }
        }
        Err(e) => io_failure(label, path, e),
    }
}

fn io_failure(label: &str, path: &Path, e: io::Error) -> Verdict {
    if e.kind() == io::ErrorKind::NotFound {
        Verdict::unsatisfied(
            DiagnosticReason::Missing,
            format!("Missing: {}", label),
            format!("expected at {}", path.display()),
        )
    } else {
        Verdict::unsatisfied(
            DiagnosticReason::Unreadable,
            format!("Unreadable: {}", label),
            format!("{}: {}", path.display(), e),
        )
    }
}

fn marker(target: &CheckTarget) -> Verdict {
    let expected = &target.expected;
    let marker = match CompletionMarker::read(&target.marker) {
        Ok(marker) => marker,
        Err(MarkerReadError::Missing) => {
            return Verdict::unsatisfied(
                DiagnosticReason::Missing,
                format!("No completion marker for {}", expected.step),
                format!("expected at {}", target.marker.display()),
            )
        }
        Err(MarkerReadError::Unreadable(e)) => {
            return io_failure("completion marker", &target.marker, e)
        }
        Err(MarkerReadError::Malformed(e)) => {
            return Verdict::unsatisfied(
                DiagnosticReason::MalformedMarker,
                format!("Malformed completion marker for {}", expected.step),
                e,
            )
        }
    };

    if !marker.matches_owner(expected) {
        return Verdict::unsatisfied(
            DiagnosticReason::MalformedMarker,
            format!("Completion marker for {} belongs elsewhere", expected.step),
            format!(
                "written for {}/{}/{}",
                marker.subject, marker.session, marker.step
            ),
        );
    }
    if marker.version != expected.version {
        return Verdict::unsatisfied(
            DiagnosticReason::StaleMarker,
            format!("Completion marker for {} is from another version", expected.step),
            format!("marker {} vs expected {}", marker.version, expected.version),
        );
    }
    if let Some(not_before) = target.not_before {
        if marker.finished_at < not_before {
            return Verdict::unsatisfied(
                DiagnosticReason::StaleMarker,
                format!("Completion marker for {} predates this attempt", expected.step),
                format!(
                    "finished {} before submission {}",
                    marker.finished_at.to_rfc3339(),
                    not_before.to_rfc3339()
                ),
            );
        }
    }

    Verdict::satisfied(format!("Completed {} {}", expected.step, marker.version))
}

fn all(checks: &[OutputValidator], target: &CheckTarget) -> Verdict {
    let verdicts: Vec<Verdict> = checks.iter().map(|c| evaluate(c, target)).collect();
    let failed: Vec<&Verdict> = verdicts.iter().filter(|v| !v.satisfied).collect();
    match failed.first() {
        None => Verdict::satisfied(format!("All {} checks passed", checks.len())),
        Some(first) => Verdict {
            satisfied: false,
            reason: first.reason,
            description: failed
                .iter()
                .map(|v| v.description.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            detail: first.detail.clone(),
        },
    }
}

fn any(checks: &[OutputValidator], target: &CheckTarget) -> Verdict {
    let verdicts: Vec<Verdict> = checks.iter().map(|c| evaluate(c, target)).collect();
    if let Some(passed) = verdicts.iter().find(|v| v.satisfied) {
        return passed.clone();
    }
    match verdicts.first() {
        Some(first) => Verdict {
            satisfied: false,
            reason: first.reason,
            description: format!("None of {} checks passed", checks.len()),
            detail: Some(
                verdicts
                    .iter()
                    .map(Verdict::summary)
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
        },
        None => Verdict::unsatisfied(DiagnosticReason::Missing, "Empty check group", "no checks"),
    }
}
