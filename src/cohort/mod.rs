//! Subject/session discovery.
//!
//! The unit of scheduling is a (subject, session) pair. Pairs come either
//! from `cohort.subjects` / `cohort.sessions` in the config or from the
//! `sub-*` / `ses-*` directories of the input dataset.

use crate::config::FlowConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// One (subject, session) pair, both labels carrying their BIDS prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub subject: String,
    pub session: String,
}

impl PairKey {
    /// Create a pair, adding `sub-` / `ses-` prefixes when missing.
    pub fn new(subject: &str, session: &str) -> Self {
        Self {
            subject: normalize_subject(subject),
            session: normalize_session(session),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject, self.session)
    }
}

/// Add the `sub-` prefix if it is missing.
pub fn normalize_subject(label: &str) -> String {
    with_prefix(label.trim(), "sub-")
}

/// Add the `ses-` prefix if it is missing.
pub fn normalize_session(label: &str) -> String {
    with_prefix(label.trim(), "ses-")
}

fn with_prefix(label: &str, prefix: &str) -> String {
    if label.starts_with(prefix) {
        label.to_string()
    } else {
        format!("{}{}", prefix, label)
    }
}

/// Filters from the command line.
#[derive(Debug, Clone, Default)]
pub struct CohortFilter {
    pub subjects: Vec<String>,
    pub sessions: Vec<String>,
}

impl CohortFilter {
    fn admits(&self, pair: &PairKey) -> bool {
        let subject_ok = self.subjects.is_empty()
            || self
                .subjects
                .iter()
                .any(|s| normalize_subject(s) == pair.subject);
        let session_ok = self.sessions.is_empty()
            || self
                .sessions
                .iter()
                .any(|s| normalize_session(s) == pair.session);
        subject_ok && session_ok
    }
}

/// Resolve the requested pairs, sorted and deduplicated.
///
/// Explicit config lists win over discovery. A subject without any session
/// directory yields no pairs and a warning.
pub fn resolve_pairs(config: &FlowConfig, filter: &CohortFilter) -> Result<Vec<PairKey>> {
    let input_dir = &config.paths.input_dir;

    let subjects: Vec<String> = if config.cohort.subjects.is_empty() {
        list_prefixed(input_dir, "sub-")?
    } else {
        config
            .cohort
            .subjects
            .iter()
            .map(|s| normalize_subject(s))
            .collect()
    };

    let mut pairs = Vec::new();
    for subject in &subjects {
        let sessions: Vec<String> = if config.cohort.sessions.is_empty() {
            list_prefixed(&input_dir.join(subject), "ses-")?
        } else {
            config
                .cohort
                .sessions
                .iter()
                .map(|s| normalize_session(s))
                .collect()
        };
        if sessions.is_empty() {
            tracing::warn!(%subject, "No sessions found; subject skipped");
        }
        pairs.extend(sessions.into_iter().map(|session| PairKey {
            subject: subject.clone(),
            session,
        }));
    }

    pairs.retain(|p| filter.admits(p));
    pairs.sort();
    pairs.dedup();
    tracing::debug!(count = pairs.len(), "Resolved subject/session pairs");
    Ok(pairs)
}

fn list_prefixed(dir: &Path, prefix: &str) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(prefix) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
