//! Completion markers.
//!
//! A unit's postamble writes a marker after its payload exits 0. The marker
//! records which step, version and pair produced the output, so a later
//! check can tell a fresh result from a leftover of another attempt or
//! another tool version.

use crate::error::Result;
use crate::state::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// What a marker check expects to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerExpectation {
    pub step: String,
    pub version: String,
    pub subject: String,
    pub session: String,
}

/// Contents of a completion marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub step: String,
    pub version: String,
    pub subject: String,
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub finished_at: DateTime<Utc>,
}

/// Why a marker could not be read.
#[derive(Debug)]
pub enum MarkerReadError {
    Missing,
    Unreadable(io::Error),
    Malformed(String),
}

impl CompletionMarker {
    /// Write the marker atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(self).map_err(anyhow::Error::from)?;
        write_atomic(path, &body)
    }

    /// Read a marker file.
    pub fn read(path: &Path) -> std::result::Result<Self, MarkerReadError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                MarkerReadError::Missing
            } else {
                MarkerReadError::Unreadable(e)
            }
        })?;
        serde_json::from_str(&content).map_err(|e| MarkerReadError::Malformed(e.to_string()))
    }

    /// Whether the marker was written for the expected step and pair.
    pub fn matches_owner(&self, expected: &MarkerExpectation) -> bool {
        self.step == expected.step
            && self.subject == expected.subject
            && self.session == expected.session
    }
}
