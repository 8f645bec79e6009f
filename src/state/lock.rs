//! Exclusive lock on a state directory.
//!
//! Two orchestrator passes over the same state directory would race on the
//! transition log and double-submit. The lock is a file created with
//! `create_new`; it is removed when the guard drops.

use crate::error::{FlowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Contents of the lock file, for diagnosing stale locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Guard holding the state directory lock.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the lock at `path`.
    ///
    /// With `break_lock`, an existing lock file is removed first.
    pub fn acquire(path: &Path, break_lock: bool) -> Result<Self> {
        if break_lock && path.exists() {
            tracing::warn!(path = %path.display(), "Breaking existing state lock");
            fs::remove_file(path)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(FlowError::StoreLocked {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_string(&info).map_err(anyhow::Error::from)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), "Acquired state lock");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Read who holds a lock, if the file exists and parses.
    pub fn holder(path: &Path) -> Option<LockInfo> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release state lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_is_locked() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lock");
        let _guard = StoreLock::acquire(&path, false).unwrap();
        let err = StoreLock::acquire(&path, false).unwrap_err();
        assert!(matches!(err, FlowError::StoreLocked { .. }));
    }

    #[test]
    fn drop_releases_lock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lock");
        {
            let _guard = StoreLock::acquire(&path, false).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        assert!(StoreLock::acquire(&path, false).is_ok());
    }

    #[test]
    fn break_lock_clears_stale_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lock");
        fs::write(&path, "stale").unwrap();
        assert!(StoreLock::acquire(&path, false).is_err());
        assert!(StoreLock::acquire(&path, true).is_ok());
    }

    #[test]
    fn holder_reports_pid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lock");
        let _guard = StoreLock::acquire(&path, false).unwrap();
        assert_eq!(StoreLock::holder(&path).unwrap().pid, std::process::id());
    }
}
