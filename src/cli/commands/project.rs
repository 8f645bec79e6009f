//! Loading the study a command operates on.

use std::path::{Path, PathBuf};

use crate::cohort::PairKey;
use crate::config::{load_config, validate, FlowConfig};
use crate::error::Result;
use crate::state::{SlotKey, StateLayout};
use crate::steps::StepCatalog;

/// Immutable config snapshot plus the step catalog built from it.
#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    pub config_override: Option<PathBuf>,
    pub config: FlowConfig,
    pub catalog: StepCatalog,
}

impl Project {
    /// Load, validate and build the catalog. Any failure here is a
    /// configuration error and happens before anything is submitted.
    pub fn load(root: &Path, config_override: Option<&Path>) -> Result<Self> {
        let config = load_config(root, config_override)?;
        validate(&config)?;
        let catalog = StepCatalog::from_config(&config)?;
        Ok(Self {
            root: root.to_path_buf(),
            config_override: config_override.map(Path::to_path_buf),
            config,
            catalog,
        })
    }

    /// Submit only `steps`; the others become external.
    pub fn select_steps(mut self, steps: &[String]) -> Result<Self> {
        self.catalog = self.catalog.select(steps)?;
        Ok(self)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.config.paths.state_dir()
    }

    pub fn layout(&self) -> StateLayout {
        StateLayout::new(&self.state_dir())
    }

    /// Slot for a command-line target, checking the step exists.
    pub fn slot(&self, subject: &str, session: &str, step: &str) -> Result<SlotKey> {
        self.catalog.require(step)?;
        Ok(SlotKey::new(PairKey::new(subject, session), step))
    }
}

/// Exit code for configuration problems.
pub const CONFIG_ERROR_EXIT_CODE: i32 = 2;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_DIR;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, body: &str) {
        let dir = root.join(CONFIG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.yml"), body).unwrap();
    }

    #[test]
    fn loads_and_resolves_relative_paths() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "paths:\n  input_dir: bids\n  derivatives: derivatives\nsteps:\n  segment:\n    command: recon-all\n",
        );
        let project = Project::load(temp.path(), None).unwrap();
        assert_eq!(project.state_dir(), temp.path().join("derivatives/.bidsflow"));
        let slot = project.slot("01", "ses-02", "segment").unwrap();
        assert_eq!(slot.to_string(), "sub-01/ses-02/segment");
        assert!(project.slot("01", "01", "nope").is_err());
    }

    #[test]
    fn cycles_are_config_errors() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "paths:\n  input_dir: bids\n  derivatives: out\nsteps:\n  a:\n    command: x\n    depends_on: [b]\n  b:\n    command: y\n    depends_on: [a]\n",
        );
        let err = Project::load(temp.path(), None).unwrap_err();
        assert!(err.is_config_error());
    }
}
