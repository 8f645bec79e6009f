//! Configuration file discovery and loading.
//!
//! A study keeps its pipeline definition in `.bidsflow/config.yml` and
//! site-specific overrides (partitions, accounts, resource bumps) in
//! `.bidsflow/config.local.yml`. The two are deep merged before parsing.

use crate::config::merger::merge_configs;
use crate::config::schema::FlowConfig;
use crate::error::{FlowError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-study configuration directory.
pub const CONFIG_DIR: &str = ".bidsflow";

/// Paths to configuration files in priority order (later overrides earlier).
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// Study config: .bidsflow/config.yml
    pub project: Option<PathBuf>,

    /// Local overrides: .bidsflow/config.local.yml
    pub project_local: Option<PathBuf>,
}

impl ConfigPaths {
    /// Discover config files for the given study root.
    pub fn discover(project_root: &Path) -> Self {
        Self {
            project: existing(project_root.join(CONFIG_DIR).join("config.yml")),
            project_local: existing(project_root.join(CONFIG_DIR).join("config.local.yml")),
        }
    }

    /// Returns all existing config paths in merge order.
    pub fn all_existing(&self) -> Vec<&PathBuf> {
        self.project.iter().chain(self.project_local.iter()).collect()
    }

    /// Check if the study config exists.
    pub fn has_project_config(&self) -> bool {
        self.project.is_some()
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

/// Find the study root by walking up from `start` looking for `.bidsflow/`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_DIR).is_dir() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Load a config file as raw YAML Value (for merging).
pub fn load_config_value(path: &Path) -> Result<serde_yaml::Value> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FlowError::ConfigNotFound {
                path: path.to_path_buf(),
            }
        } else {
            FlowError::Io(e)
        }
    })?;

    serde_yaml::from_str(&content).map_err(|e| FlowError::ConfigParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Parse YAML content into FlowConfig.
pub fn parse_config(content: &str, source_path: &Path) -> Result<FlowConfig> {
    serde_yaml::from_str(content).map_err(|e| FlowError::ConfigParseError {
        path: source_path.to_path_buf(),
        message: e.to_string(),
    })
}

fn from_merged(values: &[serde_yaml::Value], reported: &Path) -> Result<FlowConfig> {
    let merged = merge_configs(values);
    serde_yaml::from_value(merged).map_err(|e| FlowError::ConfigParseError {
        path: reported.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load and merge the study config with its local overrides.
///
/// # Errors
///
/// Returns `ConfigNotFound` if no `.bidsflow/config.yml` exists.
/// Returns `ConfigParseError` if any file is invalid YAML or the merged
/// result does not match the schema.
pub fn load_merged_config(project_root: &Path) -> Result<FlowConfig> {
    let paths = ConfigPaths::discover(project_root);
    let primary = project_root.join(CONFIG_DIR).join("config.yml");

    if !paths.has_project_config() {
        return Err(FlowError::ConfigNotFound { path: primary });
    }

    let values = paths
        .all_existing()
        .into_iter()
        .map(|p| load_config_value(p))
        .collect::<Result<Vec<_>>>()?;

    from_merged(&values, &primary)
}

/// Load config with optional path override.
///
/// An explicit file is merged with a sibling `<stem>.local.yml` when one
/// exists, so overrides work the same way for both entry points. Relative
/// `paths` entries are resolved against `project_root`.
pub fn load_config(project_root: &Path, config_override: Option<&Path>) -> Result<FlowConfig> {
    let mut config = match config_override {
        Some(path) => {
            let mut values = vec![load_config_value(path)?];
            if let Some(local) = local_sibling(path) {
                values.push(load_config_value(&local)?);
            }
            from_merged(&values, path)?
        }
        None => load_merged_config(project_root)?,
    };
    absolutize_paths(&mut config, project_root);
    tracing::debug!(root = %project_root.display(), steps = config.steps.len(), "Loaded configuration");
    Ok(config)
}

fn local_sibling(path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("yml");
    existing(path.with_file_name(format!("{stem}.local.{ext}")))
}

fn absolutize_paths(config: &mut FlowConfig, project_root: &Path) {
    let absolutize = |p: &Path| {
        if p.is_absolute() || p.as_os_str().is_empty() {
            p.to_path_buf()
        } else {
            project_root.join(p)
        }
    };
    config.paths.input_dir = absolutize(&config.paths.input_dir);
    config.paths.derivatives = absolutize(&config.paths.derivatives);
    if let Some(dir) = &config.paths.state_dir {
        config.paths.state_dir = Some(absolutize(dir));
    }
}
