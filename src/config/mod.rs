//! Configuration loading, parsing, and validation.
//!
//! - Schema definitions in [`schema`]
//! - File discovery and loading in [`loader`]
//! - Deep merging in [`merger`]
//! - Validation in [`validator`]
//! - Path and command templating in [`interpolation`]
//!
//! # Example
//!
//! ```
//! use bidsflow::config::{load_merged_config, validate};
//! use tempfile::TempDir;
//! use std::fs;
//!
//! let temp = TempDir::new().unwrap();
//! let dir = temp.path().join(".bidsflow");
//! fs::create_dir_all(&dir).unwrap();
//! fs::write(
//!     dir.join("config.yml"),
//!     "project: study\npaths:\n  input_dir: /data/bids\n  derivatives: /data/derivatives\n",
//! )
//! .unwrap();
//!
//! let config = load_merged_config(temp.path()).unwrap();
//! validate(&config).unwrap();
//! assert_eq!(config.project, Some("study".to_string()));
//! ```

pub mod interpolation;
pub mod loader;
pub mod merger;
pub mod schema;
pub mod validator;

pub use schema::{
    BackoffConfig, CohortConfig, FlowConfig, OrchestratorConfig, OutputValidator, PathsConfig,
    ResourceConfig, RetryConfig, RetryMode, SchedulerConfig, SchedulerKind, StepConfig,
};

pub use loader::{
    find_project_root, load_config, load_config_value, load_merged_config, parse_config,
    ConfigPaths, CONFIG_DIR,
};

pub use merger::{deep_merge, merge_configs};

pub use validator::{validate, validate_config, ValidationError};

pub use interpolation::{
    extract_variables, parse_interpolation, resolve_string, unknown_variables,
    InterpolationContext, Segment, KNOWN_VARIABLES,
};
