//! bidsflow - batch orchestration for neuroimaging pipelines on HPC clusters.
//!
//! A study declares its processing steps (tool version, resources,
//! prerequisites, and how to recognise valid output) in
//! `.bidsflow/config.yml`. Each pass of the orchestrator reconciles the
//! recorded state of every (subject, session, step) work item with the
//! scheduler, submits whatever has become ready with `afterok`
//! dependencies, and reports what blocks each pair.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`cohort`] - Subject/session pairs and their discovery
//! - [`config`] - Configuration loading, parsing, and validation
//! - [`error`] - Error types and result aliases
//! - [`runner`] - Dependency graph and the orchestrator loop
//! - [`sanity`] - Output validators and completion markers
//! - [`scheduler`] - Slurm, local and in-memory scheduler backends
//! - [`script`] - Job unit construction and rendering
//! - [`shell`] - External command execution
//! - [`state`] - The persistent run state store
//! - [`steps`] - The step catalog
//! - [`ui`] - Terminal output
//!
//! # Example
//!
//! ```
//! use bidsflow::config::{resolve_string, InterpolationContext};
//!
//! let vars = InterpolationContext::new()
//!     .with("derivatives", "/data/derivatives")
//!     .with("subject", "sub-01");
//! let path = resolve_string("${derivatives}/fmriprep/${subject}", &vars).unwrap();
//! assert_eq!(path, "/data/derivatives/fmriprep/sub-01");
//! ```

pub mod cli;
pub mod cohort;
pub mod config;
pub mod error;
pub mod runner;
pub mod sanity;
pub mod scheduler;
pub mod script;
pub mod shell;
pub mod state;
pub mod steps;
pub mod ui;

pub use error::{FlowError, Result};
