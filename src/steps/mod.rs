//! The step registry.
//!
//! - [`StepDefinition`] - an immutable catalog entry
//! - [`StepCatalog`] - all definitions plus their validated dependency graph
//! - [`ResourceProfile`] - cluster resources per work item
//!
//! # Example
//!
//! ```
//! use bidsflow::config::FlowConfig;
//! use bidsflow::steps::StepCatalog;
//!
//! let config: FlowConfig = serde_yaml::from_str(r#"
//! steps:
//!   segment:
//!     command: recon-all -s ${subject}
//!   reconstruct:
//!     command: qsirecon ${output}
//!     depends_on: [segment]
//! "#).unwrap();
//!
//! let catalog = StepCatalog::from_config(&config).unwrap();
//! assert_eq!(catalog.order(), &["segment", "reconstruct"]);
//! ```

pub mod catalog;
pub mod resources;

pub use catalog::{StepCatalog, StepDefinition, DEFAULT_OUTPUT_TEMPLATE};
pub use resources::{
    format_time_limit, parse_slurm_duration, parse_time_limit, InvalidTimeLimit, ResourceProfile,
};
