//! Configuration schema definitions for bidsflow.
//!
//! This module contains all the struct definitions that map to
//! the YAML configuration file format.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure for `.bidsflow/config.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FlowConfig {
    /// Study name (for display purposes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Dataset and output locations
    pub paths: PathsConfig,

    /// Which subjects and sessions to process
    pub cohort: CohortConfig,

    /// Batch scheduler connection parameters
    pub scheduler: SchedulerConfig,

    /// Control loop behaviour
    pub orchestrator: OrchestratorConfig,

    /// Step definitions
    pub steps: BTreeMap<String, StepConfig>,
}

/// Dataset and output locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PathsConfig {
    /// BIDS input dataset root
    pub input_dir: PathBuf,

    /// Root of all derivative outputs
    pub derivatives: PathBuf,

    /// Where run state lives (defaults to `<derivatives>/.bidsflow`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl PathsConfig {
    /// Resolved run state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.derivatives.join(".bidsflow"))
    }
}

/// Subject/session universe for the run.
///
/// Empty lists mean "discover from the input dataset".
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CohortConfig {
    /// Subject labels, with or without the `sub-` prefix
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,

    /// Session labels, with or without the `ses-` prefix
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<String>,
}

/// Which scheduler backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Submit through `sbatch`, poll through `sacct`
    #[default]
    Slurm,
    /// Run each unit to completion on this machine
    Local,
    /// Record submissions without running anything
    DryRun,
}

/// Batch scheduler connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Scheduler backend
    pub kind: SchedulerKind,

    /// Default partition when a step does not name one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,

    /// Accounting project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Address for begin/end notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Which events trigger a notification (`--mail-type`)
    pub mail_type: String,

    /// Submission binary
    pub sbatch: String,

    /// Accounting query binary
    pub sacct: String,

    /// Cancellation binary
    pub scancel: String,

    /// Submission attempts before a work item is failed as rejected
    pub max_submit_attempts: u32,

    /// Delay between rejected submission attempts
    pub backoff: BackoffConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::default(),
            partition: None,
            account: None,
            email: None,
            mail_type: "FAIL".to_string(),
            sbatch: "sbatch".to_string(),
            sacct: "sacct".to_string(),
            scancel: "scancel".to_string(),
            max_submit_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff between submission attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the second attempt
    pub initial_ms: u64,

    /// Growth factor per attempt
    pub multiplier: f64,

    /// Upper bound on any single delay
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 2_000,
            multiplier: 2.0,
            max_ms: 30_000,
        }
    }
}

/// Control loop behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Treat already-valid outputs as succeeded work on first sight
    pub adopt_existing_outputs: bool,

    /// Minutes past a step's time limit before the watchdog cancels it
    pub timeout_grace_minutes: u64,

    /// Number of run records to keep on disk; unset keeps all of them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_retention: Option<usize>,

    /// Retry policy for indeterminate work
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            adopt_existing_outputs: true,
            timeout_grace_minutes: 30,
            history_retention: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Who may retry an indeterminate work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Only `bidsflow retry`
    #[default]
    Manual,
    /// The control loop, up to `max_automatic_retries`
    Automatic,
}

/// Retry policy for indeterminate work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry mode for timed-out or cancelled items
    pub indeterminate: RetryMode,

    /// Attempts the control loop may add on its own
    pub max_automatic_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            indeterminate: RetryMode::Manual,
            max_automatic_retries: 1,
        }
    }
}

/// Individual step configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StepConfig {
    /// Version tag of the tool this step runs (e.g. container version)
    pub version: String,

    /// Step description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Payload command; may use `${subject}`, `${session}`, `${output}`, ...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Steps that must succeed for the same subject/session first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Cluster resources requested per work item
    pub resources: ResourceConfig,

    /// Output location template (defaults to `${derivatives}/${step}/${subject}_${session}`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// How to decide the output is valid (defaults to marker + non-empty output)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator: Option<OutputValidator>,

    /// Raw-data checks, relative to `${input_dir}/${subject}/${session}`
    /// (e.g. a non-empty `dwi` directory for diffusion steps)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<OutputValidator>,

    /// Maximum work items of this step in flight at once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,

    /// Whether this run submits the step (disabled steps are only validated)
    pub enabled: bool,

    /// Extra environment exported in the job unit
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            version: "0".to_string(),
            description: None,
            command: None,
            depends_on: Vec::new(),
            resources: ResourceConfig::default(),
            output: None,
            validator: None,
            inputs: Vec::new(),
            max_concurrent: None,
            enabled: true,
            env: BTreeMap::new(),
        }
    }
}

/// Cluster resources for one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ResourceConfig {
    /// CPUs per task
    pub cpus: u32,

    /// Memory in gigabytes
    pub memory_gb: u32,

    /// Wall-clock limit, `[D-]HH:MM:SS`
    pub time_limit: String,

    /// GPUs per node
    pub gpus: u32,

    /// Partition override for this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cpus: 1,
            memory_gb: 4,
            time_limit: "01:00:00".to_string(),
            gpus: 0,
            partition: None,
        }
    }
}

/// Output validator: decides whether a step's declared output is valid.
///
/// Relative paths resolve against the step's output location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputValidator {
    /// A file or directory exists
    FileExists {
        /// Path to check
        path: String,
    },

    /// A regular file exists and has content
    NonEmptyFile {
        /// Path to check
        path: String,
    },

    /// A directory exists and has at least one entry
    NonEmptyDir {
        /// Path to check
        path: String,
    },

    /// A file's content matches a regular expression
    FileContains {
        /// Path to read
        path: String,
        /// Regular expression to search for
        pattern: String,
    },

    /// The completion marker written after a successful payload
    Marker,

    /// All checks must pass
    All {
        /// Checks that must all pass
        checks: Vec<OutputValidator>,
    },

    /// Any check passing is sufficient
    Any {
        /// Checks where at least one must pass
        checks: Vec<OutputValidator>,
    },
}

impl OutputValidator {
    /// Validator used when a step declares none: marker plus non-empty output.
    pub fn default_for_step() -> Self {
        Self::All {
            checks: vec![
                Self::Marker,
                Self::NonEmptyDir {
                    path: ".".to_string(),
                },
            ],
        }
    }

    /// Iterate over this validator and every nested one.
    pub fn walk(&self) -> Vec<&OutputValidator> {
        let mut out = vec![self];
        if let Self::All { checks } | Self::Any { checks } = self {
            for check in checks {
                out.extend(check.walk());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: FlowConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.steps.is_empty());
        assert_eq!(config.scheduler.kind, SchedulerKind::Slurm);
        assert_eq!(config.scheduler.max_submit_attempts, 3);
        assert!(config.orchestrator.adopt_existing_outputs);
        assert_eq!(config.orchestrator.retry.indeterminate, RetryMode::Manual);
    }

    #[test]
    fn parses_step_with_validator() {
        let yaml = r#"
steps:
  segment:
    version: "7.4.1"
    command: recon-all -s ${subject}_${session}
    resources:
      cpus: 8
      memory_gb: 32
      time_limit: "24:00:00"
    validator:
      type: file_contains
      path: scripts/recon-all-status.log
      pattern: finished without error
  reconstruct:
    depends_on: [segment]
"#;
        let config: FlowConfig = serde_yaml::from_str(yaml).unwrap();
        let segment = &config.steps["segment"];
        assert_eq!(segment.version, "7.4.1");
        assert_eq!(segment.resources.cpus, 8);
        assert!(matches!(
            segment.validator,
            Some(OutputValidator::FileContains { .. })
        ));
        assert_eq!(config.steps["reconstruct"].depends_on, vec!["segment"]);
        assert!(config.steps["reconstruct"].enabled);
    }

    #[test]
    fn state_dir_defaults_under_derivatives() {
        let paths = PathsConfig {
            derivatives: PathBuf::from("/data/derivatives"),
            ..Default::default()
        };
        assert_eq!(
            paths.state_dir(),
            PathBuf::from("/data/derivatives/.bidsflow")
        );
    }

    #[test]
    fn nested_validators_deserialize() {
        let yaml = r#"
type: all
checks:
  - type: marker
  - type: any
    checks:
      - type: non_empty_file
        path: a.nii.gz
      - type: non_empty_dir
        path: out
"#;
        let validator: OutputValidator = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(validator.walk().len(), 5);
    }

    #[test]
    fn default_validator_requires_marker() {
        let validator = OutputValidator::default_for_step();
        assert!(validator
            .walk()
            .iter()
            .any(|v| matches!(v, OutputValidator::Marker)));
    }

    #[test]
    fn schema_can_be_generated() {
        let schema = schemars::schema_for!(FlowConfig);
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("max_submit_attempts"));
    }
}
