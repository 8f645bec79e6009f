//! CLI argument definitions.
//!
//! This module defines all CLI arguments using clap's derive macros.
//! The main entry point is the [`Cli`] struct.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// bidsflow - Batch orchestration of neuroimaging pipelines on BIDS datasets.
#[derive(Debug, Parser)]
#[command(name = "bidsflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to config file (overrides default .bidsflow/config.yml)
    #[arg(short, long, global = true, env = "BIDSFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to study root (overrides current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one orchestrator pass (or keep passing with --watch)
    Run(RunArgs),

    /// Show per-pair work item states and blockers
    Status(StatusArgs),

    /// Create a fresh attempt for a failed or indeterminate work item
    Retry(TargetArgs),

    /// Cancel an in-flight work item
    Cancel(TargetArgs),

    /// List recorded passes
    History(HistoryArgs),

    /// Validate configuration and the step graph
    Validate(ValidateArgs),

    /// Show resolved configuration or its schema
    Config(ConfigArgs),

    /// Verify a step's prerequisites (job unit preamble)
    Check(CheckArgs),

    /// Record a completion marker (job unit postamble)
    Complete(CompleteArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Subject and session filters shared by `run` and `status`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CohortArgs {
    /// Only these subjects (comma-separated, with or without `sub-`)
    #[arg(long = "subject", value_delimiter = ',')]
    pub subjects: Vec<String>,

    /// Only these sessions (comma-separated, with or without `ses-`)
    #[arg(long = "session", value_delimiter = ',')]
    pub sessions: Vec<String>,
}

/// Arguments for the `run` command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub cohort: CohortArgs,

    /// Submit only these steps (comma-separated); others are treated as external
    #[arg(long, value_delimiter = ',')]
    pub steps: Vec<String>,

    /// Plan a pass without submitting or writing state
    #[arg(long)]
    pub dry_run: bool,

    /// Repeat passes every SECS seconds until all pairs settle
    #[arg(long, value_name = "SECS")]
    pub watch: Option<u64>,

    /// Stop watching after this many passes
    #[arg(long, requires = "watch")]
    pub max_passes: Option<usize>,

    /// Take over a lock left by a crashed orchestrator
    #[arg(long)]
    pub break_lock: bool,

    /// Print each pass report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `status` command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub cohort: CohortArgs,

    /// Show only this step
    #[arg(long)]
    pub step: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// One work item slot, for `retry` and `cancel`.
#[derive(Debug, Clone, clap::Args)]
pub struct TargetArgs {
    /// Subject label
    #[arg(long)]
    pub subject: String,

    /// Session label
    #[arg(long)]
    pub session: String,

    /// Step name
    #[arg(long)]
    pub step: String,

    /// Take over a lock left by a crashed orchestrator
    #[arg(long)]
    pub break_lock: bool,
}

/// Arguments for the `history` command.
#[derive(Debug, Clone, clap::Args)]
pub struct HistoryArgs {
    /// Number of passes to show (newest first)
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl Default for HistoryArgs {
    fn default() -> Self {
        Self {
            limit: 20,
            json: false,
        }
    }
}

/// Arguments for the `validate` command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ValidateArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `config` command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the configuration JSON schema instead
    #[arg(long)]
    pub schema: bool,
}

/// Arguments for the `check` command.
#[derive(Debug, Clone, clap::Args)]
pub struct CheckArgs {
    /// Subject label
    #[arg(long)]
    pub subject: String,

    /// Session label
    #[arg(long)]
    pub session: String,

    /// Step whose prerequisites are checked
    #[arg(long)]
    pub step: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `complete` command.
#[derive(Debug, Clone, clap::Args)]
pub struct CompleteArgs {
    /// Subject label
    #[arg(long)]
    pub subject: String,

    /// Session label
    #[arg(long)]
    pub session: String,

    /// Step that finished
    #[arg(long)]
    pub step: String,

    /// Version that produced the output (defaults to the configured one)
    #[arg(long = "step-version", value_name = "VERSION")]
    pub step_version: Option<String>,

    /// Attempt number of the work item
    #[arg(long)]
    pub attempt: Option<u32>,

    /// Scheduler job id; empty values are ignored
    #[arg(long)]
    pub job_id: Option<String>,
}

/// Arguments for the `completions` command.
#[derive(Debug, Clone, clap::Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_filters() {
        let cli = Cli::parse_from([
            "bidsflow",
            "run",
            "--subject",
            "01,02",
            "--steps",
            "segment",
            "--watch",
            "60",
            "--max-passes",
            "3",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.cohort.subjects, vec!["01", "02"]);
        assert_eq!(args.steps, vec!["segment"]);
        assert_eq!(args.watch, Some(60));
        assert_eq!(args.max_passes, Some(3));
    }

    #[test]
    fn max_passes_requires_watch() {
        let result = Cli::try_parse_from(["bidsflow", "run", "--max-passes", "2"]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["bidsflow", "status", "--project", "/study", "--json"]);
        assert_eq!(cli.project, Some(PathBuf::from("/study")));
        assert!(matches!(cli.command, Commands::Status(StatusArgs { json: true, .. })));
    }

    #[test]
    fn complete_accepts_empty_job_id() {
        let cli = Cli::parse_from([
            "bidsflow", "complete", "--subject", "sub-01", "--session", "ses-01", "--step",
            "segment", "--step-version", "7.4.1", "--attempt", "2", "--job-id", "",
        ]);
        let Commands::Complete(args) = cli.command else {
            panic!("expected complete");
        };
        assert_eq!(args.job_id.as_deref(), Some(""));
        assert_eq!(args.attempt, Some(2));
    }
}
