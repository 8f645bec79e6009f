//! Validate command implementation.
//!
//! `bidsflow validate` loads the configuration, runs every validation rule
//! and builds the step catalog, reporting all problems at once.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::args::ValidateArgs;
use crate::config::{load_config, validate_config, ValidationError};
use crate::error::Result;
use crate::steps::StepCatalog;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandResult};
use super::project::CONFIG_ERROR_EXIT_CODE;

/// The validate command implementation.
pub struct ValidateCommand {
    project_root: PathBuf,
    config_override: Option<PathBuf>,
    args: ValidateArgs,
}

#[derive(Debug, Serialize)]
struct Problem {
    rule: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<String>,
}

impl From<ValidationError> for Problem {
    fn from(e: ValidationError) -> Self {
        Self {
            rule: e.rule,
            message: e.message,
            step: e.step,
        }
    }
}

impl ValidateCommand {
    pub fn new(project_root: &Path, config_override: Option<&Path>, args: ValidateArgs) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_override: config_override.map(Path::to_path_buf),
            args,
        }
    }
}

impl Command for ValidateCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let config = match load_config(&self.project_root, self.config_override.as_deref()) {
            Ok(config) => config,
            Err(e) if e.is_config_error() => {
                ui.error(&e.to_string());
                return Ok(CommandResult::failure(CONFIG_ERROR_EXIT_CODE));
            }
            Err(e) => return Err(e),
        };

        let mut problems: Vec<Problem> = validate_config(&config).into_iter().map(Problem::from).collect();
        let order = match StepCatalog::from_config(&config) {
            Ok(catalog) => catalog.order().to_vec(),
            Err(e) => {
                problems.push(Problem {
                    rule: "graph".to_string(),
                    message: e.to_string(),
                    step: None,
                });
                Vec::new()
            }
        };

        if self.args.json {
            let text = serde_json::to_string_pretty(&problems).map_err(anyhow::Error::from)?;
            println!("{}", text);
        } else if problems.is_empty() {
            ui.success(&format!("Configuration valid: {} step(s)", order.len()));
            if !order.is_empty() {
                ui.message(&format!("Order: {}", order.join(" → ")));
            }
        } else {
            for p in &problems {
                match &p.step {
                    Some(step) => ui.error(&format!("[{}] {}: {}", p.rule, step, p.message)),
                    None => ui.error(&format!("[{}] {}", p.rule, p.message)),
                }
            }
            ui.message(&format!("{} problem(s) found", problems.len()));
        }

        if problems.is_empty() {
            Ok(CommandResult::success())
        } else {
            Ok(CommandResult::failure(CONFIG_ERROR_EXIT_CODE))
        }
    }
}
