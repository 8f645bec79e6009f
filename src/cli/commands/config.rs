//! Config command implementation.
//!
//! The `bidsflow config` command shows the resolved configuration, or the
//! JSON schema of the configuration file with `--schema`.

use std::path::{Path, PathBuf};

use crate::cli::args::ConfigArgs;
use crate::config::{load_config, ConfigPaths, FlowConfig};
use crate::error::Result;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandResult};
use super::project::CONFIG_ERROR_EXIT_CODE;

/// The config command implementation.
pub struct ConfigCommand {
    project_root: PathBuf,
    config_override: Option<PathBuf>,
    args: ConfigArgs,
}

impl ConfigCommand {
    /// Create a new config command.
    pub fn new(project_root: &Path, config_override: Option<&Path>, args: ConfigArgs) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_override: config_override.map(Path::to_path_buf),
            args,
        }
    }
}

impl Command for ConfigCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        if self.args.schema {
            let schema = schemars::schema_for!(FlowConfig);
            let text = serde_json::to_string_pretty(&schema).map_err(anyhow::Error::from)?;
            println!("{}", text);
            return Ok(CommandResult::success());
        }

        let config = match load_config(&self.project_root, self.config_override.as_deref()) {
            Ok(c) => c,
            Err(e) if e.is_config_error() => {
                ui.error(&e.to_string());
                return Ok(CommandResult::failure(CONFIG_ERROR_EXIT_CODE));
            }
            Err(e) => return Err(e),
        };

        if self.args.json {
            let text = serde_json::to_string_pretty(&config).map_err(anyhow::Error::from)?;
            println!("{}", text);
            return Ok(CommandResult::success());
        }

        let sources: Vec<PathBuf> = match &self.config_override {
            Some(path) => vec![path.clone()],
            None => ConfigPaths::discover(&self.project_root)
                .all_existing()
                .into_iter()
                .cloned()
                .collect(),
        };
        for path in &sources {
            ui.message(&format!("# {}", path.display()));
        }
        let yaml = serde_yaml::to_string(&config).map_err(anyhow::Error::from)?;
        ui.message(&yaml);
        Ok(CommandResult::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_DIR;
    use crate::ui::MockUI;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn shows_sources_and_resolved_yaml() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.yml"),
            "project: study\npaths:\n  input_dir: bids\n  derivatives: out\n",
        )
        .unwrap();
        fs::write(dir.join("config.local.yml"), "scheduler:\n  account: lab\n").unwrap();

        let mut ui = MockUI::new();
        let result = ConfigCommand::new(temp.path(), None, ConfigArgs::default())
            .execute(&mut ui)
            .unwrap();
        assert!(result.success);
        assert!(ui.has_message("config.yml"));
        assert!(ui.has_message("config.local.yml"));
        assert!(ui.has_message("account: lab"));
        assert!(ui.has_message("project: study"));
    }

    #[test]
    fn missing_config_is_a_config_error() {
        let temp = TempDir::new().unwrap();
        let mut ui = MockUI::new();
        let result = ConfigCommand::new(temp.path(), None, ConfigArgs::default())
            .execute(&mut ui)
            .unwrap();
        assert_eq!(result.exit_code, CONFIG_ERROR_EXIT_CODE);
    }

    #[test]
    fn schema_needs_no_config() {
        let temp = TempDir::new().unwrap();
        let args = ConfigArgs {
            json: false,
            schema: true,
        };
        let mut ui = MockUI::new();
        assert!(ConfigCommand::new(temp.path(), None, args)
            .execute(&mut ui)
            .unwrap()
            .success);
    }
}
