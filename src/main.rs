//! bidsflow CLI entry point.

use std::process::ExitCode;

use bidsflow::cli::{Cli, CommandDispatcher};
use bidsflow::config::find_project_root;
use bidsflow::ui::{create_ui, OutputMode};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber for logging.
///
/// Log level is controlled by:
/// 1. `--debug` flag sets level to DEBUG
/// 2. `RUST_LOG` environment variable (if set)
/// 3. Default is INFO
///
/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("bidsflow=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bidsflow=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    tracing::debug!("bidsflow starting with args: {:?}", cli);

    if cli.no_color {
        std::env::set_var("NO_COLOR", "1");
    }

    let cwd = std::env::current_dir().unwrap_or_default();
    let project_root = cli
        .project
        .clone()
        .or_else(|| find_project_root(&cwd))
        .unwrap_or(cwd);

    let mut ui = create_ui(OutputMode::from_flags(cli.verbose, cli.quiet));
    let dispatcher = CommandDispatcher::new(project_root).with_config(cli.config.clone());

    match dispatcher.dispatch(&cli, ui.as_mut()) {
        Ok(result) => ExitCode::from(u8::try_from(result.exit_code).unwrap_or(1)),
        Err(e) => {
            ui.error(&format!("Error: {}", e));
            ExitCode::from(1)
        }
    }
}
