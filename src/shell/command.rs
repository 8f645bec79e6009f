//! External command execution.
//!
//! Scheduler binaries (`sbatch`, `sacct`, `scancel`) and locally executed
//! job units are all run through [`run`]. Commands are spawned directly,
//! never through a login shell, so arguments need no quoting.

use crate::error::{FlowError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Result of executing a command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code (None if killed by signal or timed out).
    pub exit_code: Option<i32>,

    /// Standard output (empty when redirected to a file).
    pub stdout: String,

    /// Standard error (empty when redirected to a file).
    pub stderr: String,

    /// Execution duration.
    pub duration: Duration,

    /// Whether the command exited 0.
    pub success: bool,

    /// Whether the command was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl CommandResult {
    /// Stderr if present, otherwise stdout, trimmed. Used in error messages.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Options for command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Working directory.
    pub cwd: Option<PathBuf>,

    /// Environment variables (merged with the inherited environment).
    pub env: HashMap<String, String>,

    /// Kill the command after this long.
    pub timeout: Option<Duration>,

    /// Write stdout here instead of capturing it.
    pub stdout_file: Option<PathBuf>,

    /// Write stderr here instead of capturing it.
    pub stderr_file: Option<PathBuf>,
}

impl CommandOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }
}

fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn stdio_for(file: &Option<PathBuf>) -> Result<Stdio> {
    match file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Stdio::from(File::create(path)?))
        }
        None => Ok(Stdio::piped()),
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let mut bytes = Vec::new();
            if pipe.read_to_end(&mut bytes).is_ok() {
                out = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        out
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> Result<(Option<i32>, bool)> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status.code(), false));
        }
        if timeout.is_some_and(|limit| start.elapsed() >= limit) {
            let _ = child.kill();
            let _ = child.wait();
            return Ok((None, true));
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Run `program` with `args` and wait for it.
///
/// A program that cannot be spawned is an error. A program that runs and
/// exits non-zero is a [`CommandResult`] with `success == false`.
pub fn run(program: &str, args: &[String], options: &CommandOptions) -> Result<CommandResult> {
    let start = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());

    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }
    cmd.stdout(stdio_for(&options.stdout_file)?);
    cmd.stderr(stdio_for(&options.stderr_file)?);

    let mut child = cmd.spawn().map_err(|e| {
        tracing::debug!(program, error = %e, "Failed to spawn");
        FlowError::CommandFailed {
            command: command_line(program, args),
            code: None,
        }
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let (exit_code, timed_out) = wait_with_timeout(&mut child, options.timeout)?;

    let result = CommandResult {
        exit_code,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
        duration: start.elapsed(),
        success: exit_code == Some(0),
        timed_out,
    };
    tracing::debug!(
        command = %command_line(program, args),
        exit_code = ?result.exit_code,
        timed_out,
        "Command finished"
    );
    Ok(result)
}

/// Run a command and fail unless it exits 0.
pub fn run_checked(program: &str, args: &[String], options: &CommandOptions) -> Result<CommandResult> {
    let result = run(program, args, options)?;
    if result.success {
        Ok(result)
    } else {
        Err(FlowError::CommandFailed {
            command: format!("{} ({})", command_line(program, args), result.diagnostic()),
            code: result.exit_code,
        })
    }
}
