//! Rendering job units as shell scripts.
//!
//! Both renderers emit the same three phases: the prerequisite check
//! preamble, the payload, and the completion postamble. Only the header
//! differs.

use super::quote::{shell_join, shell_quote};
use super::unit::JobUnit;
use crate::sanity::PREREQUISITE_INVALID_EXIT_CODE;
use crate::scheduler::local::LOCAL_JOB_ID_VAR;
use crate::steps::format_time_limit;
use std::fmt::Write;

/// Turns a [`JobUnit`] into script text.
pub trait UnitRenderer {
    fn name(&self) -> &'static str;

    fn render(&self, unit: &JobUnit) -> String;
}

/// `#SBATCH` header plus the shared body.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlurmRenderer;

/// Plain bash script for local execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct BashRenderer;

impl UnitRenderer for SlurmRenderer {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn render(&self, unit: &JobUnit) -> String {
        let r = &unit.resources;
        let mut out = String::from("#!/bin/bash\n");
        let mut directive = |flag: String| {
            let _ = writeln!(out, "#SBATCH {}", flag);
        };
        directive(format!("--job-name={}", unit.job_name));
        directive(format!("--output={}", unit.stdout.display()));
        directive(format!("--error={}", unit.stderr.display()));
        directive(format!("--cpus-per-task={}", r.cpus));
        directive(format!("--mem={}G", r.memory_gb));
        directive(format!("--time={}", format_time_limit(r.time_limit)));
        if let Some(partition) = &r.partition {
            directive(format!("--partition={}", partition));
        }
        if r.gpus > 0 {
            directive(format!("--gres=gpu:{}", r.gpus));
        }
        if let Some(account) = &unit.header.account {
            directive(format!("--account={}", account));
        }
        if let Some(email) = &unit.header.email {
            directive(format!("--mail-type={}", unit.header.mail_type));
            directive(format!("--mail-user={}", email));
        }
        out.push('\n');
        out.push_str(&body(unit));
        out
    }
}

impl UnitRenderer for BashRenderer {
    fn name(&self) -> &'static str {
        "bash"
    }

    fn render(&self, unit: &JobUnit) -> String {
        let r = &unit.resources;
        let mut out = String::from("#!/usr/bin/env bash\n");
        let _ = writeln!(out, "# {}", unit.job_name);
        let _ = writeln!(
            out,
            "# cpus={} memory={}G time={}",
            r.cpus,
            r.memory_gb,
            format_time_limit(r.time_limit)
        );
        out.push('\n');
        out.push_str(&body(unit));
        out
    }
}

fn pair_flags(unit: &JobUnit) -> Vec<String> {
    vec![
        "--subject".into(),
        unit.id.subject.clone(),
        "--session".into(),
        unit.id.session.clone(),
        "--step".into(),
        unit.id.step.clone(),
    ]
}

fn body(unit: &JobUnit) -> String {
    let mut out = String::new();
    let invocation = unit.invocation.words();
    let code = PREREQUISITE_INVALID_EXIT_CODE;

    let _ = writeln!(out, "set -o pipefail");
    let _ = writeln!(out, "# work item {} (version {})", unit.id, unit.version);
    if !unit.prerequisites.is_empty() {
        let _ = writeln!(out, "# prerequisites: {}", unit.prerequisites.join(", "));
    }
    out.push('\n');

    let mut check = invocation.clone();
    check.push("check".into());
    check.extend(pair_flags(unit));
    let _ = writeln!(out, "{} || exit {}", shell_join(&check), code);
    out.push('\n');

    for (key, value) in &unit.env {
        let _ = writeln!(out, "export {}={}", key, shell_quote(value));
    }
    let _ = writeln!(out, "mkdir -p {}", shell_quote(&unit.output_dir.display().to_string()));
    let _ = writeln!(out, "(\n{}\n)", unit.payload.trim_end());
    let _ = writeln!(out, "status=$?");
    let _ = writeln!(out, "if [ \"$status\" -ne 0 ]; then");
    // the preamble owns this code
    let _ = writeln!(out, "    if [ \"$status\" -eq {} ]; then status=1; fi", code);
    let _ = writeln!(out, "    echo \"bidsflow: payload exited with status $status\" >&2");
    let _ = writeln!(out, "    exit \"$status\"");
    let _ = writeln!(out, "fi");
    out.push('\n');

    let mut complete = invocation;
    complete.push("complete".into());
    complete.extend(pair_flags(unit));
    complete.push("--step-version".into());
    complete.push(unit.version.clone());
    complete.push("--attempt".into());
    complete.push(unit.id.attempt.to_string());
    let _ = writeln!(
        out,
        "{} --job-id \"${{SLURM_JOB_ID:-${{{}:-}}}}\"",
        shell_join(&complete),
        LOCAL_JOB_ID_VAR
    );
    out
}
