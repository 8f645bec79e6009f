//! Configuration validation rules.
//!
//! Collects every problem in a configuration rather than stopping at the
//! first, so `bidsflow validate` can report them together. Graph-level
//! checks (unknown prerequisites, cycles) are repeated with typed errors
//! when the step catalog is built.

use crate::config::interpolation::unknown_variables;
use crate::config::schema::{FlowConfig, OutputValidator, SchedulerKind, StepConfig};
use crate::error::{FlowError, Result};
use crate::steps::parse_time_limit;

/// Validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Rule identifier
    pub rule: String,
    /// Human-readable error message
    pub message: String,
    /// Step name if error is step-specific
    pub step: Option<String>,
}

impl ValidationError {
    fn step(rule: &str, step: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            message,
            step: Some(step.to_string()),
        }
    }

    fn global(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            message,
            step: None,
        }
    }
}

/// Validate a configuration and return all errors.
pub fn validate_config(config: &FlowConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    errors.extend(validate_paths(config));
    errors.extend(validate_scheduler(config));
    for (name, step) in &config.steps {
        errors.extend(validate_step(name, step, config));
    }
    errors
}

fn validate_paths(config: &FlowConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.paths.derivatives.as_os_str().is_empty() {
        errors.push(ValidationError::global(
            "missing-path",
            "paths.derivatives must be set".to_string(),
        ));
    }
    if config.paths.input_dir.as_os_str().is_empty() && config.cohort.subjects.is_empty() {
        errors.push(ValidationError::global(
            "missing-path",
            "paths.input_dir must be set when cohort.subjects is empty".to_string(),
        ));
    }
    errors
}

fn validate_scheduler(config: &FlowConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.scheduler.max_submit_attempts == 0 {
        errors.push(ValidationError::global(
            "submit-attempts",
            "scheduler.max_submit_attempts must be at least 1".to_string(),
        ));
    }
    let backoff = &config.scheduler.backoff;
    if !(backoff.multiplier.is_finite() && backoff.multiplier >= 1.0) {
        errors.push(ValidationError::global(
            "backoff",
            format!(
                "scheduler.backoff.multiplier must be >= 1.0, got {}",
                backoff.multiplier
            ),
        ));
    }
    if config.scheduler.kind == SchedulerKind::Slurm {
        // job logs live under the state dir and are named in unquoted
        // #SBATCH --output/--error directives, where '%' is a pattern
        let state_dir = config.paths.state_dir();
        let text = state_dir.to_string_lossy();
        if text.chars().any(|c| c.is_whitespace() || c == '%') {
            errors.push(ValidationError::global(
                "log-path",
                format!(
                    "state directory '{}' must not contain whitespace or '%' for Slurm log paths",
                    text
                ),
            ));
        }
    }
    errors
}

fn validate_step(name: &str, step: &StepConfig, config: &FlowConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.enabled && step.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
        errors.push(ValidationError::step(
            "missing-command",
            name,
            format!("Step '{}' is enabled but has no command", name),
        ));
    }

    for dep in &step.depends_on {
        if !config.steps.contains_key(dep) {
            errors.push(ValidationError::step(
                "unknown-step",
                name,
                format!("Step '{}' depends on '{}' which does not exist", name, dep),
            ));
        }
        if dep == name {
            errors.push(ValidationError::step(
                "self-dependency",
                name,
                format!("Step '{}' depends on itself", name),
            ));
        }
    }

    if let Err(e) = parse_time_limit(&step.resources.time_limit) {
        errors.push(ValidationError::step(
            "time-limit",
            name,
            format!("Step '{}': {}", name, e),
        ));
    }

    if step.max_concurrent == Some(0) {
        errors.push(ValidationError::step(
            "max-concurrent",
            name,
            format!("Step '{}' has max_concurrent: 0 and could never run", name),
        ));
    }

    let templates = step
        .command
        .iter()
        .chain(step.output.iter())
        .cloned()
        .chain(validator_paths(step.validator.as_ref()))
        .chain(step.inputs.iter().flat_map(|v| validator_paths(Some(v))));
    for template in templates {
        for var in unknown_variables(&template) {
            errors.push(ValidationError::step(
                "unknown-variable",
                name,
                format!("Step '{}' references unknown variable '${{{}}}'", name, var),
            ));
        }
    }

    for input in &step.inputs {
        if input.walk().iter().any(|c| matches!(c, OutputValidator::Marker)) {
            errors.push(ValidationError::step(
                "marker-input",
                name,
                format!("Step '{}' uses a marker check on its raw inputs", name),
            ));
        }
    }

    for validator in step.validator.iter().chain(step.inputs.iter()) {
        for check in validator.walk() {
            if let OutputValidator::FileContains { pattern, .. } = check {
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(ValidationError::step(
                        "invalid-pattern",
                        name,
                        format!("Step '{}' has an invalid pattern '{}': {}", name, pattern, e),
                    ));
                }
            }
            if let OutputValidator::All { checks } | OutputValidator::Any { checks } = check {
                if checks.is_empty() {
                    errors.push(ValidationError::step(
                        "empty-validator",
                        name,
                        format!("Step '{}' has a validator group with no checks", name),
                    ));
                }
            }
        }
    }

    errors
}

fn validator_paths(validator: Option<&OutputValidator>) -> Vec<String> {
    validator
        .map(|v| {
            v.walk()
                .into_iter()
                .filter_map(|check| match check {
                    OutputValidator::FileExists { path }
                    | OutputValidator::NonEmptyFile { path }
                    | OutputValidator::NonEmptyDir { path }
                    | OutputValidator::FileContains { path, .. } => Some(path.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Validate and return an error joining every problem found.
pub fn validate(config: &FlowConfig) -> Result<()> {
    let errors = validate_config(config);
    if errors.is_empty() {
        return Ok(());
    }
    let message = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    Err(FlowError::ConfigValidationError { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> FlowConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const BASE: &str = r#"
paths:
  input_dir: /data/bids
  derivatives: /data/derivatives
"#;

    fn with_steps(steps: &str) -> FlowConfig {
        config(&format!("{}steps:\n{}", BASE, steps))
    }

    #[test]
    fn valid_config_passes() {
        let cfg = with_steps(
            "  segment:\n    command: recon-all -s ${subject}\n  reconstruct:\n    command: qsirecon ${output}\n    depends_on: [segment]\n",
        );
        assert!(validate_config(&cfg).is_empty());
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn enabled_step_without_command_fails() {
        let cfg = with_steps("  segment:\n    version: '1'\n");
        let errors = validate_config(&cfg);
        assert_eq!(errors[0].rule, "missing-command");
    }

    #[test]
    fn disabled_step_without_command_is_allowed() {
        let cfg = with_steps("  bids:\n    enabled: false\n");
        assert!(validate_config(&cfg).is_empty());
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let cfg = with_steps("  reconstruct:\n    command: run\n    depends_on: [segmnet]\n");
        let errors = validate_config(&cfg);
        assert!(errors.iter().any(|e| e.rule == "unknown-step"));
    }

    #[test]
    fn bad_time_limit_is_reported() {
        let cfg = with_steps("  segment:\n    command: run\n    resources:\n      time_limit: forever\n");
        let errors = validate_config(&cfg);
        assert!(errors.iter().any(|e| e.rule == "time-limit"));
    }

    #[test]
    fn unknown_variable_is_reported() {
        let cfg = with_steps("  segment:\n    command: run ${sbuject}\n");
        let errors = validate_config(&cfg);
        assert!(errors
            .iter()
            .any(|e| e.rule == "unknown-variable" && e.message.contains("sbuject")));
    }

    #[test]
    fn invalid_regex_is_reported() {
        let cfg = with_steps(
            "  segment:\n    command: run\n    validator:\n      type: file_contains\n      path: log.txt\n      pattern: '(unclosed'\n",
        );
        let errors = validate_config(&cfg);
        assert!(errors.iter().any(|e| e.rule == "invalid-pattern"));
    }

    #[test]
    fn marker_on_inputs_is_reported() {
        let cfg = with_steps("  qsiprep:\n    command: run\n    inputs:\n      - type: marker\n");
        assert!(validate_config(&cfg).iter().any(|e| e.rule == "marker-input"));
    }

    #[test]
    fn missing_derivatives_is_reported() {
        let cfg = config("cohort:\n  subjects: ['01']\n");
        let errors = validate_config(&cfg);
        assert!(errors.iter().any(|e| e.rule == "missing-path"));
    }

    #[test]
    fn slurm_log_paths_with_spaces_are_reported() {
        let cfg = config("paths:\n  input_dir: /data/bids\n  derivatives: /data/my study/derivatives\n");
        let errors = validate_config(&cfg);
        assert!(errors
            .iter()
            .any(|e| e.rule == "log-path" && e.message.contains("my study")));

        let cfg = config("paths:\n  input_dir: /data/bids\n  derivatives: /data/derivatives\n  state_dir: /scratch/run%j\n");
        assert!(validate_config(&cfg).iter().any(|e| e.rule == "log-path"));
    }

    #[test]
    fn local_backend_allows_spaces_in_paths() {
        let cfg = config(
            "paths:\n  input_dir: /data/bids\n  derivatives: /data/my study/derivatives\nscheduler:\n  kind: local\n",
        );
        assert!(validate_config(&cfg).is_empty());
    }

    #[test]
    fn zero_concurrency_is_reported() {
        let cfg = with_steps("  segment:\n    command: run\n    max_concurrent: 0\n");
        assert!(validate_config(&cfg)
            .iter()
            .any(|e| e.rule == "max-concurrent"));
    }

    #[test]
    fn validate_joins_messages() {
        let cfg = with_steps("  a:\n    depends_on: [x]\n");
        let err = validate(&cfg).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("no command"));
        assert!(err.to_string().contains("'x'"));
    }
}
