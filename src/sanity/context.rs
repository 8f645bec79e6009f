//! Resolving where a step's files live for a given pair.

use crate::cohort::PairKey;
use crate::config::{resolve_string, InterpolationContext, OutputValidator, PathsConfig};
use crate::error::Result;
use crate::sanity::check::{evaluate, CheckTarget, DiagnosticReason, Verdict};
use crate::sanity::marker::MarkerExpectation;
use crate::state::StateLayout;
use crate::steps::{StepCatalog, StepDefinition};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Everything needed to evaluate validators for any step and pair.
#[derive(Debug, Clone)]
pub struct SanityContext<'a> {
    pub catalog: &'a StepCatalog,
    pub paths: &'a PathsConfig,
    pub layout: StateLayout,
}

impl<'a> SanityContext<'a> {
    pub fn new(catalog: &'a StepCatalog, paths: &'a PathsConfig) -> Self {
        Self {
            catalog,
            paths,
            layout: StateLayout::new(paths.state_dir()),
        }
    }

    /// Template variables for one step and pair, including `${output}`.
    pub fn variables(&self, step: &StepDefinition, pair: &PairKey) -> Result<InterpolationContext> {
        let mut vars = InterpolationContext::new()
            .with("subject", pair.subject.as_str())
            .with("session", pair.session.as_str())
            .with("step", step.name.as_str())
            .with("version", step.version.as_str())
            .with("input_dir", self.paths.input_dir.display().to_string())
            .with("derivatives", self.paths.derivatives.display().to_string())
            .with("cpus", step.resources.cpus.to_string())
            .with("memory_gb", step.resources.memory_gb.to_string());
        let output = resolve_string(&step.output_template, &vars)?;
        vars.set("output", output);
        Ok(vars)
    }

    /// Resolved output location.
    pub fn output_dir(&self, step: &StepDefinition, pair: &PairKey) -> Result<PathBuf> {
        let vars = self.variables(step, pair)?;
        Ok(PathBuf::from(vars.resolve("output").unwrap_or_default()))
    }

    /// Raw data directory of a pair.
    pub fn input_dir(&self, pair: &PairKey) -> PathBuf {
        self.paths
            .input_dir
            .join(&pair.subject)
            .join(&pair.session)
    }

    fn target(
        &self,
        step: &StepDefinition,
        pair: &PairKey,
        base: Option<PathBuf>,
        version: &str,
        not_before: Option<DateTime<Utc>>,
    ) -> std::result::Result<CheckTarget, Verdict> {
        let vars = self.variables(step, pair).map_err(|e| {
            Verdict::unsatisfied(
                DiagnosticReason::Unreadable,
                format!("Output location of {}", step.name),
                e.to_string(),
            )
        })?;
        let base = base.unwrap_or_else(|| PathBuf::from(vars.resolve("output").unwrap_or_default()));
        Ok(CheckTarget {
            base,
            marker: self.layout.marker(pair, &step.name),
            expected: MarkerExpectation {
                step: step.name.clone(),
                version: version.to_string(),
                subject: pair.subject.clone(),
                session: pair.session.clone(),
            },
            not_before,
            vars,
        })
    }

    /// Evaluate a step's output validator for a pair.
    ///
    /// `version` is the version the output is expected to come from and
    /// `not_before` rejects markers older than the attempt being checked.
    pub fn check_output(
        &self,
        step: &StepDefinition,
        pair: &PairKey,
        version: &str,
        not_before: Option<DateTime<Utc>>,
    ) -> Verdict {
        match self.target(step, pair, None, version, not_before) {
            Ok(target) => evaluate(&step.validator, &target),
            Err(verdict) => verdict,
        }
    }

    /// Evaluate a step's raw-input checks for a pair.
    pub fn check_inputs(&self, step: &StepDefinition, pair: &PairKey) -> Verdict {
        if step.inputs.is_empty() {
            return Verdict::satisfied("No input requirements");
        }
        let validator = OutputValidator::All {
            checks: step.inputs.clone(),
        };
        match self.target(step, pair, Some(self.input_dir(pair)), &step.version, None) {
            Ok(target) => {
                let mut verdict = evaluate(&validator, &target);
                verdict.description = format!("Inputs: {}", verdict.description);
                verdict
            }
            Err(verdict) => verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;

    fn config() -> FlowConfig {
        let mut config: FlowConfig = serde_yaml::from_str(
            r#"
steps:
  segment:
    command: recon-all
  qsiprep:
    command: qsiprep
    output: ${derivatives}/qsiprep/${subject}_${session}
    inputs:
      - type: non_empty_dir
        path: dwi
"#,
        )
        .unwrap();
        config.paths.input_dir = PathBuf::from("/data/bids");
        config.paths.derivatives = PathBuf::from("/data/derivatives");
        config
    }

    #[test]
    fn resolves_default_and_custom_outputs() {
        let config = config();
        let catalog = StepCatalog::from_config(&config).unwrap();
        let ctx = SanityContext::new(&catalog, &config.paths);
        let pair = PairKey::new("01", "02");

        let segment = catalog.get("segment").unwrap();
        assert_eq!(
            ctx.output_dir(segment, &pair).unwrap(),
            PathBuf::from("/data/derivatives/segment/sub-01/ses-02")
        );
        let qsiprep = catalog.get("qsiprep").unwrap();
        assert_eq!(
            ctx.output_dir(qsiprep, &pair).unwrap(),
            PathBuf::from("/data/derivatives/qsiprep/sub-01_ses-02")
        );
    }

    #[test]
    fn marker_lives_in_state_dir() {
        let config = config();
        let catalog = StepCatalog::from_config(&config).unwrap();
        let ctx = SanityContext::new(&catalog, &config.paths);
        let pair = PairKey::new("01", "01");
        assert_eq!(
            ctx.layout.marker(&pair, "segment"),
            PathBuf::from("/data/derivatives/.bidsflow/markers/sub-01/ses-01/segment.json")
        );
    }

    #[test]
    fn missing_inputs_are_reported() {
        let config = config();
        let catalog = StepCatalog::from_config(&config).unwrap();
        let ctx = SanityContext::new(&catalog, &config.paths);
        let pair = PairKey::new("01", "01");

        let verdict = ctx.check_inputs(catalog.get("qsiprep").unwrap(), &pair);
        assert!(!verdict.satisfied);
        assert!(verdict.description.starts_with("Inputs:"));
        assert!(ctx
            .check_inputs(catalog.get("segment").unwrap(), &pair)
            .satisfied);
    }
}
