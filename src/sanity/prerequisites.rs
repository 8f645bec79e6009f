//! Prerequisite verification.
//!
//! [`verify_prerequisites`] is called by the orchestrator's pre-filter and
//! by `bidsflow check`, the preamble of every job unit.

use crate::cohort::PairKey;
use crate::sanity::check::{DiagnosticReason, Verdict};
use crate::sanity::context::SanityContext;
use crate::state::{RunStateStore, WorkItemState};
use crate::steps::StepDefinition;
use serde::Serialize;
use std::collections::BTreeMap;

/// Verdict for one prerequisite (or the step's raw inputs).
#[derive(Debug, Clone, Serialize)]
pub struct PrerequisiteCheck {
    pub step: String,
    pub verdict: Verdict,
}

/// All prerequisite verdicts for one work item.
#[derive(Debug, Clone, Serialize)]
pub struct PrerequisiteReport {
    pub step: String,
    pub pair: PairKey,
    pub checks: Vec<PrerequisiteCheck>,
}

impl PrerequisiteReport {
    pub fn satisfied(&self) -> bool {
        self.checks.iter().all(|c| c.verdict.satisfied)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PrerequisiteCheck> {
        self.checks.iter().filter(|c| !c.verdict.satisfied)
    }

    /// First diagnostic among the failures.
    pub fn reason(&self) -> Option<DiagnosticReason> {
        self.failures().find_map(|c| c.verdict.reason)
    }

    /// One line naming each failed prerequisite.
    pub fn summary(&self) -> String {
        let failures: Vec<String> = self
            .failures()
            .map(|c| format!("{}: {}", c.step, c.verdict.summary()))
            .collect();
        if failures.is_empty() {
            format!("{} prerequisites valid", self.checks.len())
        } else {
            failures.join("; ")
        }
    }
}

/// Versions that produced each succeeded step of a pair, from the store.
pub fn recorded_versions(store: &RunStateStore, pair: &PairKey) -> BTreeMap<String, String> {
    store
        .current_items()
        .filter(|i| &i.id.pair() == pair && i.state == WorkItemState::Succeeded)
        .map(|i| (i.id.step.clone(), i.version.clone()))
        .collect()
}

/// Re-validate every prerequisite output (and raw inputs) of `step` for `pair`.
///
/// `versions` gives the version each prerequisite's output is expected to
/// carry; steps absent from it are expected at their catalog version.
pub fn verify_prerequisites(
    ctx: &SanityContext<'_>,
    step: &StepDefinition,
    pair: &PairKey,
    versions: &BTreeMap<String, String>,
) -> PrerequisiteReport {
    let mut checks = vec![PrerequisiteCheck {
        step: "inputs".to_string(),
        verdict: ctx.check_inputs(step, pair),
    }];

    for name in ctx.catalog.prerequisites(&step.name) {
        let verdict = match ctx.catalog.get(name) {
            Some(prereq) => {
                let version = versions
                    .get(name)
                    .map(String::as_str)
                    .unwrap_or(prereq.version.as_str());
                ctx.check_output(prereq, pair, version, None)
            }
            None => Verdict::unsatisfied(
                DiagnosticReason::Missing,
                format!("Unknown prerequisite {}", name),
                "not in the step catalog",
            ),
        };
        checks.push(PrerequisiteCheck {
            step: name.clone(),
            verdict,
        });
    }

    let report = PrerequisiteReport {
        step: step.name.clone(),
        pair: pair.clone(),
        checks,
    };
    tracing::debug!(
        step = %step.name,
        pair = %pair,
        satisfied = report.satisfied(),
        "Verified prerequisites"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::sanity::marker::CompletionMarker;
    use crate::steps::StepCatalog;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn config(root: &std::path::Path) -> FlowConfig {
        let mut config: FlowConfig = serde_yaml::from_str(
            r#"
steps:
  segment:
    version: "7.4.1"
    command: recon-all
  reconstruct:
    command: qsirecon
    depends_on: [segment]
"#,
        )
        .unwrap();
        config.paths.input_dir = root.join("bids");
        config.paths.derivatives = root.join("derivatives");
        config
    }

    fn complete(ctx: &SanityContext<'_>, step: &str, pair: &PairKey, version: &str) {
        let def = ctx.catalog.get(step).unwrap();
        let out = ctx.output_dir(def, pair).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("result.nii.gz"), "data").unwrap();
        CompletionMarker {
            step: step.into(),
            version: version.into(),
            subject: pair.subject.clone(),
            session: pair.session.clone(),
            job_id: None,
            attempt: Some(1),
            finished_at: Utc::now(),
        }
        .write(&ctx.layout.marker(pair, step))
        .unwrap();
    }

    #[test]
    fn root_step_has_only_input_check() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path());
        let catalog = StepCatalog::from_config(&config).unwrap();
        let ctx = SanityContext::new(&catalog, &config.paths);
        let pair = PairKey::new("01", "01");

        let report = verify_prerequisites(&ctx, catalog.get("segment").unwrap(), &pair, &BTreeMap::new());
        assert!(report.satisfied());
        assert_eq!(report.checks.len(), 1);
    }

    #[test]
    fn missing_prerequisite_output_fails() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path());
        let catalog = StepCatalog::from_config(&config).unwrap();
        let ctx = SanityContext::new(&catalog, &config.paths);
        let pair = PairKey::new("01", "01");

        let report = verify_prerequisites(&ctx, catalog.get("reconstruct").unwrap(), &pair, &BTreeMap::new());
        assert!(!report.satisfied());
        assert_eq!(report.reason(), Some(DiagnosticReason::Missing));
        assert!(report.summary().starts_with("segment:"));
    }

    #[test]
    fn valid_prerequisite_output_passes() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path());
        let catalog = StepCatalog::from_config(&config).unwrap();
        let ctx = SanityContext::new(&catalog, &config.paths);
        let pair = PairKey::new("01", "01");
        complete(&ctx, "segment", &pair, "7.4.1");

        let report = verify_prerequisites(&ctx, catalog.get("reconstruct").unwrap(), &pair, &BTreeMap::new());
        assert!(report.satisfied(), "{}", report.summary());
    }

    #[test]
    fn recorded_version_overrides_catalog_version() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path());
        let catalog = StepCatalog::from_config(&config).unwrap();
        let ctx = SanityContext::new(&catalog, &config.paths);
        let pair = PairKey::new("01", "01");
        complete(&ctx, "segment", &pair, "7.3.2");

        let reconstruct = catalog.get("reconstruct").unwrap();
        let report = verify_prerequisites(&ctx, reconstruct, &pair, &BTreeMap::new());
        assert_eq!(report.reason(), Some(DiagnosticReason::StaleMarker));

        let versions = BTreeMap::from([("segment".to_string(), "7.3.2".to_string())]);
        assert!(verify_prerequisites(&ctx, reconstruct, &pair, &versions).satisfied());
    }

    #[test]
    fn other_pairs_do_not_count() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path());
        let catalog = StepCatalog::from_config(&config).unwrap();
        let ctx = SanityContext::new(&catalog, &config.paths);
        complete(&ctx, "segment", &PairKey::new("02", "01"), "7.4.1");

        let report = verify_prerequisites(
            &ctx,
            catalog.get("reconstruct").unwrap(),
            &PairKey::new("01", "01"),
            &BTreeMap::new(),
        );
        assert!(!report.satisfied());
    }
}
