//! Typed description of one job unit.

use crate::cohort::PairKey;
use crate::config::{resolve_string, SchedulerConfig};
use crate::error::{FlowError, Result};
use crate::sanity::SanityContext;
use crate::state::WorkItemId;
use crate::steps::{ResourceProfile, StepDefinition};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How a unit calls back into this executable for `check` and `complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub exe: PathBuf,
    pub project: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

impl Invocation {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            project: None,
            config: None,
        }
    }

    /// The running executable, falling back to `bidsflow` on `PATH`.
    pub fn current() -> Self {
        let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("bidsflow"));
        Self::new(exe)
    }

    pub fn with_project(mut self, project: impl Into<PathBuf>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_config(mut self, config: Option<PathBuf>) -> Self {
        self.config = config;
        self
    }

    /// Executable plus global flags.
    pub fn words(&self) -> Vec<String> {
        let mut words = vec![self.exe.display().to_string()];
        if let Some(project) = &self.project {
            words.push("--project".into());
            words.push(project.display().to_string());
        }
        if let Some(config) = &self.config {
            words.push("--config".into());
            words.push(config.display().to_string());
        }
        words
    }
}

/// Scheduler-wide header settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerHeader {
    pub account: Option<String>,
    pub email: Option<String>,
    pub mail_type: String,
}

impl From<&SchedulerConfig> for SchedulerHeader {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            account: config.account.clone(),
            email: config.email.clone(),
            mail_type: config.mail_type.clone(),
        }
    }
}

/// Everything needed to render one work item as an executable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUnit {
    pub id: WorkItemId,
    pub version: String,
    pub job_name: String,
    /// Resolved payload command.
    pub payload: String,
    pub env: BTreeMap<String, String>,
    pub resources: ResourceProfile,
    pub output_dir: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub prerequisites: Vec<String>,
    pub marker: PathBuf,
    pub invocation: Invocation,
    pub header: SchedulerHeader,
}

impl JobUnit {
    /// Resolve a step's templates for one work item.
    pub fn build(
        ctx: &SanityContext<'_>,
        step: &StepDefinition,
        id: &WorkItemId,
        invocation: &Invocation,
        header: SchedulerHeader,
    ) -> Result<Self> {
        let pair = id.pair();
        let command = step
            .command
            .as_deref()
            .ok_or_else(|| FlowError::ConfigValidationError {
                message: format!("Step '{}' has no command", step.name),
            })?;
        let vars = ctx.variables(step, &pair)?;
        let payload = resolve_string(command, &vars)?;
        let env = step
            .env
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_string(v, &vars)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let (stdout, stderr) = ctx.layout.logs(id);

        Ok(Self {
            id: id.clone(),
            version: step.version.clone(),
            job_name: job_name(&step.name, &pair),
            payload,
            env,
            resources: step.resources.clone(),
            output_dir: ctx.output_dir(step, &pair)?,
            stdout,
            stderr,
            prerequisites: step.prerequisites.clone(),
            marker: ctx.layout.marker(&pair, &step.name),
            invocation: invocation.clone(),
            header,
        })
    }

    pub fn pair(&self) -> PairKey {
        self.id.pair()
    }
}

/// `segment_sub-01_ses-01`
pub fn job_name(step: &str, pair: &PairKey) -> String {
    format!("{}_{}_{}", step, pair.subject, pair.session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::steps::StepCatalog;

    fn config() -> FlowConfig {
        let mut config: FlowConfig = serde_yaml::from_str(
            r#"
steps:
  segment:
    version: "7.4.1"
    command: recon-all -s ${subject}_${session} -sd ${output} -openmp ${cpus}
    resources:
      cpus: 8
    env:
      SUBJECTS_DIR: ${output}
  qc:
    depends_on: [segment]
"#,
        )
        .unwrap();
        config.paths.input_dir = PathBuf::from("/data/bids");
        config.paths.derivatives = PathBuf::from("/data/derivatives");
        config
    }

    #[test]
    fn resolves_payload_and_env() {
        let config = config();
        let catalog = StepCatalog::from_config(&config).unwrap();
        let ctx = SanityContext::new(&catalog, &config.paths);
        let id = WorkItemId::first(&PairKey::new("01", "02"), "segment");

        let unit = JobUnit::build(
            &ctx,
            catalog.get("segment").unwrap(),
            &id,
            &Invocation::new("/opt/bin/bidsflow"),
            SchedulerHeader::default(),
        )
        .unwrap();

        assert_eq!(
            unit.payload,
            "recon-all -s sub-01_ses-02 -sd /data/derivatives/segment/sub-01/ses-02 -openmp 8"
        );
        assert_eq!(unit.env["SUBJECTS_DIR"], "/data/derivatives/segment/sub-01/ses-02");
        assert_eq!(unit.job_name, "segment_sub-01_ses-02");
        assert_eq!(unit.version, "7.4.1");
        assert!(unit.stdout.ends_with("logs/sub-01/ses-02/segment-1.out"));
    }

    #[test]
    fn step_without_command_cannot_be_built() {
        let config = config();
        let catalog = StepCatalog::from_config(&config).unwrap();
        let ctx = SanityContext::new(&catalog, &config.paths);
        let id = WorkItemId::first(&PairKey::new("01", "01"), "qc");

        let err = JobUnit::build(
            &ctx,
            catalog.get("qc").unwrap(),
            &id,
            &Invocation::new("bidsflow"),
            SchedulerHeader::default(),
        )
        .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn invocation_carries_global_flags() {
        let invocation = Invocation::new("/bin/bidsflow")
            .with_project("/study")
            .with_config(Some(PathBuf::from("/study/alt.yml")));
        assert_eq!(
            invocation.words(),
            vec!["/bin/bidsflow", "--project", "/study", "--config", "/study/alt.yml"]
        );
    }
}
