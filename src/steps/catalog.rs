//! The step registry.
//!
//! A [`StepCatalog`] is built once per invocation from the configuration
//! snapshot. Building it rejects unknown prerequisites and cycles, so every
//! later stage can assume an acyclic, closed catalog.

use crate::config::{FlowConfig, OutputValidator, StepConfig};
use crate::error::{FlowError, Result};
use crate::runner::dependency::DependencyGraph;
use crate::steps::resources::ResourceProfile;
use std::collections::{BTreeMap, BTreeSet};

/// Output location used when a step does not declare one.
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "${derivatives}/${step}/${subject}/${session}";

/// An immutable catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    /// Ordered prerequisite step names.
    pub prerequisites: Vec<String>,
    pub resources: ResourceProfile,
    /// Payload command template; `None` only for disabled steps.
    pub command: Option<String>,
    pub output_template: String,
    pub validator: OutputValidator,
    /// Raw-data checks relative to the pair's input directory.
    pub inputs: Vec<OutputValidator>,
    pub max_concurrent: Option<usize>,
    /// Disabled steps are never submitted, only validated.
    pub enabled: bool,
    pub env: BTreeMap<String, String>,
}

impl StepDefinition {
    /// Build a definition from its config entry.
    pub fn from_config(name: &str, config: &StepConfig, default_partition: Option<&str>) -> Result<Self> {
        let resources = ResourceProfile::from_config(&config.resources, default_partition).map_err(|e| {
            FlowError::ConfigValidationError {
                message: format!("Step '{}': {}", name, e),
            }
        })?;

        Ok(Self {
            name: name.to_string(),
            version: config.version.clone(),
            description: config.description.clone(),
            prerequisites: config.depends_on.clone(),
            resources,
            command: config.command.clone(),
            output_template: config
                .output
                .clone()
                .unwrap_or_else(|| DEFAULT_OUTPUT_TEMPLATE.to_string()),
            validator: config
                .validator
                .clone()
                .unwrap_or_else(OutputValidator::default_for_step),
            inputs: config.inputs.clone(),
            max_concurrent: config.max_concurrent,
            enabled: config.enabled,
            env: config.env.clone(),
        })
    }
}

/// All step definitions plus their validated dependency graph.
#[derive(Debug, Clone)]
pub struct StepCatalog {
    steps: BTreeMap<String, StepDefinition>,
    graph: DependencyGraph,
    order: Vec<String>,
}

impl StepCatalog {
    /// Build and validate the catalog.
    ///
    /// # Errors
    ///
    /// - `UnknownStep` if a prerequisite is not defined
    /// - `CircularDependency` with the cycle path if the steps are not a DAG
    /// - `ConfigValidationError` for unusable resource profiles
    pub fn from_config(config: &FlowConfig) -> Result<Self> {
        let default_partition = config.scheduler.partition.as_deref();

        let mut builder = DependencyGraph::builder();
        let mut steps = BTreeMap::new();
        for (name, step_config) in &config.steps {
            builder = builder.add_step(name.clone(), step_config.depends_on.clone());
            steps.insert(
                name.clone(),
                StepDefinition::from_config(name, step_config, default_partition)?,
            );
        }

        let graph = builder.build()?;
        let order = graph.topological_order()?;
        tracing::debug!(steps = ?order, "Validated step catalog");

        Ok(Self { steps, graph, order })
    }

    /// Restrict submission to the named steps; the rest become external.
    ///
    /// The graph shape is unchanged so unselected prerequisites still gate
    /// their dependents through their outputs.
    pub fn select(mut self, names: &[String]) -> Result<Self> {
        if names.is_empty() {
            return Ok(self);
        }
        if let Some(unknown) = names.iter().find(|n| !self.steps.contains_key(*n)) {
            return Err(FlowError::ConfigValidationError {
                message: format!("Unknown step '{}' in --steps", unknown),
            });
        }
        let selected: BTreeSet<&String> = names.iter().collect();
        for (name, def) in self.steps.iter_mut() {
            if !selected.contains(name) {
                def.enabled = false;
            }
        }
        Ok(self)
    }

    /// Look up a step by name.
    pub fn get(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.get(name)
    }

    /// Look up a step by name, failing for unknown names.
    pub fn require(&self, name: &str) -> Result<&StepDefinition> {
        self.steps
            .get(name)
            .ok_or_else(|| FlowError::ConfigValidationError {
                message: format!("Unknown step '{}'", name),
            })
    }

    /// Steps in topological order.
    pub fn iter(&self) -> impl Iterator<Item = &StepDefinition> {
        self.order.iter().filter_map(|name| self.steps.get(name))
    }

    /// Step names in topological order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// The step-level dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Direct prerequisites of a step.
    pub fn prerequisites(&self, name: &str) -> &[String] {
        self.graph.dependencies_of(name)
    }

    /// Every step downstream of `name`.
    pub fn lineage(&self, name: &str) -> BTreeSet<String> {
        self.graph.transitive_dependents(name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> FlowConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const PIPELINE: &str = r#"
scheduler:
  partition: normal
steps:
  segment:
    version: "7.4.1"
    command: recon-all -s ${subject}
    resources:
      cpus: 8
      time_limit: "24:00:00"
  reconstruct:
    command: qsirecon ${output}
    depends_on: [segment]
  connectome:
    command: connectome ${output}
    depends_on: [reconstruct]
    max_concurrent: 10
"#;

    #[test]
    fn builds_catalog_in_dependency_order() {
        let catalog = StepCatalog::from_config(&config(PIPELINE)).unwrap();
        assert_eq!(catalog.order(), &["segment", "reconstruct", "connectome"]);
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.prerequisites("connectome"), &["reconstruct"]);
    }

    #[test]
    fn definition_carries_config() {
        let catalog = StepCatalog::from_config(&config(PIPELINE)).unwrap();
        let segment = catalog.get("segment").unwrap();
        assert_eq!(segment.version, "7.4.1");
        assert_eq!(segment.resources.cpus, 8);
        assert_eq!(segment.resources.partition.as_deref(), Some("normal"));
        assert_eq!(segment.output_template, DEFAULT_OUTPUT_TEMPLATE);
        assert_eq!(segment.validator, OutputValidator::default_for_step());
        assert_eq!(catalog.get("connectome").unwrap().max_concurrent, Some(10));
    }

    #[test]
    fn unknown_prerequisite_is_fatal() {
        let err = StepCatalog::from_config(&config(
            "steps:\n  reconstruct:\n    command: x\n    depends_on: [segmnet]\n",
        ))
        .unwrap_err();
        assert!(matches!(err, FlowError::UnknownStep { .. }));
        assert!(err.is_config_error());
    }

    #[test]
    fn cycle_is_fatal() {
        let err = StepCatalog::from_config(&config(
            "steps:\n  a:\n    command: x\n    depends_on: [b]\n  b:\n    command: y\n    depends_on: [a]\n",
        ))
        .unwrap_err();
        assert!(matches!(err, FlowError::CircularDependency { .. }));
    }

    #[test]
    fn bad_time_limit_is_fatal() {
        let err = StepCatalog::from_config(&config(
            "steps:\n  a:\n    command: x\n    resources:\n      time_limit: soon\n",
        ))
        .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn select_disables_others() {
        let catalog = StepCatalog::from_config(&config(PIPELINE))
            .unwrap()
            .select(&["reconstruct".to_string()])
            .unwrap();
        assert!(!catalog.get("segment").unwrap().enabled);
        assert!(catalog.get("reconstruct").unwrap().enabled);
        assert!(!catalog.get("connectome").unwrap().enabled);
        assert_eq!(catalog.order().len(), 3);
    }

    #[test]
    fn select_rejects_unknown_names() {
        let result = StepCatalog::from_config(&config(PIPELINE))
            .unwrap()
            .select(&["nope".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn lineage_covers_downstream() {
        let catalog = StepCatalog::from_config(&config(PIPELINE)).unwrap();
        let lineage = catalog.lineage("segment");
        assert!(lineage.contains("reconstruct"));
        assert!(lineage.contains("connectome"));
    }
}
