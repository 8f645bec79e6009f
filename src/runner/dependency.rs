//! Step-level dependency graph.
//!
//! Built once from the step catalog and shared by every (subject, session)
//! pair; per-pair graphs are copies of this shape.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{FlowError, Result};

/// Dependency relationships between steps.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Step name to its direct prerequisites, in declaration order.
    dependencies: BTreeMap<String, Vec<String>>,
    /// Step name to steps that directly depend on it.
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create a new dependency graph builder.
    pub fn builder() -> DependencyGraphBuilder {
        DependencyGraphBuilder::new()
    }

    /// Direct prerequisites of a step.
    pub fn dependencies_of(&self, step: &str) -> &[String] {
        self.dependencies
            .get(step)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Steps that directly depend on the given step.
    pub fn dependents_of(&self, step: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(step)
    }

    /// Check if a step exists in the graph.
    pub fn contains(&self, step: &str) -> bool {
        self.dependencies.contains_key(step)
    }

    /// All step names, sorted.
    pub fn steps(&self) -> impl Iterator<Item = &String> {
        self.dependencies.keys()
    }

    /// Number of steps in the graph.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Steps in topological order (prerequisites before dependents).
    ///
    /// Ties break alphabetically so the order is stable across runs.
    /// Returns `CircularDependency` with the offending path if the graph has
    /// a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(step, deps)| (step.as_str(), deps.len()))
            .collect();

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(step, _)| *step)
            .collect();

        let mut result = Vec::with_capacity(self.len());
        while let Some(step) = ready.pop_first() {
            result.push(step.to_string());
            for dependent in self.dependents.get(step).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        if result.len() != self.len() {
            let cycle = self.find_cycle().unwrap_or_else(|| {
                in_degree
                    .iter()
                    .filter(|(_, &d)| d > 0)
                    .map(|(s, _)| s.to_string())
                    .collect()
            });
            return Err(FlowError::CircularDependency {
                cycle: cycle.join(" -> "),
            });
        }

        Ok(result)
    }

    /// Find a cycle in the graph, returning the path if one exists.
    ///
    /// The returned path starts and ends with the same step.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Visited,
        }

        fn dfs<'a>(
            node: &'a str,
            graph: &'a DependencyGraph,
            marks: &mut BTreeMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            marks.insert(node, Mark::Visiting);
            path.push(node);

            for dep in graph.dependencies_of(node) {
                match marks.get(dep.as_str()) {
                    Some(Mark::Visiting) => {
                        let start = path.iter().position(|s| *s == dep.as_str()).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Visited) => {}
                    None => {
                        if let Some(cycle) = dfs(dep, graph, marks, path) {
                            return Some(cycle);
                        }
                    }
                }
            }

            path.pop();
            marks.insert(node, Mark::Visited);
            None
        }

        let mut marks = BTreeMap::new();
        let mut path = Vec::new();
        for step in self.dependencies.keys() {
            if !marks.contains_key(step.as_str()) {
                if let Some(cycle) = dfs(step, self, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Check if a step is ready given the set of satisfied steps.
    pub fn is_ready(&self, step: &str, satisfied: &BTreeSet<String>) -> bool {
        self.dependencies_of(step)
            .iter()
            .all(|d| satisfied.contains(d))
    }

    /// The step's lineage: every step that depends on it, directly or not.
    pub fn transitive_dependents(&self, step: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut to_visit = VecDeque::from([step.to_string()]);
        while let Some(current) = to_visit.pop_front() {
            for dep in self.dependents.get(&current).into_iter().flatten() {
                if result.insert(dep.clone()) {
                    to_visit.push_back(dep.clone());
                }
            }
        }
        result
    }

    /// Every step the given step needs, directly or not.
    pub fn transitive_dependencies(&self, step: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut to_visit = VecDeque::from([step.to_string()]);
        while let Some(current) = to_visit.pop_front() {
            for dep in self.dependencies_of(&current) {
                if result.insert(dep.clone()) {
                    to_visit.push_back(dep.clone());
                }
            }
        }
        result
    }
}

/// Builder for constructing a DependencyGraph.
#[derive(Debug, Default)]
pub struct DependencyGraphBuilder {
    dependencies: BTreeMap<String, Vec<String>>,
}

impl DependencyGraphBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step with its prerequisites.
    pub fn add_step(mut self, name: impl Into<String>, depends_on: Vec<String>) -> Self {
        let deps = self.dependencies.entry(name.into()).or_default();
        for dep in depends_on {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        self
    }

    /// Build the dependency graph.
    ///
    /// Returns `UnknownStep` if any prerequisite names a step that was not
    /// added. Cycles are accepted here and reported by
    /// [`DependencyGraph::topological_order`].
    pub fn build(self) -> Result<DependencyGraph> {
        let mut dependents: BTreeMap<String, BTreeSet<String>> = self
            .dependencies
            .keys()
            .map(|s| (s.clone(), BTreeSet::new()))
            .collect();

        for (step, deps) in &self.dependencies {
            for dep in deps {
                match dependents.get_mut(dep) {
                    Some(set) => {
                        set.insert(step.clone());
                    }
                    None => {
                        return Err(FlowError::UnknownStep {
                            step: step.clone(),
                            dependency: dep.clone(),
                        })
                    }
                }
            }
        }

        Ok(DependencyGraph {
            dependencies: self.dependencies,
            dependents,
        })
    }
}
