//! Dependency graphs and the orchestrator control loop.

pub mod dependency;
pub mod graph;
pub mod orchestrator;

pub use dependency::{DependencyGraph, DependencyGraphBuilder};
pub use graph::{pair_blockers, Blocker, GraphBuilder, PairGraph};
pub use orchestrator::{Orchestrator, PassOptions, PassReport, PassTransition, Submission};
