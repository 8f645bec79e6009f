//! The sanity check engine.
//!
//! Decides whether a step's declared output exists and is well formed.
//! "The payload exited 0" and "the output is valid" are separate
//! predicates: the scheduler answers the first, this module the second.
//!
//! - [`evaluate`] - evaluate an [`OutputValidator`](crate::config::OutputValidator)
//! - [`SanityContext`] - locate outputs, inputs and markers for a step and pair
//! - [`verify_prerequisites`] - shared by the orchestrator and job preambles
//! - [`CompletionMarker`] - written by job postambles

pub mod check;
pub mod context;
pub mod marker;
pub mod prerequisites;

pub use check::{evaluate, CheckTarget, DiagnosticReason, Verdict};
pub use context::SanityContext;
pub use marker::{CompletionMarker, MarkerExpectation, MarkerReadError};
pub use prerequisites::{
    recorded_versions, verify_prerequisites, PrerequisiteCheck, PrerequisiteReport,
};

/// Exit code a job unit uses when its preamble finds an invalid prerequisite.
pub const PREREQUISITE_INVALID_EXIT_CODE: i32 = 97;
