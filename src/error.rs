//! Error types for bidsflow operations.
//!
//! This module defines [`FlowError`], the primary error type used throughout
//! the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Configuration problems (unknown steps, cycles, bad YAML) are fatal and
//!   surface before anything is submitted; see [`FlowError::is_config_error`]
//! - Per-work-item failures are *not* errors: they are recorded as
//!   [`FailureReason`](crate::state::FailureReason)s in the run state store
//! - Use `anyhow::Error` (via `FlowError::Other`) for unexpected errors

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for bidsflow operations.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Configuration file not found at expected location.
    #[error("Configuration not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Failed to parse configuration file.
    #[error("Failed to parse config at {path}: {message}")]
    ConfigParseError { path: PathBuf, message: String },

    /// Invalid configuration structure or values.
    #[error("Invalid configuration: {message}")]
    ConfigValidationError { message: String },

    /// A step lists a prerequisite that is not in the catalog.
    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownStep { step: String, dependency: String },

    /// Step dependency cycle detected.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// A state change that the work item state machine does not allow.
    #[error("Invalid transition for {item}: {from} -> {to}")]
    InvalidTransition {
        item: String,
        from: String,
        to: String,
    },

    /// No work item exists for the requested key.
    #[error("Unknown work item: {key}")]
    UnknownWorkItem { key: String },

    /// Another orchestrator pass holds the state store.
    #[error("Run state is locked by another pass ({path}); use --break-lock if it is stale")]
    StoreLocked { path: PathBuf },

    /// Persisted state could not be read back.
    #[error("Corrupt run state at {path}: {message}")]
    StateCorrupt { path: PathBuf, message: String },

    /// The batch scheduler could not be queried or driven.
    #[error("Scheduler error: {message}")]
    Scheduler { message: String },

    /// Shell command failed.
    #[error("Command failed with exit code {code:?}: {command}")]
    CommandFailed { command: String, code: Option<i32> },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    /// Whether this error is a fatal configuration error.
    ///
    /// Configuration errors abort the whole run before any work item is
    /// created or submitted.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::UnknownStep { .. }
                | Self::CircularDependency { .. }
        )
    }
}

/// Result type alias for bidsflow operations.
pub type Result<T> = std::result::Result<T, FlowError>;
