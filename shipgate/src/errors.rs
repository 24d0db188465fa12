//! Error types for the orchestrator.
//!
//! The taxonomy follows how failures propagate through a run:
//! input errors abort the run before Build, collaborator errors stay
//! local to the stage that hit them and never surface here, cancellation is a failure for
//! aggregation, and notification errors are only logged.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum ShipgateError {
    /// The inbound event could not be classified.
    #[error("{0}")]
    InvalidTrigger(#[from] TriggerError),

    /// The override commit could not be resolved.
    #[error("Cannot resolve override commit '{commit}': {reason}")]
    UnresolvableCommit {
        /// The commit that was requested.
        commit: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The run was superseded by a newer run with the same key.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The stage graph is malformed (unknown dependency or cycle).
    #[error("Invalid stage graph: {0}")]
    InvalidGraph(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShipgateError {
    /// Returns true for errors that are fatal to a run before Build starts.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidTrigger(_) | Self::UnresolvableCommit { .. })
    }
}

/// Error raised when an inbound event payload is malformed.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Malformed trigger: {message}")]
pub struct TriggerError {
    /// The error message.
    pub message: String,
    /// The payload field at fault, if known.
    pub field: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl TriggerError {
    /// Creates a new trigger error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
            context: HashMap::new(),
        }
    }

    /// Creates an error for a required field that is missing or empty.
    #[must_use]
    pub fn missing(field: &str) -> Self {
        Self::new(format!("required field '{field}' is missing")).with_field(field)
    }

    /// Sets the offending field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error reported by an external collaborator invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The command exited with a non-zero status.
    #[error("'{verb}' exited with status {code}: {stderr}")]
    NonZeroExit {
        /// The verb that was invoked.
        verb: String,
        /// Exit code (-1 when killed by a signal).
        code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// The command could not be started.
    #[error("failed to launch '{verb}': {reason}")]
    Launch {
        /// The verb that was invoked.
        verb: String,
        /// Why launching failed.
        reason: String,
    },

    /// The invocation was cancelled before it completed.
    #[error("'{0}' was cancelled")]
    Cancelled(String),

    /// A commit lookup found no such commit.
    #[error("commit '{0}' not found")]
    CommitNotFound(String),

    /// Any other collaborator-side failure.
    #[error("{0}")]
    Other(String),
}

impl CollaboratorError {
    /// Returns true if the invocation ended because it was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
