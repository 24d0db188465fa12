//! Terminal outcome of a stage instance.

use super::{StageArtifact, StageState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The outcome a stage reports when it reaches a terminal state.
///
/// `StageOutcome` is immutable once created; use the factory methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// The terminal state.
    pub state: StageState,

    /// Artifacts produced by the stage (logs, reports).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<StageArtifact>,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Error message (for failed stages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Why the stage was skipped or cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StageOutcome {
    fn with_state(state: StageState) -> Self {
        Self {
            state,
            artifacts: Vec::new(),
            metadata: HashMap::new(),
            error: None,
            reason: None,
        }
    }

    /// Creates a successful outcome.
    #[must_use]
    pub fn success() -> Self {
        Self::with_state(StageState::Success)
    }

    /// Creates a failed outcome with an error message.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_state(StageState::Failure)
        }
    }

    /// Creates a skipped outcome with a reason.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::with_state(StageState::Skipped)
        }
    }

    /// Creates a cancelled outcome with a reason.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::with_state(StageState::Cancelled)
        }
    }

    /// Appends an artifact.
    #[must_use]
    pub fn with_artifact(mut self, artifact: StageArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Appends artifacts.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: impl IntoIterator<Item = StageArtifact>) -> Self {
        self.artifacts.extend(artifacts);
        self
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == StageState::Success
    }
}
