//! Named artifacts surfaced by stages (logs, reports).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What kind of content an artifact carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Collaborator logs.
    Logs,
    /// Test or check report.
    Report,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logs => write!(f, "logs"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// An artifact produced by a stage, keyed by the run that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageArtifact {
    /// The kind of artifact.
    #[serde(rename = "type")]
    pub kind: ArtifactKind,

    /// Artifact name, unique within a run (e.g. `deploy-check-logs-<run_id>`).
    pub name: String,

    /// The run that produced it.
    pub run_id: Uuid,

    /// The artifact content.
    pub content: String,

    /// When the artifact was created (ISO 8601).
    pub created_at: String,
}

impl StageArtifact {
    /// Creates a new artifact named `<prefix>-<run_id>`.
    #[must_use]
    pub fn new(kind: ArtifactKind, prefix: &str, run_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            kind,
            name: format!("{prefix}-{run_id}"),
            run_id,
            content: content.into(),
            created_at: crate::utils::iso_timestamp(),
        }
    }

    /// Creates a logs artifact.
    #[must_use]
    pub fn logs(prefix: &str, run_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(ArtifactKind::Logs, prefix, run_id, content)
    }

    /// Creates a report artifact.
    #[must_use]
    pub fn report(prefix: &str, run_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(ArtifactKind::Report, prefix, run_id, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_name_keyed_by_run() {
        let run_id = Uuid::new_v4();
        let artifact = StageArtifact::logs("deploy-check-logs", run_id, "container up");

        assert_eq!(artifact.kind, ArtifactKind::Logs);
        assert_eq!(artifact.name, format!("deploy-check-logs-{run_id}"));
        assert_eq!(artifact.run_id, run_id);
        assert_eq!(artifact.content, "container up");
    }

    #[test]
    fn test_artifact_serializes_kind_as_type() {
        let artifact = StageArtifact::report("extended-test-report", Uuid::nil(), "ok");
        let json = serde_json::to_value(&artifact).unwrap();

        assert_eq!(json["type"], "report");
        assert_eq!(
            json["name"],
            "extended-test-report-00000000-0000-0000-0000-000000000000"
        );
    }
}
