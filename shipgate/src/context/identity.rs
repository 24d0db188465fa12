//! Run identity and the immutable per-run data.

use crate::gatekeeper::RunKey;
use crate::tags::ArtifactTagPair;
use crate::trigger::{BranchClassification, TriggerContext};
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Unique, time-ordered id of this run.
    pub run_id: Uuid,
    /// Single-flight key shared with sibling runs.
    pub key: RunKey,
    /// Workflow name the key was computed from.
    pub workflow: String,
    /// When the run was created.
    pub started_at: Timestamp,
}

impl RunIdentity {
    /// Creates an identity for a new run of `workflow` on `trigger`.
    #[must_use]
    pub fn new(workflow: impl Into<String>, trigger: &TriggerContext) -> Self {
        let workflow = workflow.into();
        Self {
            run_id: Uuid::now_v7(),
            key: RunKey::new(
                &workflow,
                &trigger.git_ref,
                trigger.override_commit.as_deref(),
            ),
            workflow,
            started_at: now_utc(),
        }
    }
}

/// Everything derived once for a run; stages read it, never mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identity.
    pub identity: RunIdentity,
    /// The normalized trigger.
    pub trigger: TriggerContext,
    /// Cached classification of the trigger ref.
    pub classification: BranchClassification,
    /// The tag pair every stage uses.
    pub tags: ArtifactTagPair,
}

impl PipelineRun {
    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.identity.run_id
    }
}
