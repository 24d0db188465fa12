//! Run report.

use crate::aggregator::AggregateResult;
use crate::context::RunContext;
use crate::core::{StageArtifact, StageName, StageOutcome, StageState};
use crate::errors::ShipgateError;
use crate::gatekeeper::RunKey;
use crate::tags::ArtifactTagPair;
use crate::trigger::{BranchClassification, TriggerContext};
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Everything known about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// The run's id.
    pub run_id: Uuid,
    /// The run's single-flight key.
    pub key: RunKey,
    /// Workflow name.
    pub workflow: String,
    /// The normalized trigger.
    pub trigger: TriggerContext,
    /// Ref classification.
    pub classification: BranchClassification,
    /// Derived artifact tags.
    pub tags: ArtifactTagPair,
    /// Terminal outcome of every stage.
    pub stages: BTreeMap<StageName, StageOutcome>,
    /// Artifacts from all stages, in stage order.
    pub artifacts: Vec<StageArtifact>,
    /// Aggregate result.
    pub result: AggregateResult,
    /// Whether a newer run with the same key superseded this one.
    pub superseded: bool,
    /// Cancellation reason, if cancelled.
    pub cancel_reason: Option<String>,
    /// When the run was created.
    pub started_at: Timestamp,
    /// When the run finished, teardown included.
    pub finished_at: Timestamp,
}

impl RunReport {
    /// Builds the report from a finished run context.
    #[must_use]
    pub fn from_context(ctx: &RunContext) -> Self {
        let run = ctx.run();
        let aggregator = ctx.aggregator();
        Self {
            run_id: run.run_id(),
            key: run.identity.key.clone(),
            workflow: run.identity.workflow.clone(),
            trigger: run.trigger.clone(),
            classification: run.classification,
            tags: run.tags.clone(),
            stages: aggregator.outcomes(),
            artifacts: aggregator.artifacts(),
            result: aggregator.result(),
            superseded: ctx.is_cancelled(),
            cancel_reason: ctx.token().reason(),
            started_at: run.identity.started_at,
            finished_at: now_utc(),
        }
    }

    /// Terminal state of a stage (Pending if it never resolved).
    #[must_use]
    pub fn state(&self, stage: StageName) -> StageState {
        self.stages.get(&stage).map(|o| o.state).unwrap_or_default()
    }

    /// A stage's outcome.
    #[must_use]
    pub fn outcome(&self, stage: StageName) -> Option<&StageOutcome> {
        self.stages.get(&stage)
    }

    /// Finds an artifact by name prefix (e.g. `deploy-check-logs`).
    #[must_use]
    pub fn artifact(&self, prefix: &str) -> Option<&StageArtifact> {
        self.artifacts.iter().find(|a| a.name.starts_with(prefix))
    }

    /// Returns true if the aggregate result is Success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result == AggregateResult::Success
    }

    /// Wall time in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Converts a superseded run into [`ShipgateError::Cancelled`].
    ///
    /// Failed runs are still `Ok`; inspect [`RunReport::result`].
    pub fn into_result(self) -> Result<Self, ShipgateError> {
        if self.superseded {
            return Err(ShipgateError::Cancelled(
                self.cancel_reason
                    .unwrap_or_else(|| "run superseded".to_string()),
            ));
        }
        Ok(self)
    }
}
