//! Collection of stage outcomes and the run's aggregate result.

use crate::core::{StageArtifact, StageName, StageOutcome, StageState};
use crate::gatekeeper::HolderCheck;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The aggregate result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateResult {
    /// No stage failed or was cancelled.
    Success,
    /// At least one stage failed or was cancelled.
    Failure,
}

impl fmt::Display for AggregateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Aggregates a set of stage states: Failure if any failed or was cancelled.
#[must_use]
pub fn aggregate<'a>(states: impl IntoIterator<Item = &'a StageState>) -> AggregateResult {
    if states.into_iter().any(StageState::counts_as_failure) {
        AggregateResult::Failure
    } else {
        AggregateResult::Success
    }
}

/// Thread-safe record of every stage's state and terminal outcome.
#[derive(Debug, Default)]
pub struct OutcomeAggregator {
    states: RwLock<BTreeMap<StageName, StageState>>,
    outcomes: RwLock<BTreeMap<StageName, StageOutcome>>,
    holder: Option<HolderCheck>,
}

impl OutcomeAggregator {
    /// Creates an aggregator with every given stage Pending.
    #[must_use]
    pub fn new(stages: impl IntoIterator<Item = StageName>) -> Self {
        Self {
            states: RwLock::new(
                stages
                    .into_iter()
                    .map(|s| (s, StageState::Pending))
                    .collect(),
            ),
            outcomes: RwLock::new(BTreeMap::new()),
            holder: None,
        }
    }

    /// Attaches the probe used by [`OutcomeAggregator::no_active_sibling`].
    #[must_use]
    pub fn with_holder_check(mut self, holder: HolderCheck) -> Self {
        self.holder = Some(holder);
        self
    }

    /// Moves a stage to a non-terminal state.
    ///
    /// Ignored once the stage is terminal.
    pub fn set_state(&self, stage: StageName, state: StageState) {
        let mut states = self.states.write();
        let current = states.entry(stage).or_default();
        if !current.is_terminal() {
            *current = state;
        }
    }

    /// Records a terminal outcome. The first outcome recorded wins.
    ///
    /// Returns false if the stage already had one.
    pub fn record(&self, stage: StageName, outcome: StageOutcome) -> bool {
        let mut outcomes = self.outcomes.write();
        if outcomes.contains_key(&stage) {
            return false;
        }
        self.states.write().insert(stage, outcome.state);
        outcomes.insert(stage, outcome);
        true
    }

    /// Returns a stage's current state.
    #[must_use]
    pub fn state(&self, stage: StageName) -> StageState {
        self.states.read().get(&stage).copied().unwrap_or_default()
    }

    /// Returns a snapshot of every stage's state.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<StageName, StageState> {
        self.states.read().clone()
    }

    /// Returns the recorded terminal outcomes.
    #[must_use]
    pub fn outcomes(&self) -> BTreeMap<StageName, StageOutcome> {
        self.outcomes.read().clone()
    }

    /// Returns a recorded outcome.
    #[must_use]
    pub fn outcome(&self, stage: StageName) -> Option<StageOutcome> {
        self.outcomes.read().get(&stage).cloned()
    }

    /// Returns all artifacts produced so far, in stage order.
    #[must_use]
    pub fn artifacts(&self) -> Vec<StageArtifact> {
        self.outcomes
            .read()
            .values()
            .flat_map(|o| o.artifacts.iter().cloned())
            .collect()
    }

    /// Returns true once every tracked stage is terminal.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.states.read().values().all(StageState::is_terminal)
    }

    /// Aggregate result over every tracked stage.
    #[must_use]
    pub fn result(&self) -> AggregateResult {
        aggregate(self.states.read().values())
    }

    /// Returns true if no newer run with the same key has been admitted.
    ///
    /// Without a holder probe the run is assumed to be alone.
    #[must_use]
    pub fn no_active_sibling(&self) -> bool {
        self.holder.as_ref().map_or(true, HolderCheck::is_current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatekeeper::{Gatekeeper, RunKey};
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_aggregate() {
        let ok = [StageState::Success, StageState::Skipped];
        let failed = [StageState::Success, StageState::Failure];
        let cancelled = [StageState::Skipped, StageState::Cancelled];

        assert_eq!(aggregate(&ok), AggregateResult::Success);
        assert_eq!(aggregate(&failed), AggregateResult::Failure);
        assert_eq!(aggregate(&cancelled), AggregateResult::Failure);
        assert_eq!(aggregate(std::iter::empty()), AggregateResult::Success);
    }

    #[test]
    fn test_record_first_wins() {
        let agg = OutcomeAggregator::new(StageName::ALL);
        assert!(agg.record(StageName::Build, StageOutcome::failure("boom")));
        assert!(!agg.record(StageName::Build, StageOutcome::success()));

        assert_eq!(agg.state(StageName::Build), StageState::Failure);
        assert_eq!(agg.result(), AggregateResult::Failure);
    }

    #[test]
    fn test_set_state_ignored_after_terminal() {
        let agg = OutcomeAggregator::new([StageName::Build]);
        agg.set_state(StageName::Build, StageState::Running);
        assert_eq!(agg.state(StageName::Build), StageState::Running);

        agg.record(StageName::Build, StageOutcome::success());
        agg.set_state(StageName::Build, StageState::Running);
        assert_eq!(agg.state(StageName::Build), StageState::Success);
    }

    #[test]
    fn test_all_terminal_and_artifacts() {
        let run_id = Uuid::new_v4();
        let agg = OutcomeAggregator::new([StageName::Build, StageName::DeployCheck]);
        assert!(!agg.all_terminal());

        agg.record(StageName::Build, StageOutcome::success());
        agg.record(
            StageName::DeployCheck,
            StageOutcome::success().with_artifact(StageArtifact::logs("logs", run_id, "up")),
        );

        assert!(agg.all_terminal());
        assert_eq!(agg.artifacts().len(), 1);
        assert_eq!(agg.result(), AggregateResult::Success);
    }

    #[tokio::test]
    async fn test_no_active_sibling_follows_gatekeeper() {
        let gatekeeper = Gatekeeper::new(Duration::from_millis(10));
        let key = RunKey::new("wf", "refs/heads/develop", None);
        let lease = gatekeeper.admit(key.clone(), Uuid::new_v4()).await;
        let agg = OutcomeAggregator::new(StageName::ALL).with_holder_check(lease.holder_check());

        assert!(agg.no_active_sibling());

        let _newer = gatekeeper.admit(key, Uuid::new_v4()).await;
        assert!(!agg.no_active_sibling());
    }

    #[test]
    fn test_no_probe_means_alone() {
        assert!(OutcomeAggregator::new(StageName::ALL).no_active_sibling());
    }
}
