//! Per-stage run predicates.
//!
//! Each predicate is a pure function of a [`PredicateInputs`] snapshot,
//! evaluated only after every dependency of the stage is terminal.

use crate::aggregator::{aggregate, AggregateResult};
use crate::config::OrchestratorConfig;
use crate::core::{StageName, StageState};
use crate::trigger::{BranchClassification, TriggerContext};
use std::collections::BTreeMap;

/// Configurable parts of the gating rules.
#[derive(Debug, Clone, Copy)]
pub struct GateSettings<'a> {
    /// Label that opts a pull request into the extended suite.
    pub full_test_label: &'a str,
    /// Mainline branch names.
    pub mainline_branches: &'a [String],
}

impl<'a> GateSettings<'a> {
    /// Borrows the gating settings from a configuration.
    #[must_use]
    pub fn from_config(config: &'a OrchestratorConfig) -> Self {
        Self {
            full_test_label: &config.full_test_label,
            mainline_branches: &config.mainline_branches,
        }
    }
}

/// Everything a predicate may look at.
#[derive(Debug, Clone)]
pub struct PredicateInputs<'a> {
    /// The normalized trigger.
    pub trigger: &'a TriggerContext,
    /// The cached ref classification.
    pub classification: BranchClassification,
    /// States of all stages at evaluation time.
    pub upstream: BTreeMap<StageName, StageState>,
    /// Gating settings.
    pub settings: GateSettings<'a>,
}

impl PredicateInputs<'_> {
    /// State of a stage in the snapshot (Pending if unknown).
    #[must_use]
    pub fn state(&self, stage: StageName) -> StageState {
        self.upstream.get(&stage).copied().unwrap_or_default()
    }

    /// The ref is a mainline branch.
    #[must_use]
    pub fn is_mainline(&self) -> bool {
        self.trigger.is_mainline(self.settings.mainline_branches)
    }

    /// Release-track branch with no explicit dependency commit.
    #[must_use]
    pub fn is_plain_release_track(&self) -> bool {
        self.classification.is_release_track && self.trigger.override_commit.is_none()
    }

    /// Aggregate over every stage in the snapshot except `exclude`.
    #[must_use]
    pub fn aggregate_excluding(&self, exclude: StageName) -> AggregateResult {
        aggregate(
            self.upstream
                .iter()
                .filter(|(name, _)| **name != exclude)
                .map(|(_, state)| state),
        )
    }
}

/// Outcome of evaluating a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Run the stage.
    Run,
    /// Skip the stage, with a reason.
    Skip(String),
}

impl Decision {
    fn skip_unless(cond: bool, reason: &str) -> Self {
        if cond {
            Self::Run
        } else {
            Self::Skip(reason.to_string())
        }
    }

    /// Returns true for [`Decision::Run`].
    #[must_use]
    pub fn is_run(&self) -> bool {
        matches!(self, Self::Run)
    }
}

/// Signature of a stage predicate.
pub type Predicate = fn(&PredicateInputs<'_>) -> Decision;

/// Build has no gate.
#[must_use]
pub fn build(_inputs: &PredicateInputs<'_>) -> Decision {
    Decision::Run
}

/// Deploy-Check runs whenever Build succeeded.
#[must_use]
pub fn deploy_check(inputs: &PredicateInputs<'_>) -> Decision {
    Decision::skip_unless(
        inputs.state(StageName::Build) == StageState::Success,
        "build did not succeed",
    )
}

/// Whether the trigger asks for the extended suite, ignoring upstream state.
#[must_use]
pub fn wants_extended_tests(inputs: &PredicateInputs<'_>) -> bool {
    let trigger = inputs.trigger;
    (trigger.has_label(inputs.settings.full_test_label) && !trigger.is_draft)
        || inputs.is_mainline()
        || inputs.classification.is_tag_push
        || inputs.is_plain_release_track()
        || trigger.force_full_test
}

/// Extended-Test runs after a successful Build when the trigger asks for it.
#[must_use]
pub fn extended_test(inputs: &PredicateInputs<'_>) -> Decision {
    if inputs.state(StageName::Build) != StageState::Success {
        return Decision::Skip("build did not succeed".to_string());
    }
    Decision::skip_unless(
        wants_extended_tests(inputs),
        "extended tests not requested for this trigger",
    )
}

/// Finalize promotes only validated, non-final artifacts.
///
/// Release-track branches and tag-sourced override branches are already
/// final and never re-tagged. An unset override branch is not a tag ref.
#[must_use]
pub fn finalize(inputs: &PredicateInputs<'_>) -> Decision {
    if inputs.state(StageName::DeployCheck) != StageState::Success {
        return Decision::Skip("deploy check did not succeed".to_string());
    }
    if !matches!(
        inputs.state(StageName::ExtendedTest),
        StageState::Success | StageState::Skipped
    ) {
        return Decision::Skip("extended tests did not pass".to_string());
    }
    if inputs.trigger.override_branch_is_tag() {
        return Decision::Skip("override branch is a tag".to_string());
    }
    Decision::skip_unless(
        !inputs.classification.is_release_track,
        "release-track artifacts are not re-tagged",
    )
}

/// Notify fires on aggregate failure for mainline, release or tag runs.
#[must_use]
pub fn notify(inputs: &PredicateInputs<'_>) -> Decision {
    if inputs.aggregate_excluding(StageName::Notify) != AggregateResult::Failure {
        return Decision::Skip("run did not fail".to_string());
    }
    Decision::skip_unless(
        inputs.is_mainline() || inputs.is_plain_release_track() || inputs.classification.is_tag_push,
        "failures on this ref are not notified",
    )
}

/// Returns the predicate for a stage.
#[must_use]
pub fn for_stage(stage: StageName) -> Predicate {
    match stage {
        StageName::Build => build,
        StageName::DeployCheck => deploy_check,
        StageName::ExtendedTest => extended_test,
        StageName::Finalize => finalize,
        StageName::Notify => notify,
    }
}
