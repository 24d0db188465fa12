//! Assertions over stage outcomes.

use crate::aggregator::OutcomeAggregator;
use crate::core::{StageName, StageState};

/// Asserts that a stage ended in the expected state.
pub fn assert_stage_state(aggregator: &OutcomeAggregator, stage: StageName, expected: StageState) {
    let actual = aggregator.state(stage);
    assert_eq!(
        actual,
        expected,
        "Expected {stage} to be {expected:?}, got {actual:?} (reason: {:?}, error: {:?})",
        aggregator.outcome(stage).and_then(|o| o.reason),
        aggregator.outcome(stage).and_then(|o| o.error),
    );
}

/// Asserts the final state of several stages at once.
pub fn assert_stage_states(aggregator: &OutcomeAggregator, expected: &[(StageName, StageState)]) {
    for (stage, state) in expected {
        assert_stage_state(aggregator, *stage, *state);
    }
}

/// Asserts that every stage is terminal.
pub fn assert_all_terminal(aggregator: &OutcomeAggregator) {
    assert!(
        aggregator.all_terminal(),
        "Expected every stage to be terminal, got {:?}",
        aggregator.snapshot()
    );
}
