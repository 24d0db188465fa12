//! Stage trait and the five pipeline stages.
//!
//! A stage only runs once its predicate admits it; it performs its
//! collaborator calls through the run context so cancellation reaches
//! them, and reports a terminal [`StageOutcome`].

mod build;
mod deploy_check;
mod extended_test;
mod finalize;
mod notify;

pub use build::BuildStage;
pub use deploy_check::{DeployCheckStage, DEPLOY_CHECK_LOGS_PREFIX, STOP_ENVIRONMENT_CLEANUP};
pub use extended_test::{ExtendedTestStage, EXTENDED_TEST_REPORT_PREFIX};
pub use finalize::FinalizeStage;
pub use notify::NotifyStage;

use crate::context::RunContext;
use crate::core::{StageName, StageOutcome};
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the stage this runner implements.
    fn name(&self) -> StageName;

    /// Executes the stage.
    ///
    /// Must return a terminal outcome. Collaborator failures are reported
    /// in the outcome, never raised.
    async fn execute(&self, ctx: &RunContext) -> StageOutcome;
}

/// Maps a collaborator error to a stage outcome.
///
/// Cancellation is reported as Cancelled, everything else as Failure.
pub(crate) fn outcome_from_error(verb: &str, err: &CollaboratorError) -> StageOutcome {
    if err.is_cancelled() {
        StageOutcome::cancelled(format!("{verb} interrupted by cancellation"))
    } else {
        StageOutcome::failure(format!("{verb} failed: {err}"))
    }
}
