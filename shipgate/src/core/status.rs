//! Stage names and lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The five logical stages of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Builds and publishes the primary artifact.
    Build,
    /// Brings the artifact up against its dependency and smoke-checks it.
    DeployCheck,
    /// Runs the extended test suite on ephemeral infrastructure.
    ExtendedTest,
    /// Re-tags / promotes the validated artifact.
    Finalize,
    /// Reports a failed run to the notification channel.
    Notify,
}

impl StageName {
    /// All stages in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Build,
        Self::DeployCheck,
        Self::ExtendedTest,
        Self::Finalize,
        Self::Notify,
    ];

    /// Returns the stable string form used in events and reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::DeployCheck => "deploy_check",
            Self::ExtendedTest => "extended_test",
            Self::Finalize => "finalize",
            Self::Notify => "notify",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lifecycle state of a stage instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Waiting for dependencies.
    Pending,
    /// Dependencies terminal and predicate true; about to run.
    Eligible,
    /// Collaborator invocation in flight.
    Running,
    /// Stage completed successfully.
    Success,
    /// Stage failed.
    Failure,
    /// Predicate evaluated false.
    Skipped,
    /// Stage was cancelled.
    Cancelled,
}

impl Default for StageState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Eligible => write!(f, "eligible"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true if the state counts as a failure when aggregating.
    ///
    /// Cancelled is a failure for aggregation, never a success.
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::Cancelled)
    }
}
