//! Ports to the external collaborators the orchestrator drives.
//!
//! The orchestrator only decides whether and with what parameters to
//! invoke these; building, testing, provisioning, registry pushes and
//! notification delivery all happen behind them.

mod command;

pub use command::{CommandCollaborator, GitCommitResolver};

use crate::cancellation::CancellationToken;
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// How a run asks its in-flight invocations to stop.
///
/// Once `token` is cancelled, an invocation should ask its external work
/// to terminate and give it up to `grace` before forcing it.
#[derive(Debug, Clone)]
pub struct StopSignal {
    /// The run's cancellation token.
    pub token: Arc<CancellationToken>,
    /// How long terminated work may take to exit.
    pub grace: Duration,
}

/// Command interface exposed to collaborators, one verb per method.
#[async_trait]
pub trait Collaborators: Send + Sync + Debug {
    /// Returns a handle whose invocations observe `stop`.
    ///
    /// Implementations with nothing to terminate may return `self`.
    fn bind(self: Arc<Self>, stop: StopSignal) -> Arc<dyn Collaborators>;

    /// Builds and stores the artifact. Not idempotent.
    async fn build_artifact(
        &self,
        dependency_tag: &str,
        primary_tag: &str,
        source_branch: &str,
    ) -> Result<(), CollaboratorError>;

    /// Pushes the artifact to the registry. Idempotent per tag.
    async fn publish_artifact(&self, primary_tag: &str) -> Result<(), CollaboratorError>;

    /// Provisions an ephemeral test environment for a run.
    async fn provision_test_environment(
        &self,
        run_id: &str,
        primary_tag: &str,
        dependency_tag: &str,
    ) -> Result<(), CollaboratorError>;

    /// Runs the extended test suite; returns the report on success.
    async fn run_extended_tests(&self, run_id: &str) -> Result<String, CollaboratorError>;

    /// Tears down the environment created by `provision_test_environment`.
    async fn destroy_test_environment(&self, run_id: &str) -> Result<(), CollaboratorError>;

    /// Starts the artifact against its dependency and checks it comes up.
    async fn deploy_check(
        &self,
        primary_tag: &str,
        dependency_tag: &str,
        source_branch: &str,
    ) -> Result<(), CollaboratorError>;

    /// Collects logs from the deploy-check environment.
    async fn collect_logs(&self) -> Result<String, CollaboratorError>;

    /// Stops the deploy-check environment.
    async fn stop_environment(&self) -> Result<(), CollaboratorError>;

    /// Re-tags / promotes the artifact.
    async fn finalize_artifact(
        &self,
        primary_tag: &str,
        resolved_ref: &str,
    ) -> Result<(), CollaboratorError>;

    /// Sends a failure notification. Fire-and-forget.
    async fn notify(&self, channel: &str, build_url: &str) -> Result<(), CollaboratorError>;
}

/// Version-control lookup used to resolve override commits.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommitResolver: Send + Sync {
    /// Resolves a revision to its full commit hash.
    ///
    /// Returns [`CollaboratorError::CommitNotFound`] if no such commit exists.
    async fn resolve_commit(&self, rev: &str) -> Result<String, CollaboratorError>;
}
