use super::{outcome_from_error, Stage};
use crate::context::RunContext;
use crate::core::{StageArtifact, StageName, StageOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Artifact name prefix for collected deploy-check logs.
pub const DEPLOY_CHECK_LOGS_PREFIX: &str = "deploy-check-logs";

/// Cleanup name prefix for the deploy-check environment.
pub const STOP_ENVIRONMENT_CLEANUP: &str = "deploy-check-environment";

/// Starts the artifact against its dependency and verifies it comes up.
///
/// Logs are collected and the environment stopped whatever the check's
/// result. The stop is registered as a scoped cleanup first and runs
/// detached from the stage, so a forced abort neither skips nor interrupts
/// it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeployCheckStage;

#[async_trait]
impl Stage for DeployCheckStage {
    fn name(&self) -> StageName {
        StageName::DeployCheck
    }

    async fn execute(&self, ctx: &RunContext) -> StageOutcome {
        let run = ctx.run();
        let run_id = run.run_id();
        let tags = &run.tags;
        let collaborators = ctx.collaborators();

        let cleanup_name = format!("{STOP_ENVIRONMENT_CLEANUP}:{run_id}");
        let stopper = Arc::clone(collaborators);
        ctx.cleanup().register(cleanup_name.clone(), move || async move {
            if let Err(e) = stopper.stop_environment().await {
                warn!(error = %e, "failed to stop deploy-check environment");
            }
        });

        let checked = ctx
            .invoke(
                "deploy_check",
                collaborators.deploy_check(
                    tags.primary_tag(),
                    tags.dependency_tag(),
                    run.trigger.source_branch(),
                ),
            )
            .await;

        let logs = match collaborators.collect_logs().await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(error = %e, "failed to collect deploy-check logs");
                format!("log collection failed: {e}")
            }
        };
        let artifact = StageArtifact::logs(DEPLOY_CHECK_LOGS_PREFIX, run_id, logs);

        ctx.cleanup().run_now(&cleanup_name).await;

        match checked {
            Ok(()) => StageOutcome::success().with_artifact(artifact),
            Err(e) => outcome_from_error("deploy_check", &e).with_artifact(artifact),
        }
    }
}
