use super::{outcome_from_error, Stage};
use crate::context::RunContext;
use crate::core::{StageName, StageOutcome};
use async_trait::async_trait;

/// Builds the artifact from the triggering commit against the dependency
/// tag, then publishes it.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuildStage;

#[async_trait]
impl Stage for BuildStage {
    fn name(&self) -> StageName {
        StageName::Build
    }

    async fn execute(&self, ctx: &RunContext) -> StageOutcome {
        let run = ctx.run();
        let tags = &run.tags;
        let branch = run.trigger.source_branch();
        let collaborators = ctx.collaborators();

        if let Err(e) = ctx
            .invoke(
                "build_artifact",
                collaborators.build_artifact(tags.dependency_tag(), tags.primary_tag(), branch),
            )
            .await
        {
            return outcome_from_error("build_artifact", &e);
        }

        if let Err(e) = ctx
            .invoke(
                "publish_artifact",
                collaborators.publish_artifact(tags.primary_tag()),
            )
            .await
        {
            return outcome_from_error("publish_artifact", &e);
        }

        StageOutcome::success()
            .add_metadata("primary_tag", serde_json::json!(tags.primary_tag()))
            .add_metadata("dependency_tag", serde_json::json!(tags.dependency_tag()))
    }
}
