use super::{outcome_from_error, Stage};
use crate::context::RunContext;
use crate::core::{StageName, StageOutcome};
use async_trait::async_trait;
use tracing::info;

/// Promotes the validated artifact.
///
/// The only stage allowed to rename a registry tag. It first confirms no
/// newer run with the same key has been admitted; if one has, the
/// promotion is abandoned and the stage reports Cancelled.
#[derive(Debug, Default, Clone, Copy)]
pub struct FinalizeStage;

#[async_trait]
impl Stage for FinalizeStage {
    fn name(&self) -> StageName {
        StageName::Finalize
    }

    async fn execute(&self, ctx: &RunContext) -> StageOutcome {
        if !ctx.aggregator().no_active_sibling() {
            info!("newer sibling run active; not finalizing");
            return StageOutcome::cancelled("a newer run with the same key is active");
        }

        let run = ctx.run();
        let primary = run.tags.primary_tag();
        let resolved_ref = run.trigger.resolved_ref();

        match ctx
            .invoke(
                "finalize_artifact",
                ctx.collaborators().finalize_artifact(primary, resolved_ref),
            )
            .await
        {
            Ok(()) => StageOutcome::success()
                .add_metadata("promoted", serde_json::json!(primary))
                .add_metadata("resolved_ref", serde_json::json!(resolved_ref)),
            Err(e) => outcome_from_error("finalize_artifact", &e),
        }
    }
}
