use super::Stage;
use crate::context::RunContext;
use crate::core::{StageName, StageOutcome};
use crate::events;
use async_trait::async_trait;
use tracing::{info, warn};

/// Sends the failure notification.
///
/// Fire-and-forget: a delivery failure is logged and reported as an
/// event, never as a stage failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyStage;

#[async_trait]
impl Stage for NotifyStage {
    fn name(&self) -> StageName {
        StageName::Notify
    }

    async fn execute(&self, ctx: &RunContext) -> StageOutcome {
        let config = ctx.config();
        let channel = config.notify_channel.as_str();
        let build_url = config.build_url(&ctx.run().run_id());

        match ctx
            .invoke("notify", ctx.collaborators().notify(channel, &build_url))
            .await
        {
            Ok(()) => {
                info!(channel, build_url = %build_url, "failure notification sent");
                StageOutcome::success().add_metadata("build_url", serde_json::json!(build_url))
            }
            Err(e) if e.is_cancelled() => StageOutcome::cancelled("notification interrupted"),
            Err(e) => {
                warn!(channel, error = %e, "failure notification not delivered");
                ctx.emit(
                    events::NOTIFY_FAILED,
                    serde_json::json!({ "channel": channel, "error": e.to_string() }),
                );
                StageOutcome::success()
                    .add_metadata("build_url", serde_json::json!(build_url))
                    .add_metadata("notify_error", serde_json::json!(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageState;
    use crate::errors::CollaboratorError;
    use crate::events::CollectingEventSink;
    use crate::testing::{fixtures, MockCollaborators};
    use crate::trigger::TriggerContext;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_notify_sends_build_url() {
        let mock = Arc::new(MockCollaborators::new());
        let ctx = fixtures::run_context(
            TriggerContext::push("refs/heads/develop", "deadbeef"),
            mock.clone(),
        );

        let outcome = NotifyStage.execute(&ctx).await;

        assert_eq!(outcome.state, StageState::Success);
        let expected_url = format!("https://ci.local/runs/{}", ctx.run().run_id());
        assert_eq!(
            mock.calls_to("notify")[0].args,
            vec!["#ci-failures".to_string(), expected_url]
        );
    }

    #[tokio::test]
    async fn test_notify_failure_is_swallowed() {
        let mock = Arc::new(
            MockCollaborators::new()
                .fail_on("notify", CollaboratorError::Other("webhook 500".to_string())),
        );
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = fixtures::run_context(
            TriggerContext::push("refs/heads/develop", "deadbeef"),
            mock.clone(),
        )
        .with_event_sink(sink.clone());

        let outcome = NotifyStage.execute(&ctx).await;

        assert_eq!(outcome.state, StageState::Success);
        assert!(outcome.metadata.contains_key("notify_error"));
        assert_eq!(sink.events_of_type(events::NOTIFY_FAILED).len(), 1);
    }
}
