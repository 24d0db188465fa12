use super::{outcome_from_error, Stage};
use crate::context::RunContext;
use crate::core::{StageArtifact, StageName, StageOutcome};
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Artifact name prefix for the extended test report.
pub const EXTENDED_TEST_REPORT_PREFIX: &str = "extended-test-report";

const TEST_ENVIRONMENT_CLEANUP: &str = "test-environment";

/// Provisions an ephemeral environment, runs the extended suite in it and
/// tears it down.
///
/// Teardown runs whenever provisioning succeeded or was interrupted. It
/// runs on its own task, so aborting the stage cannot cut it short, and the
/// run's cleanup registry picks it up if the stage never got that far.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtendedTestStage;

#[async_trait]
impl Stage for ExtendedTestStage {
    fn name(&self) -> StageName {
        StageName::ExtendedTest
    }

    async fn execute(&self, ctx: &RunContext) -> StageOutcome {
        let run = ctx.run();
        let run_id = run.run_id();
        let env_id = run_id.to_string();
        let tags = &run.tags;
        let collaborators = ctx.collaborators();

        // Registered before provisioning so an abort mid-provision still
        // destroys whatever was created.
        let cleanup_name = format!("{TEST_ENVIRONMENT_CLEANUP}:{run_id}");
        let destroyer = Arc::clone(collaborators);
        let destroy_id = env_id.clone();
        ctx.cleanup().register(cleanup_name.clone(), move || async move {
            match destroyer.destroy_test_environment(&destroy_id).await {
                Ok(()) => info!(environment = %destroy_id, "destroyed test environment"),
                Err(e) => {
                    warn!(environment = %destroy_id, error = %e, "failed to destroy test environment");
                }
            }
        });

        if let Err(e) = ctx
            .invoke(
                "provision_test_environment",
                collaborators.provision_test_environment(
                    &env_id,
                    tags.primary_tag(),
                    tags.dependency_tag(),
                ),
            )
            .await
        {
            if e.is_cancelled() {
                ctx.cleanup().run_now(&cleanup_name).await;
            } else {
                drop(ctx.cleanup().take(&cleanup_name));
            }
            return outcome_from_error("provision_test_environment", &e);
        }

        let tested = ctx
            .invoke("run_extended_tests", collaborators.run_extended_tests(&env_id))
            .await;

        ctx.cleanup().run_now(&cleanup_name).await;

        match tested {
            Ok(report) => StageOutcome::success()
                .with_artifact(StageArtifact::report(EXTENDED_TEST_REPORT_PREFIX, run_id, report)),
            Err(e) => {
                let outcome = outcome_from_error("run_extended_tests", &e);
                match e {
                    CollaboratorError::NonZeroExit { stderr, .. } => outcome.with_artifact(
                        StageArtifact::report(EXTENDED_TEST_REPORT_PREFIX, run_id, stderr),
                    ),
                    _ => outcome,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageState;
    use crate::testing::{fixtures, MockCollaborators};
    use crate::trigger::TriggerContext;
    use std::time::Duration;

    fn trigger() -> TriggerContext {
        TriggerContext::push("refs/heads/master", "deadbeef")
    }

    #[tokio::test]
    async fn test_extended_test_success_tears_down() {
        let mock = Arc::new(MockCollaborators::new().with_report("42 passed"));
        let ctx = fixtures::run_context(trigger(), mock.clone());

        let outcome = ExtendedTestStage.execute(&ctx).await;

        assert_eq!(outcome.state, StageState::Success);
        assert_eq!(
            mock.verbs(),
            vec![
                "provision_test_environment",
                "run_extended_tests",
                "destroy_test_environment"
            ]
        );
        let run_id = ctx.run().run_id().to_string();
        assert_eq!(mock.calls_to("destroy_test_environment")[0].args, vec![run_id.clone()]);
        assert_eq!(outcome.artifacts[0].name, format!("extended-test-report-{run_id}"));
        assert_eq!(outcome.artifacts[0].content, "42 passed");
    }

    #[tokio::test]
    async fn test_extended_test_failure_still_tears_down() {
        let mock = Arc::new(MockCollaborators::new().fail_on(
            "run_extended_tests",
            CollaboratorError::NonZeroExit {
                verb: "run_extended_tests".to_string(),
                code: 1,
                stderr: "3 failed".to_string(),
            },
        ));
        let ctx = fixtures::run_context(trigger(), mock.clone());

        let outcome = ExtendedTestStage.execute(&ctx).await;

        assert_eq!(outcome.state, StageState::Failure);
        assert_eq!(mock.call_count("destroy_test_environment"), 1);
        assert_eq!(outcome.artifacts[0].content, "3 failed");
        assert_eq!(ctx.cleanup().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_provision_failure_skips_tests_and_teardown() {
        let mock = Arc::new(MockCollaborators::new().fail_on(
            "provision_test_environment",
            CollaboratorError::Other("quota exceeded".to_string()),
        ));
        let ctx = fixtures::run_context(trigger(), mock.clone());

        let outcome = ExtendedTestStage.execute(&ctx).await;

        assert_eq!(outcome.state, StageState::Failure);
        assert_eq!(mock.verbs(), vec!["provision_test_environment"]);
        assert_eq!(ctx.cleanup().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_during_provisioning_tears_down() {
        let mock = Arc::new(
            MockCollaborators::new()
                .with_delay("provision_test_environment", Duration::from_secs(30)),
        );
        let ctx = Arc::new(fixtures::run_context(trigger(), mock.clone()));

        let runner = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ExtendedTestStage.execute(&ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.token().cancel("superseded");

        let outcome = runner.await.unwrap();

        assert_eq!(outcome.state, StageState::Cancelled);
        assert_eq!(mock.call_count("run_extended_tests"), 0);
        assert_eq!(mock.completed_count("destroy_test_environment"), 1);
    }

    #[tokio::test]
    async fn test_abort_mid_provisioning_leaves_teardown_for_the_run() {
        let mock = Arc::new(
            MockCollaborators::new()
                .with_delay("provision_test_environment", Duration::from_secs(30)),
        );
        let ctx = Arc::new(fixtures::run_context(trigger(), mock.clone()));

        let runner = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ExtendedTestStage.execute(&ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.abort();
        assert!(runner.await.unwrap_err().is_cancelled());

        assert_eq!(ctx.cleanup().pending_count(), 1);
        ctx.cleanup().run_all(Duration::from_secs(1)).await;
        assert_eq!(mock.completed_count("destroy_test_environment"), 1);
    }

    #[tokio::test]
    async fn test_abort_during_teardown_does_not_interrupt_it() {
        let mock = Arc::new(
            MockCollaborators::new()
                .with_delay("destroy_test_environment", Duration::from_millis(300)),
        );
        let ctx = Arc::new(fixtures::run_context(trigger(), mock.clone()));

        let runner = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ExtendedTestStage.execute(&ctx).await })
        };
        while mock.call_count("destroy_test_environment") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        runner.abort();
        assert!(runner.await.unwrap_err().is_cancelled());
        assert_eq!(mock.completed_count("destroy_test_environment"), 0);

        let (completed, failed) = ctx.cleanup().run_all(Duration::from_secs(2)).await;

        assert!(failed.is_empty());
        assert_eq!(completed.len(), 1);
        assert_eq!(mock.call_count("destroy_test_environment"), 1);
        assert_eq!(mock.completed_count("destroy_test_environment"), 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_tests_still_tears_down() {
        let mock = Arc::new(
            MockCollaborators::new().with_delay("run_extended_tests", Duration::from_secs(30)),
        );
        let ctx = Arc::new(fixtures::run_context(trigger(), mock.clone()));

        let runner = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ExtendedTestStage.execute(&ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.token().cancel("superseded");

        let outcome = runner.await.unwrap();

        assert_eq!(outcome.state, StageState::Cancelled);
        assert_eq!(mock.call_count("destroy_test_environment"), 1);
        assert_eq!(ctx.cleanup().in_flight_count(), 0);
    }
}
