//! Full runs against scripted collaborators.

use super::*;
use crate::aggregator::AggregateResult;
use crate::config::OrchestratorConfig;
use crate::core::{StageName, StageState};
use crate::errors::{CollaboratorError, ShipgateError};
use crate::events::{self, CollectingEventSink};
use crate::testing::{fixtures, MockCollaborators, StaticCommitResolver};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use StageState::{Cancelled, Failure, Skipped, Success};

const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

fn orchestrator(mock: &Arc<MockCollaborators>) -> Orchestrator {
    Orchestrator::new(
        OrchestratorConfig::default().with_cancel_grace(1.0),
        mock.clone(),
        Arc::new(StaticCommitResolver::new().with_commit("abc1234", "abc1234ffffeeee")),
    )
    .unwrap()
}

fn states(report: &RunReport) -> Vec<(StageName, StageState)> {
    StageName::ALL.iter().map(|s| (*s, report.state(*s))).collect()
}

#[tokio::test]
async fn feature_branch_push_builds_checks_and_finalizes() {
    let mock = Arc::new(MockCollaborators::new());
    let report = orchestrator(&mock)
        .submit(fixtures::push_event("refs/heads/feature/login", SHA))
        .await
        .unwrap();

    assert_eq!(
        states(&report),
        vec![
            (StageName::Build, Success),
            (StageName::DeployCheck, Success),
            (StageName::ExtendedTest, Skipped),
            (StageName::Finalize, Success),
            (StageName::Notify, Skipped),
        ]
    );
    assert!(report.is_success());
    assert_eq!(report.tags.dependency_tag(), "latest");
    assert_eq!(report.tags.primary_tag(), SHA);
    assert_eq!(
        mock.calls_to("build_artifact")[0].args,
        vec!["latest", SHA, "feature/login"]
    );
    assert_eq!(
        mock.registry().promotions(),
        vec![(SHA.to_string(), "refs/heads/feature/login".to_string())]
    );
    let logs = report.artifact("deploy-check-logs").unwrap();
    assert_eq!(logs.name, format!("deploy-check-logs-{}", report.run_id));
}

#[tokio::test]
async fn build_failure_skips_downstream_and_notifies_on_mainline() {
    let mock = Arc::new(
        MockCollaborators::new()
            .fail_on("build_artifact", CollaboratorError::Other("compile error".into())),
    );
    let orchestrator = orchestrator(&mock);
    let report = orchestrator
        .submit(fixtures::push_event("refs/heads/develop", SHA))
        .await
        .unwrap();

    assert_eq!(
        states(&report),
        vec![
            (StageName::Build, Failure),
            (StageName::DeployCheck, Skipped),
            (StageName::ExtendedTest, Skipped),
            (StageName::Finalize, Skipped),
            (StageName::Notify, Success),
        ]
    );
    assert_eq!(report.result, AggregateResult::Failure);
    assert_eq!(mock.call_count("publish_artifact"), 0);
    assert_eq!(mock.call_count("deploy_check"), 0);
    assert_eq!(
        mock.calls_to("notify")[0].args,
        vec![
            "#ci-failures".to_string(),
            orchestrator.config().build_url(&report.run_id)
        ]
    );
}

#[tokio::test]
async fn failure_on_feature_branch_is_not_notified() {
    let mock = Arc::new(
        MockCollaborators::new()
            .fail_on("deploy_check", CollaboratorError::Other("unhealthy".into())),
    );
    let report = orchestrator(&mock)
        .submit(fixtures::push_event("refs/heads/feature/x", SHA))
        .await
        .unwrap();

    assert_eq!(report.state(StageName::DeployCheck), Failure);
    assert_eq!(report.state(StageName::Notify), Skipped);
    assert_eq!(mock.call_count("notify"), 0);
}

#[tokio::test]
async fn release_track_branch_runs_extended_tests_but_never_finalizes() {
    let mock = Arc::new(MockCollaborators::new());
    let report = orchestrator(&mock)
        .submit(fixtures::push_event("refs/heads/v12.3.x", SHA))
        .await
        .unwrap();

    assert_eq!(report.state(StageName::ExtendedTest), Success);
    assert_eq!(report.state(StageName::Finalize), Skipped);
    assert!(report.is_success());
    assert_eq!(mock.call_count("finalize_artifact"), 0);
    assert!(report.artifact("extended-test-report").is_some());
}

#[tokio::test]
async fn tag_push_runs_full_suite_and_finalizes_with_tag_ref() {
    let mock = Arc::new(MockCollaborators::new());
    let report = orchestrator(&mock)
        .submit(fixtures::push_event("refs/tags/v1.2.3", SHA))
        .await
        .unwrap();

    assert_eq!(report.trigger.kind, crate::trigger::TriggerKind::TagPush);
    assert_eq!(report.state(StageName::ExtendedTest), Success);
    assert_eq!(
        mock.calls_to("finalize_artifact")[0].args,
        vec![SHA, "refs/tags/v1.2.3"]
    );
    assert_eq!(mock.calls_to("build_artifact")[0].args[2], "v1.2.3");
}

#[tokio::test]
async fn labelled_pull_request_runs_extended_tests_unless_draft() {
    let mock = Arc::new(MockCollaborators::new());
    let orchestrator = orchestrator(&mock);

    let ready = orchestrator
        .submit(fixtures::pull_request_event("feature/pr", SHA, &["FullTestSuite"], false))
        .await
        .unwrap();
    assert_eq!(ready.state(StageName::ExtendedTest), Success);
    assert_eq!(mock.calls_to("build_artifact")[0].args[2], "feature/pr");

    let draft = orchestrator
        .submit(fixtures::pull_request_event("feature/pr", SHA, &["FullTestSuite"], true))
        .await
        .unwrap();
    assert_eq!(draft.state(StageName::ExtendedTest), Skipped);
}

#[tokio::test]
async fn manual_dispatch_with_override_commit_derives_composite_tag() {
    let mock = Arc::new(MockCollaborators::new());
    let report = orchestrator(&mock)
        .submit(fixtures::dispatch_event(
            "refs/heads/develop",
            SHA,
            Some("abc1234"),
            Some("feature/y"),
            false,
        ))
        .await
        .unwrap();

    assert_eq!(report.tags.dependency_tag(), "abc1234");
    assert_eq!(report.tags.primary_tag(), format!("{SHA}-abc1234"));
    assert_eq!(
        mock.calls_to("build_artifact")[0].args,
        vec!["abc1234".to_string(), format!("{SHA}-abc1234"), "feature/y".to_string()]
    );
    assert_eq!(
        mock.calls_to("finalize_artifact")[0].args[1],
        "feature/y"
    );
}

#[tokio::test]
async fn manual_dispatch_from_tag_branch_does_not_finalize() {
    let mock = Arc::new(MockCollaborators::new());
    let report = orchestrator(&mock)
        .submit(fixtures::dispatch_event(
            "refs/heads/develop",
            SHA,
            None,
            Some("refs/tags/v2.0.0"),
            false,
        ))
        .await
        .unwrap();

    assert_eq!(report.state(StageName::Finalize), Skipped);
    assert_eq!(mock.call_count("finalize_artifact"), 0);
}

#[tokio::test]
async fn unresolvable_override_commit_aborts_before_build() {
    let mock = Arc::new(MockCollaborators::new());
    let orchestrator = orchestrator(&mock);

    let err = orchestrator
        .submit(fixtures::dispatch_event(
            "refs/heads/develop",
            SHA,
            Some("nope999"),
            None,
            false,
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, ShipgateError::UnresolvableCommit { ref commit, .. } if commit == "nope999"));
    assert!(err.is_input_error());
    assert!(mock.calls().is_empty());
    assert_eq!(orchestrator.gatekeeper().active_count(), 0);
}

#[tokio::test]
async fn malformed_payload_is_an_input_error() {
    let mock = Arc::new(MockCollaborators::new());
    let err = orchestrator(&mock)
        .submit_json(r#"{"event_name": "push", "sha": "abc"}"#)
        .await
        .unwrap_err();

    assert!(matches!(err, ShipgateError::InvalidTrigger(_)));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn newer_run_supersedes_older_run_with_same_key() {
    let mock = Arc::new(
        MockCollaborators::new()
            .with_delay("deploy_check", Duration::from_millis(200))
            .with_delay("run_extended_tests", Duration::from_millis(200)),
    );
    let sink = Arc::new(CollectingEventSink::new());
    let orchestrator = Arc::new(orchestrator(&mock).with_event_sink(sink.clone()));

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .submit(fixtures::push_event("refs/heads/develop", SHA))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = orchestrator
        .submit(fixtures::push_event("refs/heads/develop", SHA))
        .await
        .unwrap();
    let first = first.await.unwrap().unwrap();

    assert!(first.superseded);
    assert_eq!(first.result, AggregateResult::Failure);
    assert_eq!(first.state(StageName::Build), Success);
    assert_eq!(first.state(StageName::DeployCheck), Cancelled);
    assert_eq!(first.state(StageName::ExtendedTest), Cancelled);
    assert_eq!(first.state(StageName::Finalize), Cancelled);
    assert_eq!(first.state(StageName::Notify), Cancelled);
    assert!(first.finished_at <= second.finished_at);

    assert!(!second.superseded);
    assert!(second.is_success());
    assert_eq!(second.state(StageName::Finalize), Success);

    // Only the surviving run promotes; both runs tore down.
    assert_eq!(mock.call_count("finalize_artifact"), 1);
    assert_eq!(mock.call_count("destroy_test_environment"), 2);
    assert_eq!(mock.call_count("stop_environment"), 2);
    assert_eq!(mock.call_count("notify"), 0);
    assert_eq!(sink.events_of_type(events::RUN_SUPERSEDED).len(), 1);
    assert_eq!(orchestrator.gatekeeper().active_count(), 0);
    assert!(matches!(first.into_result(), Err(ShipgateError::Cancelled(_))));
}

#[tokio::test]
async fn superseded_run_finishes_teardown_started_before_abort() {
    let mock = Arc::new(
        MockCollaborators::new()
            .with_delay("run_extended_tests", Duration::from_secs(30))
            .with_delay("destroy_test_environment", Duration::from_millis(300)),
    );
    let mut config = OrchestratorConfig::default().with_cancel_grace(0.1);
    config.teardown_timeout_seconds = 5.0;
    let orchestrator = Arc::new(
        Orchestrator::new(config, mock.clone(), Arc::new(StaticCommitResolver::new())).unwrap(),
    );

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .submit(fixtures::push_event("refs/heads/develop", SHA))
                .await
        })
    };
    while mock.call_count("run_extended_tests") == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let second = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .submit(fixtures::push_event("refs/heads/develop", SHA))
                .await
        })
    };

    let first = first.await.unwrap().unwrap();

    assert!(first.superseded);
    assert_eq!(first.state(StageName::ExtendedTest), Cancelled);
    assert_eq!(mock.call_count("destroy_test_environment"), 1);
    assert_eq!(mock.completed_count("destroy_test_environment"), 1);

    second.abort();
}

#[tokio::test]
async fn runs_with_different_keys_do_not_interfere() {
    let mock = Arc::new(
        MockCollaborators::new().with_delay("deploy_check", Duration::from_millis(50)),
    );
    let orchestrator = orchestrator(&mock);

    let (a, b) = tokio::join!(
        orchestrator.submit(fixtures::push_event("refs/heads/feature/a", SHA)),
        orchestrator.submit(fixtures::push_event("refs/heads/feature/b", SHA)),
    );

    assert!(!a.unwrap().superseded);
    assert!(!b.unwrap().superseded);
    assert_eq!(mock.call_count("finalize_artifact"), 2);
}

#[tokio::test]
async fn teardown_runs_when_extended_tests_fail() {
    let mock = Arc::new(MockCollaborators::new().fail_on(
        "run_extended_tests",
        CollaboratorError::NonZeroExit {
            verb: "run_extended_tests".to_string(),
            code: 1,
            stderr: "2 failed".to_string(),
        },
    ));
    let report = orchestrator(&mock)
        .submit(fixtures::push_event("refs/heads/master", SHA))
        .await
        .unwrap();

    assert_eq!(report.state(StageName::ExtendedTest), Failure);
    assert_eq!(report.state(StageName::Finalize), Skipped);
    assert_eq!(report.state(StageName::Notify), Success);
    assert_eq!(mock.call_count("destroy_test_environment"), 1);
    assert_eq!(report.artifact("extended-test-report").unwrap().content, "2 failed");
}

#[tokio::test]
async fn notify_failure_is_swallowed() {
    let mock = Arc::new(
        MockCollaborators::new()
            .fail_on("build_artifact", CollaboratorError::Other("compile error".into()))
            .fail_on("notify", CollaboratorError::Other("webhook down".into())),
    );
    let sink = Arc::new(CollectingEventSink::new());
    let report = orchestrator(&mock)
        .with_event_sink(sink.clone())
        .submit(fixtures::push_event("refs/heads/master", SHA))
        .await
        .unwrap();

    assert_eq!(report.state(StageName::Notify), Success);
    assert_eq!(report.result, AggregateResult::Failure);
    assert_eq!(sink.events_of_type(events::NOTIFY_FAILED).len(), 1);
}

#[tokio::test]
async fn publishing_the_same_tag_twice_is_idempotent() {
    let mock = Arc::new(MockCollaborators::new());
    let orchestrator = orchestrator(&mock);

    for _ in 0..2 {
        orchestrator
            .submit(fixtures::push_event("refs/heads/feature/x", SHA))
            .await
            .unwrap();
    }

    assert_eq!(mock.registry().publish_count(SHA), 2);
    assert_eq!(mock.registry().tags(), vec![SHA.to_string()]);
}

#[tokio::test]
async fn lifecycle_events_bracket_the_run() {
    let mock = Arc::new(MockCollaborators::new());
    let sink = Arc::new(CollectingEventSink::new());
    let report = orchestrator(&mock)
        .with_event_sink(sink.clone())
        .submit(fixtures::push_event("refs/heads/feature/x", SHA))
        .await
        .unwrap();

    let types = sink.event_types();
    assert_eq!(types.first().map(String::as_str), Some(events::RUN_ADMITTED));
    assert_eq!(types.last().map(String::as_str), Some(events::RUN_COMPLETED));

    let (_, summary) = sink.events_of_type(events::RUN_COMPLETED).remove(0);
    assert_eq!(summary["run_id"], report.run_id.to_string());
    assert_eq!(summary["stages"]["extended_test"], "skipped");
    assert_eq!(summary["result"], "success");
}
