//! Event payloads and run fixtures.

use std::sync::Arc;

use crate::collaborators::Collaborators;
use crate::config::OrchestratorConfig;
use crate::context::{PipelineRun, RunContext, RunIdentity};
use crate::tags::{short_hash, ArtifactTagPair};
use crate::trigger::{
    classify, DispatchInputs, HeadRef, Label, PullRequestPayload, RawEvent, TriggerContext,
};

/// A `push` event.
#[must_use]
pub fn push_event(git_ref: &str, sha: &str) -> RawEvent {
    RawEvent {
        event_name: "push".to_string(),
        git_ref: Some(git_ref.to_string()),
        sha: Some(sha.to_string()),
        ..RawEvent::default()
    }
}

/// A `pull_request` event from `head_branch` carrying `labels`.
#[must_use]
pub fn pull_request_event(head_branch: &str, sha: &str, labels: &[&str], draft: bool) -> RawEvent {
    RawEvent {
        event_name: "pull_request".to_string(),
        git_ref: Some("refs/pull/7/merge".to_string()),
        sha: Some(sha.to_string()),
        pull_request: Some(PullRequestPayload {
            draft,
            labels: labels
                .iter()
                .map(|l| Label {
                    name: (*l).to_string(),
                })
                .collect(),
            head: Some(HeadRef {
                git_ref: head_branch.to_string(),
            }),
        }),
        ..RawEvent::default()
    }
}

/// A `workflow_dispatch` event with optional overrides.
#[must_use]
pub fn dispatch_event(
    git_ref: &str,
    sha: &str,
    commit: Option<&str>,
    branch: Option<&str>,
    force_full_test: bool,
) -> RawEvent {
    RawEvent {
        event_name: "workflow_dispatch".to_string(),
        git_ref: Some(git_ref.to_string()),
        sha: Some(sha.to_string()),
        inputs: Some(DispatchInputs {
            commit: commit.map(ToString::to_string),
            branch: branch.map(ToString::to_string),
            force_full_test: Some(serde_json::Value::Bool(force_full_test)),
        }),
        ..RawEvent::default()
    }
}

/// Run data for `trigger` with tags derived as if every commit resolved
/// to itself.
#[must_use]
pub fn pipeline_run(trigger: TriggerContext) -> PipelineRun {
    let config = OrchestratorConfig::default();
    let tags = match trigger.override_commit.as_deref() {
        Some(commit) => ArtifactTagPair::new(
            commit,
            format!("{}-{}", trigger.commit_sha, short_hash(commit)),
        ),
        None => ArtifactTagPair::new(
            config.default_dependency_tag.clone(),
            trigger.commit_sha.clone(),
        ),
    };
    PipelineRun {
        identity: RunIdentity::new(config.workflow_name, &trigger),
        classification: classify(&trigger.git_ref),
        trigger,
        tags,
    }
}

/// Cancellation grace used by [`run_context`].
pub const TEST_CANCEL_GRACE_SECONDS: f64 = 0.1;

/// A run context with default configuration and a short cancellation grace.
#[must_use]
pub fn run_context(trigger: TriggerContext, collaborators: Arc<dyn Collaborators>) -> RunContext {
    RunContext::new(
        pipeline_run(trigger),
        Arc::new(OrchestratorConfig::default().with_cancel_grace(TEST_CANCEL_GRACE_SECONDS)),
        collaborators,
    )
}
