//! Inbound event payloads and their normalization into a [`TriggerContext`].

use super::refs::{is_tag_ref, short_ref};
use crate::errors::TriggerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The kind of version-control event that started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Manual dispatch with optional overrides.
    Manual,
    /// Pull-request activity.
    PullRequest,
    /// Branch push.
    Push,
    /// Tag push.
    TagPush,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::PullRequest => write!(f, "pull_request"),
            Self::Push => write!(f, "push"),
            Self::TagPush => write!(f, "tag_push"),
        }
    }
}

/// Raw event payload as delivered by the hosting platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    /// Platform event name (`workflow_dispatch`, `pull_request`, `push`).
    pub event_name: String,
    /// The ref the event fired on.
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    /// The triggering commit.
    #[serde(default)]
    pub sha: Option<String>,
    /// Manual dispatch inputs.
    #[serde(default)]
    pub inputs: Option<DispatchInputs>,
    /// Pull-request details.
    #[serde(default)]
    pub pull_request: Option<PullRequestPayload>,
}

/// Inputs supplied on manual dispatch. Unset inputs arrive as empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchInputs {
    /// Explicit dependency commit to build against.
    #[serde(default)]
    pub commit: Option<String>,
    /// Explicit branch reference.
    #[serde(default)]
    pub branch: Option<String>,
    /// Force the extended test suite. Bool or `"true"` / `"false"`.
    #[serde(default)]
    pub force_full_test: Option<serde_json::Value>,
}

/// Pull-request portion of an event payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequestPayload {
    /// Whether the pull request is a draft.
    #[serde(default)]
    pub draft: bool,
    /// Labels attached to the pull request.
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Head branch.
    #[serde(default)]
    pub head: Option<HeadRef>,
}

/// A pull-request label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    /// Label name.
    pub name: String,
}

/// The head of a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadRef {
    /// Head branch name.
    #[serde(rename = "ref")]
    pub git_ref: String,
}

/// Normalized view of the triggering event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// The event kind.
    pub kind: TriggerKind,
    /// The full ref (`refs/heads/...`, `refs/tags/...`, `refs/pull/...`).
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// The triggering commit.
    pub commit_sha: String,
    /// Explicit dependency commit (manual dispatch only).
    pub override_commit: Option<String>,
    /// Explicit branch reference (manual dispatch only).
    pub override_branch: Option<String>,
    /// Run the extended test suite regardless of other gates.
    pub force_full_test: bool,
    /// Pull-request labels.
    pub pr_labels: BTreeSet<String>,
    /// Whether the pull request is a draft.
    pub is_draft: bool,
    /// Pull-request head branch.
    pub pr_head_branch: Option<String>,
}

impl TriggerContext {
    /// Creates a context for a branch push; handy for tests and tooling.
    #[must_use]
    pub fn push(git_ref: impl Into<String>, commit_sha: impl Into<String>) -> Self {
        let git_ref = git_ref.into();
        let kind = if is_tag_ref(&git_ref) {
            TriggerKind::TagPush
        } else {
            TriggerKind::Push
        };
        Self {
            kind,
            git_ref,
            commit_sha: commit_sha.into(),
            override_commit: None,
            override_branch: None,
            force_full_test: false,
            pr_labels: BTreeSet::new(),
            is_draft: false,
            pr_head_branch: None,
        }
    }

    /// Returns true if the pull request carries `label`.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.pr_labels.contains(label)
    }

    /// Returns true if the ref is one of the given mainline branches.
    #[must_use]
    pub fn is_mainline(&self, mainline_branches: &[String]) -> bool {
        self.git_ref
            .strip_prefix(super::refs::BRANCH_PREFIX)
            .is_some_and(|branch| mainline_branches.iter().any(|m| m == branch))
    }

    /// The branch handed to collaborators.
    ///
    /// Override branch, else pull-request head, else the short ref.
    #[must_use]
    pub fn source_branch(&self) -> &str {
        self.override_branch
            .as_deref()
            .or(self.pr_head_branch.as_deref())
            .unwrap_or_else(|| short_ref(&self.git_ref))
    }

    /// The ref handed to `finalize_artifact`: override branch, else the ref.
    #[must_use]
    pub fn resolved_ref(&self) -> &str {
        self.override_branch.as_deref().unwrap_or(&self.git_ref)
    }

    /// Returns true if the override branch is itself a tag ref.
    ///
    /// An unset override branch is never a tag ref.
    #[must_use]
    pub fn override_branch_is_tag(&self) -> bool {
        self.override_branch.as_deref().is_some_and(is_tag_ref)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_flag(value: Option<&serde_json::Value>) -> Result<bool, TriggerError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(false),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(serde_json::Value::String(s)) => match s.trim() {
            "" | "false" => Ok(false),
            "true" => Ok(true),
            other => Err(TriggerError::new(format!("invalid boolean '{other}'"))
                .with_field("inputs.force_full_test")),
        },
        Some(other) => Err(TriggerError::new(format!("invalid boolean {other}"))
            .with_field("inputs.force_full_test")),
    }
}

/// Normalizes a raw event into a [`TriggerContext`].
///
/// # Errors
///
/// Returns [`TriggerError`] if the ref or commit is missing, the event
/// name is unknown, or a dispatch input is malformed.
pub fn classify_event(event: RawEvent) -> Result<TriggerContext, TriggerError> {
    let git_ref = non_empty(event.git_ref).ok_or_else(|| TriggerError::missing("ref"))?;
    let commit_sha = non_empty(event.sha).ok_or_else(|| TriggerError::missing("sha"))?;

    let kind = match event.event_name.as_str() {
        "workflow_dispatch" => TriggerKind::Manual,
        "pull_request" => TriggerKind::PullRequest,
        "push" if is_tag_ref(&git_ref) => TriggerKind::TagPush,
        "push" => TriggerKind::Push,
        other => {
            return Err(TriggerError::new(format!("unsupported event '{other}'"))
                .with_field("event_name")
                .with_context_entry("event_name", other));
        }
    };

    let inputs = if kind == TriggerKind::Manual {
        event.inputs.unwrap_or_default()
    } else {
        DispatchInputs::default()
    };
    let force_full_test = parse_flag(inputs.force_full_test.as_ref())?;

    let pr = event.pull_request.unwrap_or_default();

    Ok(TriggerContext {
        kind,
        git_ref,
        commit_sha,
        override_commit: non_empty(inputs.commit),
        override_branch: non_empty(inputs.branch),
        force_full_test,
        pr_labels: pr.labels.into_iter().map(|l| l.name).collect(),
        is_draft: pr.draft,
        pr_head_branch: pr.head.map(|h| h.git_ref).filter(|r| !r.is_empty()),
    })
}

/// Parses and normalizes a JSON event payload.
///
/// # Errors
///
/// Returns [`TriggerError`] if the payload is not valid JSON for a
/// [`RawEvent`] or fails [`classify_event`].
pub fn classify_event_json(payload: &str) -> Result<TriggerContext, TriggerError> {
    let event: RawEvent = serde_json::from_str(payload)
        .map_err(|e| TriggerError::new(format!("invalid payload: {e}")))?;
    classify_event(event)
}
