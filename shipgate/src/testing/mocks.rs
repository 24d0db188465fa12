//! Scripted collaborators and stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{Collaborators, CommitResolver, StopSignal};
use crate::context::RunContext;
use crate::core::{StageName, StageOutcome};
use crate::errors::CollaboratorError;
use crate::stages::Stage;

/// One recorded collaborator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorCall {
    /// The verb invoked.
    pub verb: String,
    /// Arguments in declaration order.
    pub args: Vec<String>,
}

/// An in-memory artifact registry.
///
/// Publishing is idempotent per tag; promotions are recorded in order.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    published: Mutex<BTreeMap<String, usize>>,
    promotions: Mutex<Vec<(String, String)>>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a tag. Returns true if the tag was new.
    pub fn publish(&self, tag: &str) -> bool {
        let mut published = self.published.lock();
        let count = published.entry(tag.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Records a promotion of `tag` to `resolved_ref`.
    pub fn promote(&self, tag: &str, resolved_ref: &str) {
        self.promotions
            .lock()
            .push((tag.to_string(), resolved_ref.to_string()));
    }

    /// Returns true if the tag has been published.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.published.lock().contains_key(tag)
    }

    /// Returns the distinct published tags.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.published.lock().keys().cloned().collect()
    }

    /// Returns how many times a tag was pushed.
    #[must_use]
    pub fn publish_count(&self, tag: &str) -> usize {
        self.published.lock().get(tag).copied().unwrap_or(0)
    }

    /// Returns all promotions as `(tag, resolved_ref)`.
    #[must_use]
    pub fn promotions(&self) -> Vec<(String, String)> {
        self.promotions.lock().clone()
    }
}

/// Collaborators that record every call and answer from a script.
#[derive(Debug, Default)]
pub struct MockCollaborators {
    calls: Mutex<Vec<CollaboratorCall>>,
    completed: Mutex<Vec<String>>,
    failures: HashMap<String, CollaboratorError>,
    delays: HashMap<String, Duration>,
    registry: InMemoryRegistry,
    logs: String,
    report: String,
}

impl MockCollaborators {
    /// Creates collaborators where every verb succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs: "deploy check logs".to_string(),
            report: "extended test report".to_string(),
            ..Self::default()
        }
    }

    /// Makes `verb` fail with `error`.
    #[must_use]
    pub fn fail_on(mut self, verb: &str, error: CollaboratorError) -> Self {
        self.failures.insert(verb.to_string(), error);
        self
    }

    /// Makes `verb` take `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, verb: &str, delay: Duration) -> Self {
        self.delays.insert(verb.to_string(), delay);
        self
    }

    /// Sets the output of `collect_logs`.
    #[must_use]
    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = logs.into();
        self
    }

    /// Sets the output of `run_extended_tests`.
    #[must_use]
    pub fn with_report(mut self, report: impl Into<String>) -> Self {
        self.report = report.into();
        self
    }

    /// Returns every call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CollaboratorCall> {
        self.calls.lock().clone()
    }

    /// Returns the invoked verbs in order.
    #[must_use]
    pub fn verbs(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.verb.clone()).collect()
    }

    /// Returns the calls to one verb.
    #[must_use]
    pub fn calls_to(&self, verb: &str) -> Vec<CollaboratorCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.verb == verb)
            .cloned()
            .collect()
    }

    /// Returns how many times `verb` was invoked.
    #[must_use]
    pub fn call_count(&self, verb: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.verb == verb).count()
    }

    /// Returns how many invocations of `verb` ran to the end, delay included.
    #[must_use]
    pub fn completed_count(&self, verb: &str) -> usize {
        self.completed.lock().iter().filter(|v| *v == verb).count()
    }

    /// The registry behind `publish_artifact` and `finalize_artifact`.
    #[must_use]
    pub fn registry(&self) -> &InMemoryRegistry {
        &self.registry
    }

    async fn respond(&self, verb: &str, args: &[&str]) -> Result<(), CollaboratorError> {
        self.calls.lock().push(CollaboratorCall {
            verb: verb.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        });
        if let Some(delay) = self.delays.get(verb) {
            tokio::time::sleep(*delay).await;
        }
        self.completed.lock().push(verb.to_string());
        match self.failures.get(verb) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Collaborators for MockCollaborators {
    fn bind(self: Arc<Self>, _stop: StopSignal) -> Arc<dyn Collaborators> {
        self
    }

    async fn build_artifact(
        &self,
        dependency_tag: &str,
        primary_tag: &str,
        source_branch: &str,
    ) -> Result<(), CollaboratorError> {
        self.respond("build_artifact", &[dependency_tag, primary_tag, source_branch])
            .await
    }

    async fn publish_artifact(&self, primary_tag: &str) -> Result<(), CollaboratorError> {
        self.respond("publish_artifact", &[primary_tag]).await?;
        self.registry.publish(primary_tag);
        Ok(())
    }

    async fn provision_test_environment(
        &self,
        run_id: &str,
        primary_tag: &str,
        dependency_tag: &str,
    ) -> Result<(), CollaboratorError> {
        self.respond(
            "provision_test_environment",
            &[run_id, primary_tag, dependency_tag],
        )
        .await
    }

    async fn run_extended_tests(&self, run_id: &str) -> Result<String, CollaboratorError> {
        self.respond("run_extended_tests", &[run_id]).await?;
        Ok(self.report.clone())
    }

    async fn destroy_test_environment(&self, run_id: &str) -> Result<(), CollaboratorError> {
        self.respond("destroy_test_environment", &[run_id]).await
    }

    async fn deploy_check(
        &self,
        primary_tag: &str,
        dependency_tag: &str,
        source_branch: &str,
    ) -> Result<(), CollaboratorError> {
        self.respond("deploy_check", &[primary_tag, dependency_tag, source_branch])
            .await
    }

    async fn collect_logs(&self) -> Result<String, CollaboratorError> {
        self.respond("collect_logs", &[]).await?;
        Ok(self.logs.clone())
    }

    async fn stop_environment(&self) -> Result<(), CollaboratorError> {
        self.respond("stop_environment", &[]).await
    }

    async fn finalize_artifact(
        &self,
        primary_tag: &str,
        resolved_ref: &str,
    ) -> Result<(), CollaboratorError> {
        self.respond("finalize_artifact", &[primary_tag, resolved_ref])
            .await?;
        self.registry.promote(primary_tag, resolved_ref);
        Ok(())
    }

    async fn notify(&self, channel: &str, build_url: &str) -> Result<(), CollaboratorError> {
        self.respond("notify", &[channel, build_url]).await
    }
}

/// Resolves revisions from a fixed table.
#[derive(Debug, Default, Clone)]
pub struct StaticCommitResolver {
    commits: HashMap<String, String>,
}

impl StaticCommitResolver {
    /// Creates an empty resolver; every lookup fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resolvable revision.
    #[must_use]
    pub fn with_commit(mut self, rev: impl Into<String>, sha: impl Into<String>) -> Self {
        self.commits.insert(rev.into(), sha.into());
        self
    }
}

#[async_trait]
impl CommitResolver for StaticCommitResolver {
    async fn resolve_commit(&self, rev: &str) -> Result<String, CollaboratorError> {
        self.commits
            .get(rev)
            .cloned()
            .ok_or_else(|| CollaboratorError::CommitNotFound(rev.to_string()))
    }
}

/// Shared start/end journal written by [`ScriptedStage`]s.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// A stage that returns a fixed outcome after an optional delay.
///
/// The delay honours run cancellation unless the stage is built with
/// [`ScriptedStage::ignoring_cancellation`].
#[derive(Debug)]
pub struct ScriptedStage {
    name: StageName,
    outcome: StageOutcome,
    delay: Duration,
    honours_cancellation: bool,
    invocations: AtomicUsize,
    journal: Option<Journal>,
}

impl ScriptedStage {
    /// Creates a stage that returns `outcome` immediately.
    #[must_use]
    pub fn new(name: StageName, outcome: StageOutcome) -> Self {
        Self {
            name,
            outcome,
            delay: Duration::ZERO,
            honours_cancellation: true,
            invocations: AtomicUsize::new(0),
            journal: None,
        }
    }

    /// A stage that succeeds.
    #[must_use]
    pub fn success(name: StageName) -> Self {
        Self::new(name, StageOutcome::success())
    }

    /// A stage that fails with `error`.
    #[must_use]
    pub fn failing(name: StageName, error: &str) -> Self {
        Self::new(name, StageOutcome::failure(error))
    }

    /// Waits `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Keeps waiting through cancellation, so only an abort stops it.
    #[must_use]
    pub fn ignoring_cancellation(mut self) -> Self {
        self.honours_cancellation = false;
        self
    }

    /// Writes `"<stage>:start"` and `"<stage>:end"` entries to `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Returns how many times the stage was executed.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn note(&self, event: &str) {
        if let Some(journal) = &self.journal {
            journal.lock().push(format!("{}:{event}", self.name));
        }
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn execute(&self, ctx: &RunContext) -> StageOutcome {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.note("start");
        if !self.delay.is_zero() {
            let wait = tokio::time::sleep(self.delay);
            if self.honours_cancellation {
                if ctx.token().run_until_cancelled(wait).await.is_none() {
                    self.note("cancelled");
                    return StageOutcome::cancelled("interrupted");
                }
            } else {
                wait.await;
            }
        }
        self.note("end");
        self.outcome.clone()
    }
}
