//! The orchestrator: turns events into completed runs.

use super::RunReport;
use crate::aggregator::OutcomeAggregator;
use crate::collaborators::{Collaborators, CommitResolver};
use crate::config::OrchestratorConfig;
use crate::context::{PipelineRun, RunContext, RunIdentity};
use crate::errors::ShipgateError;
use crate::events::{self, EventSink, NoOpEventSink};
use crate::gatekeeper::Gatekeeper;
use crate::graph::StageGraph;
use crate::observability;
use crate::tags::TagDeriver;
use crate::trigger::{classify, classify_event, classify_event_json, RawEvent, TriggerContext};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// Drives pipeline runs from trigger to report.
///
/// One orchestrator serves any number of concurrent runs; runs sharing a
/// key are serialized through its [`Gatekeeper`], newest wins.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    collaborators: Arc<dyn Collaborators>,
    deriver: TagDeriver,
    gatekeeper: Arc<Gatekeeper>,
    events: Arc<dyn EventSink>,
    graph: StageGraph,
}

impl Orchestrator {
    /// Creates an orchestrator running the standard stage graph.
    ///
    /// # Errors
    ///
    /// Returns [`ShipgateError::Config`] if the configuration is invalid.
    pub fn new(
        config: OrchestratorConfig,
        collaborators: Arc<dyn Collaborators>,
        resolver: Arc<dyn CommitResolver>,
    ) -> Result<Self, ShipgateError> {
        config.validate()?;
        let deriver = TagDeriver::new(config.default_dependency_tag.clone(), resolver);
        let gatekeeper = Gatekeeper::new(config.wind_down());
        Ok(Self {
            config: Arc::new(config),
            collaborators,
            deriver,
            gatekeeper,
            events: Arc::new(NoOpEventSink),
            graph: StageGraph::standard(),
        })
    }

    /// Sets the event sink for lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the stage graph.
    #[must_use]
    pub fn with_graph(mut self, graph: StageGraph) -> Self {
        self.graph = graph;
        self
    }

    /// The frozen configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The gatekeeper serializing runs by key.
    #[must_use]
    pub fn gatekeeper(&self) -> &Arc<Gatekeeper> {
        &self.gatekeeper
    }

    /// Classifies a raw event and runs it.
    ///
    /// # Errors
    ///
    /// Returns an input error if the event is malformed or its override
    /// commit cannot be resolved; no stage runs in that case.
    pub async fn submit(&self, event: RawEvent) -> Result<RunReport, ShipgateError> {
        let trigger = classify_event(event)?;
        self.run(trigger).await
    }

    /// Parses a JSON event payload and runs it.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::submit`].
    pub async fn submit_json(&self, payload: &str) -> Result<RunReport, ShipgateError> {
        let trigger = classify_event_json(payload)?;
        self.run(trigger).await
    }

    /// Runs a classified trigger to completion.
    ///
    /// Stage failures and supersession are reported in the [`RunReport`],
    /// not as errors.
    ///
    /// # Errors
    ///
    /// Returns [`ShipgateError::UnresolvableCommit`] before admission if
    /// the override commit cannot be resolved, or
    /// [`ShipgateError::Internal`] if the stage graph deadlocks.
    pub async fn run(&self, trigger: TriggerContext) -> Result<RunReport, ShipgateError> {
        let classification = classify(&trigger.git_ref);
        let commit_sha = trigger.commit_sha.clone();
        let tags = self.deriver.derive(&trigger, &commit_sha).await.map_err(|e| {
            warn!(git_ref = %trigger.git_ref, error = %e, "rejecting trigger before admission");
            e
        })?;

        let identity = RunIdentity::new(self.config.workflow_name.clone(), &trigger);
        let span = info_span!(
            "pipeline_run",
            run_id = %identity.run_id,
            key = %identity.key,
            git_ref = %trigger.git_ref,
        );

        let run = PipelineRun {
            identity,
            trigger,
            classification,
            tags,
        };
        self.execute(run).instrument(span).await
    }

    async fn execute(&self, run: PipelineRun) -> Result<RunReport, ShipgateError> {
        let lease = self
            .gatekeeper
            .admit(run.identity.key.clone(), run.run_id())
            .await;

        let aggregator = OutcomeAggregator::new(self.graph.execution_order().iter().copied())
            .with_holder_check(lease.holder_check());
        let ctx = Arc::new(
            RunContext::new(run, Arc::clone(&self.config), Arc::clone(&self.collaborators))
                .with_token(lease.token())
                .with_aggregator(aggregator)
                .with_event_sink(Arc::clone(&self.events)),
        );

        let run = ctx.run();
        info!(
            kind = ?run.trigger.kind,
            primary_tag = run.tags.primary_tag(),
            dependency_tag = run.tags.dependency_tag(),
            release_track = run.classification.is_release_track,
            "run admitted"
        );
        ctx.emit(
            events::RUN_ADMITTED,
            serde_json::json!({
                "key": run.identity.key.as_str(),
                "kind": run.trigger.kind,
                "ref": run.trigger.git_ref,
                "primary_tag": run.tags.primary_tag(),
                "dependency_tag": run.tags.dependency_tag(),
            }),
        );

        let executed = self.graph.execute(Arc::clone(&ctx)).await;

        let (completed, failed) = ctx.cleanup().run_all(self.config.teardown_timeout()).await;
        if !completed.is_empty() || !failed.is_empty() {
            info!(
                completed = completed.len(),
                failed = failed.len(),
                "drained run cleanups"
            );
        }
        for (name, reason) in &failed {
            warn!(cleanup = %name, reason = %reason, "teardown did not complete");
        }

        let executed = executed?;
        let report = RunReport::from_context(&ctx);

        if executed.cancelled {
            info!(reason = ?report.cancel_reason, "run superseded");
            ctx.emit(
                events::RUN_SUPERSEDED,
                serde_json::json!({ "reason": report.cancel_reason }),
            );
        }
        info!(
            result = ?report.result,
            duration_ms = report.duration_ms(),
            "run completed"
        );
        ctx.emit(events::RUN_COMPLETED, observability::run_summary(&report));

        drop(lease);
        Ok(report)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("active_runs", &self.gatekeeper.active_count())
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}
