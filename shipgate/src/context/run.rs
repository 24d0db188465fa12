//! Per-run execution context handed to every stage.

use super::PipelineRun;
use crate::aggregator::OutcomeAggregator;
use crate::cancellation::{CancellationToken, CleanupRegistry};
use crate::collaborators::{Collaborators, StopSignal};
use crate::config::OrchestratorConfig;
use crate::core::StageName;
use crate::errors::CollaboratorError;
use crate::events::{EventSink, NoOpEventSink};
use crate::graph::{GateSettings, PredicateInputs};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Execution context for a single run.
///
/// Owns the run's cancellation token, cleanup registry and outcome
/// aggregator; shares the immutable [`PipelineRun`] with stages.
pub struct RunContext {
    run: PipelineRun,
    config: Arc<OrchestratorConfig>,
    collaborators: Arc<dyn Collaborators>,
    token: Arc<CancellationToken>,
    cleanup: Arc<CleanupRegistry>,
    aggregator: Arc<OutcomeAggregator>,
    events: Arc<dyn EventSink>,
}

impl RunContext {
    /// Creates a context with a fresh token, registry and aggregator.
    #[must_use]
    pub fn new(
        run: PipelineRun,
        config: Arc<OrchestratorConfig>,
        collaborators: Arc<dyn Collaborators>,
    ) -> Self {
        let token = Arc::new(CancellationToken::new());
        let collaborators = collaborators.bind(StopSignal {
            token: Arc::clone(&token),
            grace: config.cancel_grace(),
        });
        Self {
            run,
            config,
            collaborators,
            token,
            cleanup: Arc::new(CleanupRegistry::new()),
            aggregator: Arc::new(OutcomeAggregator::new(StageName::ALL)),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Uses the given cancellation token (e.g. from a gatekeeper lease).
    ///
    /// Collaborators are re-bound so their invocations observe it.
    #[must_use]
    pub fn with_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.collaborators = Arc::clone(&self.collaborators).bind(StopSignal {
            token: Arc::clone(&token),
            grace: self.config.cancel_grace(),
        });
        self.token = token;
        self
    }

    /// Uses the given aggregator.
    #[must_use]
    pub fn with_aggregator(mut self, aggregator: OutcomeAggregator) -> Self {
        self.aggregator = Arc::new(aggregator);
        self
    }

    /// Uses the given event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The immutable run data.
    #[must_use]
    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    /// The frozen configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The collaborator port.
    #[must_use]
    pub fn collaborators(&self) -> &Arc<dyn Collaborators> {
        &self.collaborators
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// The run's teardown registry.
    #[must_use]
    pub fn cleanup(&self) -> &Arc<CleanupRegistry> {
        &self.cleanup
    }

    /// The run's outcome aggregator.
    #[must_use]
    pub fn aggregator(&self) -> &Arc<OutcomeAggregator> {
        &self.aggregator
    }

    /// Returns true once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Emits an event with `run_id` merged into the payload.
    pub fn emit(&self, event_type: &str, mut data: serde_json::Value) {
        if let Some(obj) = data.as_object_mut() {
            obj.insert(
                "run_id".to_string(),
                serde_json::json!(self.run.run_id().to_string()),
            );
        }
        self.events.emit(event_type, data);
    }

    /// Runs a collaborator invocation under the run's cancellation.
    ///
    /// Nothing is started once the run is cancelled. An invocation already
    /// in flight gets the configured grace period to wind down (bound
    /// collaborators terminate their work on the same token) and is dropped
    /// after that. Either way the result is [`CollaboratorError::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns the collaborator's error, or [`CollaboratorError::Cancelled`].
    pub async fn invoke<T, F>(&self, verb: &str, fut: F) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let cancelled = || CollaboratorError::Cancelled(verb.to_string());
        if self.is_cancelled() {
            return Err(cancelled());
        }
        tokio::pin!(fut);
        tokio::select! {
            biased;
            out = &mut fut => out,
            () = self.token.cancelled() => {
                if tokio::time::timeout(self.config.cancel_grace(), fut).await.is_err() {
                    debug!(verb, "collaborator did not wind down within grace; dropping");
                }
                Err(cancelled())
            }
        }
    }

    /// Snapshot of upstream states plus trigger data for predicate evaluation.
    #[must_use]
    pub fn predicate_inputs(&self) -> PredicateInputs<'_> {
        PredicateInputs {
            trigger: &self.run.trigger,
            classification: self.run.classification,
            upstream: self.aggregator.snapshot(),
            settings: GateSettings::from_config(&self.config),
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run.run_id())
            .field("key", &self.run.identity.key)
            .field("tags", &self.run.tags)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
