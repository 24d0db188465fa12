//! Dependency-driven stage scheduler.
//!
//! A stage is evaluated once every dependency is terminal. Its predicate
//! then decides whether it runs or is skipped; a skip releases dependents
//! the same way a completion does. Independent stages run concurrently.

use super::predicates::Decision;
use super::StageSpec;
use crate::context::RunContext;
use crate::core::{StageName, StageOutcome, StageState};
use crate::errors::ShipgateError;
use crate::events;
use crate::stages::{BuildStage, DeployCheckStage, ExtendedTestStage, FinalizeStage, NotifyStage};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{AbortHandle, JoinError};
use tracing::Instrument;

type StageTask = BoxFuture<'static, (StageName, Result<StageOutcome, JoinError>)>;

/// Result of executing a stage graph.
#[derive(Debug, Clone)]
pub struct GraphExecutionResult {
    /// Final state of every stage.
    pub states: BTreeMap<StageName, StageState>,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
    /// Whether the run was cancelled while executing.
    pub cancelled: bool,
}

/// A validated directed acyclic graph of stages.
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: BTreeMap<StageName, StageSpec>,
    execution_order: Vec<StageName>,
}

impl StageGraph {
    /// Builds a graph from stage specs.
    ///
    /// # Errors
    ///
    /// Returns [`ShipgateError::InvalidGraph`] on duplicate stages, unknown
    /// dependencies or cycles.
    pub fn new(specs: impl IntoIterator<Item = StageSpec>) -> Result<Self, ShipgateError> {
        let mut stages = BTreeMap::new();
        for spec in specs {
            spec.validate()?;
            let name = spec.name;
            if stages.insert(name, spec).is_some() {
                return Err(ShipgateError::InvalidGraph(format!(
                    "stage '{name}' declared twice"
                )));
            }
        }
        for spec in stages.values() {
            if let Some(missing) = spec.dependencies.iter().find(|d| !stages.contains_key(d)) {
                return Err(ShipgateError::InvalidGraph(format!(
                    "stage '{}' depends on unknown stage '{missing}'",
                    spec.name
                )));
            }
        }
        let execution_order = topological_sort(&stages);
        if execution_order.len() != stages.len() {
            let cyclic: Vec<String> = stages
                .keys()
                .filter(|s| !execution_order.contains(s))
                .map(ToString::to_string)
                .collect();
            return Err(ShipgateError::InvalidGraph(format!(
                "cycle among stages: {}",
                cyclic.join(", ")
            )));
        }
        Ok(Self {
            stages,
            execution_order,
        })
    }

    /// The build-test-deploy graph.
    ///
    /// ```text
    /// Build ─┬─> Deploy-Check ──┬─> Finalize ─┐
    ///        └─> Extended-Test ─┘             ├─> Notify
    ///   (Build, Deploy-Check, Extended-Test) ─┘
    /// ```
    #[must_use]
    pub fn standard() -> Self {
        let specs = [
            StageSpec::new(Arc::new(BuildStage)),
            StageSpec::new(Arc::new(DeployCheckStage)).with_dependency(StageName::Build),
            StageSpec::new(Arc::new(ExtendedTestStage)).with_dependency(StageName::Build),
            StageSpec::new(Arc::new(FinalizeStage))
                .with_dependencies([StageName::DeployCheck, StageName::ExtendedTest]),
            StageSpec::new(Arc::new(NotifyStage)).with_dependencies([
                StageName::Build,
                StageName::DeployCheck,
                StageName::ExtendedTest,
                StageName::Finalize,
            ]),
        ];
        let stages: BTreeMap<StageName, StageSpec> =
            specs.into_iter().map(|s| (s.name, s)).collect();
        let execution_order = topological_sort(&stages);
        Self {
            stages,
            execution_order,
        }
    }

    /// Replaces the runner of an existing stage, keeping its edges and gate.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn crate::stages::Stage>) -> Self {
        if let Some(spec) = self.stages.get_mut(&runner.name()) {
            spec.runner = runner;
        }
        self
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the stage names in topological order.
    #[must_use]
    pub fn execution_order(&self) -> &[StageName] {
        &self.execution_order
    }

    /// Returns a stage's spec.
    #[must_use]
    pub fn spec(&self, stage: StageName) -> Option<&StageSpec> {
        self.stages.get(&stage)
    }

    /// Executes the graph to completion, recording every outcome in the
    /// context's aggregator.
    ///
    /// Once the run is cancelled, stages that have not started become
    /// Cancelled; running stages get the configured grace period, then are
    /// aborted and recorded as Cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ShipgateError::Internal`] if the graph deadlocks.
    pub async fn execute(&self, ctx: Arc<RunContext>) -> Result<GraphExecutionResult, ShipgateError> {
        let start = Instant::now();

        let mut in_degree: BTreeMap<StageName, usize> = self
            .stages
            .iter()
            .map(|(name, spec)| (*name, spec.dependencies.len()))
            .collect();
        let mut ready: VecDeque<StageName> = self
            .execution_order
            .iter()
            .filter(|s| in_degree.get(s) == Some(&0))
            .copied()
            .collect();

        let mut active: FuturesUnordered<StageTask> = FuturesUnordered::new();
        let mut abort_handles: HashMap<StageName, AbortHandle> = HashMap::new();
        let mut grace_deadline: Option<tokio::time::Instant> = None;
        let mut aborted = false;
        let mut completed = 0usize;
        let total = self.stages.len();

        loop {
            while let Some(stage) = ready.pop_front() {
                let decided = if ctx.is_cancelled() {
                    Some(StageOutcome::cancelled(cancel_reason(&ctx)))
                } else {
                    match self.evaluate(stage, &ctx) {
                        Decision::Skip(reason) => Some(StageOutcome::skipped(reason)),
                        Decision::Run => None,
                    }
                };
                if let Some(outcome) = decided {
                    finish_stage(stage, outcome, &ctx);
                    completed += 1;
                    self.release_dependents(stage, &mut in_degree, &mut ready);
                } else if let Some(spec) = self.stages.get(&stage) {
                    let (task, handle) = spawn_stage(spec, &ctx);
                    abort_handles.insert(stage, handle);
                    active.push(task);
                }
            }

            if completed == total {
                break;
            }
            if active.is_empty() {
                let pending: Vec<String> = in_degree
                    .iter()
                    .filter(|(_, n)| **n > 0)
                    .map(|(s, _)| s.to_string())
                    .collect();
                return Err(ShipgateError::Internal(format!(
                    "deadlocked stage graph; remaining stages: {}",
                    pending.join(", ")
                )));
            }

            let grace_elapsed = async move {
                match grace_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                Some((stage, joined)) = active.next() => {
                    abort_handles.remove(&stage);
                    let outcome = match joined {
                        Ok(outcome) if outcome.state.is_terminal() => outcome,
                        Ok(outcome) => StageOutcome::failure(format!(
                            "stage returned non-terminal state {:?}",
                            outcome.state
                        )),
                        Err(e) if e.is_cancelled() => StageOutcome::cancelled(format!(
                            "aborted after cancellation grace: {}",
                            cancel_reason(&ctx)
                        )),
                        Err(e) => StageOutcome::failure(format!("stage panicked: {e}")),
                    };
                    finish_stage(stage, outcome, &ctx);
                    completed += 1;
                    self.release_dependents(stage, &mut in_degree, &mut ready);
                }
                () = ctx.token().cancelled(), if grace_deadline.is_none() => {
                    let grace = ctx.config().cancel_grace();
                    tracing::info!(
                        running = abort_handles.len(),
                        grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                        reason = %cancel_reason(&ctx),
                        "run cancelled; winding down running stages"
                    );
                    grace_deadline = Some(tokio::time::Instant::now() + grace);
                }
                () = grace_elapsed, if !aborted => {
                    aborted = true;
                    for (stage, handle) in abort_handles.drain() {
                        tracing::warn!(stage = %stage, "stage exceeded cancellation grace; aborting");
                        handle.abort();
                    }
                }
            }
        }

        Ok(GraphExecutionResult {
            states: ctx.aggregator().snapshot(),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            cancelled: ctx.is_cancelled(),
        })
    }

    fn evaluate(&self, stage: StageName, ctx: &RunContext) -> Decision {
        let Some(spec) = self.stages.get(&stage) else {
            return Decision::Skip(format!("unknown stage '{stage}'"));
        };
        ctx.aggregator().set_state(stage, StageState::Eligible);
        let decision = (spec.predicate)(&ctx.predicate_inputs());
        tracing::debug!(stage = %stage, decision = ?decision, "evaluated stage predicate");
        decision
    }

    fn release_dependents(
        &self,
        stage: StageName,
        in_degree: &mut BTreeMap<StageName, usize>,
        ready: &mut VecDeque<StageName>,
    ) {
        for name in &self.execution_order {
            let Some(spec) = self.stages.get(name) else {
                continue;
            };
            if !spec.dependencies.contains(&stage) {
                continue;
            }
            if let Some(count) = in_degree.get_mut(name) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.push_back(*name);
                }
            }
        }
    }
}

fn spawn_stage(spec: &StageSpec, ctx: &Arc<RunContext>) -> (StageTask, AbortHandle) {
    let stage = spec.name;
    let runner = Arc::clone(&spec.runner);
    ctx.aggregator().set_state(stage, StageState::Running);
    ctx.emit(events::STAGE_STARTED, serde_json::json!({ "stage": stage }));
    tracing::info!(stage = %stage, "stage started");

    let stage_ctx = Arc::clone(ctx);
    let span = tracing::info_span!("stage", stage = %stage);
    let handle = tokio::spawn(
        async move {
            let started = Instant::now();
            let outcome = runner.execute(&stage_ctx).await;
            outcome.add_metadata(
                "duration_ms",
                serde_json::json!(started.elapsed().as_secs_f64() * 1000.0),
            )
        }
        .instrument(span),
    );
    let abort = handle.abort_handle();
    let task = handle.map(move |joined| (stage, joined)).boxed();
    (task, abort)
}

fn finish_stage(stage: StageName, outcome: StageOutcome, ctx: &RunContext) {
    let state = outcome.state;
    let payload = match state {
        StageState::Success => serde_json::json!({
            "stage": stage,
            "duration_ms": outcome.metadata.get("duration_ms"),
        }),
        StageState::Skipped => serde_json::json!({ "stage": stage, "reason": outcome.reason }),
        StageState::Cancelled => serde_json::json!({ "stage": stage, "reason": outcome.reason }),
        _ => serde_json::json!({ "stage": stage, "error": outcome.error }),
    };
    let event_type = match state {
        StageState::Success => events::STAGE_COMPLETED,
        StageState::Skipped => events::STAGE_SKIPPED,
        StageState::Cancelled => events::STAGE_CANCELLED,
        _ => events::STAGE_FAILED,
    };

    match state {
        StageState::Success => tracing::info!(stage = %stage, "stage succeeded"),
        StageState::Skipped => {
            tracing::info!(stage = %stage, reason = ?outcome.reason, "stage skipped");
        }
        StageState::Cancelled => {
            tracing::info!(stage = %stage, reason = ?outcome.reason, "stage cancelled");
        }
        _ => tracing::warn!(stage = %stage, error = ?outcome.error, "stage failed"),
    }

    if ctx.aggregator().record(stage, outcome) {
        ctx.emit(event_type, payload);
    }
}

fn cancel_reason(ctx: &RunContext) -> String {
    ctx.token()
        .reason()
        .unwrap_or_else(|| "run cancelled".to_string())
}

/// Kahn's algorithm; stages on a cycle are left out of the result.
fn topological_sort(stages: &BTreeMap<StageName, StageSpec>) -> Vec<StageName> {
    let mut in_degree: BTreeMap<StageName, usize> = stages
        .iter()
        .map(|(name, spec)| (*name, spec.dependencies.len()))
        .collect();
    let mut queue: VecDeque<StageName> = in_degree
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(s, _)| *s)
        .collect();
    let mut order = Vec::with_capacity(stages.len());

    while let Some(stage) = queue.pop_front() {
        order.push(stage);
        for (name, spec) in stages {
            if spec.dependencies.contains(&stage) {
                if let Some(count) = in_degree.get_mut(name) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(*name);
                    }
                }
            }
        }
    }
    order
}
