//! Observability utilities.
//!
//! Subscriber setup for binaries embedding the orchestrator, and the wide
//! summary payload emitted when a run completes.

use crate::errors::ShipgateError;
use crate::run::RunReport;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. With `json` set,
/// records are written as one JSON object per line.
///
/// # Errors
///
/// Returns [`ShipgateError::Config`] if a global subscriber is already set.
pub fn init_tracing(json: bool) -> Result<(), ShipgateError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    installed.map_err(|e| ShipgateError::Config(format!("tracing already initialized: {e}")))
}

/// Builds the wide `run.completed` payload for a finished run.
///
/// One flat record per run: identity, tags, trigger shape, every stage's
/// terminal state and the artifact names.
#[must_use]
pub fn run_summary(report: &RunReport) -> serde_json::Value {
    let stages: serde_json::Map<String, serde_json::Value> = report
        .stages
        .iter()
        .map(|(name, outcome)| (name.to_string(), serde_json::json!(outcome.state)))
        .collect();
    let artifacts: Vec<&str> = report.artifacts.iter().map(|a| a.name.as_str()).collect();

    serde_json::json!({
        "run_id": report.run_id.to_string(),
        "key": report.key.as_str(),
        "trigger_kind": report.trigger.kind,
        "ref": report.trigger.git_ref,
        "commit_sha": report.trigger.commit_sha,
        "primary_tag": report.tags.primary_tag(),
        "dependency_tag": report.tags.dependency_tag(),
        "release_track": report.classification.is_release_track,
        "tag_push": report.classification.is_tag_push,
        "stages": stages,
        "artifacts": artifacts,
        "result": report.result,
        "superseded": report.superseded,
        "duration_ms": report.duration_ms(),
    })
}
