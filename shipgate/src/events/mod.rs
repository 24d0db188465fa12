//! Run lifecycle events.
//!
//! Event types emitted by the orchestrator:
//!
//! | Type | Payload |
//! |---|---|
//! | `run.admitted` | `run_id`, `key`, `primary_tag`, `dependency_tag` |
//! | `run.superseded` | `run_id`, `reason` |
//! | `stage.started` | `run_id`, `stage` |
//! | `stage.completed` / `stage.failed` / `stage.skipped` / `stage.cancelled` | `run_id`, `stage`, `reason` or `error` |
//! | `notify.failed` | `run_id`, `error` |
//! | `run.completed` | `run_id`, `result` |

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run was admitted by the gatekeeper.
pub const RUN_ADMITTED: &str = "run.admitted";
/// A run was cancelled by a newer run with the same key.
pub const RUN_SUPERSEDED: &str = "run.superseded";
/// A run finished; every stage is terminal.
pub const RUN_COMPLETED: &str = "run.completed";
/// A stage started running.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage succeeded.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage failed.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage was skipped by its predicate.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// A stage was cancelled.
pub const STAGE_CANCELLED: &str = "stage.cancelled";
/// Sending the failure notification failed.
pub const NOTIFY_FAILED: &str = "notify.failed";
