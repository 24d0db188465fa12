//! Run identity and per-run execution context.

mod identity;
mod run;

pub use identity::{PipelineRun, RunIdentity};
pub use run::RunContext;
