//! End-to-end run lifecycle.
//!
//! A trigger is classified, its tags derived, the run admitted through the
//! gatekeeper, its stage graph executed, its teardowns drained and its
//! outcome reported.

mod orchestrator;
mod report;

#[cfg(test)]
mod scenario_tests;

pub use crate::context::PipelineRun;
pub use orchestrator::Orchestrator;
pub use report::RunReport;
