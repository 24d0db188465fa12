//! The stage dependency graph.
//!
//! This module provides:
//! - Per-stage predicates deciding run or skip from upstream outcomes
//! - Stage specifications (runner, dependencies, predicate)
//! - The scheduler that drives a run's stages to terminal states

pub mod predicates;
mod scheduler;
mod spec;

pub use predicates::{Decision, GateSettings, Predicate, PredicateInputs};
pub use scheduler::{GraphExecutionResult, StageGraph};
pub use spec::StageSpec;
