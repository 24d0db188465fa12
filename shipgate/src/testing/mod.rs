//! Testing utilities for orchestrator runs.
//!
//! This module provides:
//! - Scripted collaborators with call recording and an in-memory registry
//! - Scripted stages for scheduler tests
//! - Event payload and run-context fixtures

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{assert_all_terminal, assert_stage_state, assert_stage_states};
pub use mocks::{
    CollaboratorCall, InMemoryRegistry, Journal, MockCollaborators, ScriptedStage,
    StaticCommitResolver,
};
