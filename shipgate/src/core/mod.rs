//! Core domain model types.
//!
//! This module contains the fundamental per-stage types:
//! - Stage names and lifecycle states
//! - Stage outcomes with factory methods
//! - Named artifacts (logs, reports)

mod artifact;
mod outcome;
mod status;

pub use artifact::{ArtifactKind, StageArtifact};
pub use outcome::StageOutcome;
pub use status::{StageName, StageState};
