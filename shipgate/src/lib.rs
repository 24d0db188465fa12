//! # Shipgate
//!
//! A build-test-deploy pipeline orchestrator driven by version-control
//! events.
//!
//! Shipgate decides, for every push, tag, pull request or manual dispatch:
//!
//! - **Which stages run**: typed per-stage predicates over the trigger and
//!   upstream outcomes
//! - **With which artifact tags**: derived once per run from the triggering
//!   and (optionally) overridden dependency commits
//! - **Which run wins**: runs sharing a ref are single-flight, newest wins
//! - **What gets cleaned up**: provisioned environments are torn down on
//!   every exit path, cancellation included
//!
//! The actual builds, test suites, provisioning, registry pushes and
//! notification delivery happen behind the [`collaborators::Collaborators`]
//! port.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shipgate::prelude::*;
//!
//! let config = OrchestratorConfig::from_file("shipgate.json")?;
//! // Verbs see the registry and secrets in their environment.
//! let verbs = CommandCollaborator::from_config("/usr/local/bin/ci-verbs", &config);
//! let orchestrator = Orchestrator::new(
//!     config,
//!     Arc::new(verbs),
//!     Arc::new(GitCommitResolver::new(".")),
//! )?;
//!
//! let report = orchestrator.submit_json(&payload).await?;
//! println!("{:?}", report.result);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod aggregator;
pub mod cancellation;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod gatekeeper;
pub mod graph;
pub mod observability;
pub mod run;
pub mod stages;
pub mod tags;
pub mod testing;
pub mod trigger;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregator::{aggregate, AggregateResult, OutcomeAggregator};
    pub use crate::cancellation::{CancellationToken, CleanupRegistry};
    pub use crate::collaborators::{
        Collaborators, CommandCollaborator, CommitResolver, GitCommitResolver, StopSignal,
    };
    pub use crate::config::OrchestratorConfig;
    pub use crate::context::{PipelineRun, RunContext, RunIdentity};
    pub use crate::core::{StageArtifact, StageName, StageOutcome, StageState};
    pub use crate::errors::{CollaboratorError, ShipgateError, TriggerError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::gatekeeper::{Gatekeeper, RunKey, RunLease};
    pub use crate::graph::{Decision, StageGraph, StageSpec};
    pub use crate::observability::init_tracing;
    pub use crate::run::{Orchestrator, RunReport};
    pub use crate::stages::Stage;
    pub use crate::tags::{ArtifactTagPair, TagDeriver};
    pub use crate::trigger::{
        classify, classify_event, BranchClassification, RawEvent, TriggerContext, TriggerKind,
    };
    pub use crate::utils::{iso_timestamp, Timestamp};
}
