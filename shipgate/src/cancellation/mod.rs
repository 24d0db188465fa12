//! Structured cancellation and cleanup utilities.
//!
//! This module provides:
//! - CancellationToken for cooperative cancellation
//! - CleanupRegistry for LIFO teardown that runs on every exit path

mod cleanup;
mod token;

pub use cleanup::{CleanupCallback, CleanupRegistry};
pub use token::CancellationToken;
