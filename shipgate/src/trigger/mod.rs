//! Trigger classification.
//!
//! This module provides:
//! - Normalization of raw event payloads into a [`TriggerContext`]
//! - Branch/tag pattern matching into a [`BranchClassification`]

mod event;
mod refs;

pub use event::{
    classify_event, classify_event_json, DispatchInputs, HeadRef, Label, PullRequestPayload,
    RawEvent, TriggerContext, TriggerKind,
};
pub use refs::{classify, is_tag_ref, short_ref, BranchClassification, BRANCH_PREFIX, TAG_PREFIX};
