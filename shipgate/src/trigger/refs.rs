//! Branch and tag pattern matching.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Prefix of branch refs.
pub const BRANCH_PREFIX: &str = "refs/heads/";

/// Prefix of tag refs.
pub const TAG_PREFIX: &str = "refs/tags/";

#[allow(clippy::expect_used)]
fn release_track_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^refs/heads/[vt][0-9]+\.[0-9]+\.x$").expect("release-track pattern is valid")
    })
}

/// How a ref is classified for gating decisions.
///
/// Derived once per run and never recomputed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchClassification {
    /// The ref is a versioned release branch (`refs/heads/v12.3.x`, `refs/heads/t0.9.x`).
    pub is_release_track: bool,
    /// The ref is a tag.
    pub is_tag_push: bool,
}

/// Classifies a ref. Total: unknown shapes are neither release-track nor tag.
#[must_use]
pub fn classify(git_ref: &str) -> BranchClassification {
    BranchClassification {
        is_release_track: release_track_pattern().is_match(git_ref),
        is_tag_push: is_tag_ref(git_ref),
    }
}

/// Returns true if the ref points at a tag.
#[must_use]
pub fn is_tag_ref(git_ref: &str) -> bool {
    git_ref.starts_with(TAG_PREFIX)
}

/// Strips `refs/heads/` or `refs/tags/` from a ref, leaving other refs as-is.
#[must_use]
pub fn short_ref(git_ref: &str) -> &str {
    git_ref
        .strip_prefix(BRANCH_PREFIX)
        .or_else(|| git_ref.strip_prefix(TAG_PREFIX))
        .unwrap_or(git_ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_track_branches() {
        for git_ref in [
            "refs/heads/v12.3.x",
            "refs/heads/t0.9.x",
            "refs/heads/v1.0.x",
            "refs/heads/t100.200.x",
        ] {
            assert!(classify(git_ref).is_release_track, "{git_ref}");
        }
    }

    #[test]
    fn test_non_release_track_branches() {
        for git_ref in [
            "refs/heads/feature/x",
            "refs/heads/develop",
            "refs/heads/master",
            "refs/heads/v12.3.1",
            "refs/heads/v12.x",
            "refs/heads/x12.3.x",
            "refs/heads/v12.3.x-hotfix",
            "refs/heads/feature/v12.3.x",
            "refs/tags/v12.3.x",
            "v12.3.x",
            "",
        ] {
            assert!(!classify(git_ref).is_release_track, "{git_ref}");
        }
    }

    #[test]
    fn test_tag_push_detection() {
        assert!(classify("refs/tags/v1.2.3").is_tag_push);
        assert!(!classify("refs/heads/v1.2.x").is_tag_push);
        assert!(!classify("refs/pull/42/merge").is_tag_push);
    }

    #[test]
    fn test_default_classification() {
        assert_eq!(classify("refs/pull/42/merge"), BranchClassification::default());
    }

    #[test]
    fn test_short_ref() {
        assert_eq!(short_ref("refs/heads/feature/x"), "feature/x");
        assert_eq!(short_ref("refs/tags/v1.0.0"), "v1.0.0");
        assert_eq!(short_ref("refs/pull/42/merge"), "refs/pull/42/merge");
    }
}
