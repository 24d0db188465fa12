//! Artifact tag derivation.
//!
//! A run's tags tie the built image to the exact commits it was built
//! against: the triggering commit, plus the dependency commit when one
//! was supplied explicitly.

use crate::collaborators::CommitResolver;
use crate::errors::{CollaboratorError, ShipgateError};
use crate::trigger::TriggerContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Length of an abbreviated commit hash.
pub const SHORT_HASH_LEN: usize = 7;

/// The two identifiers every stage of a run uses. Immutable once derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactTagPair {
    dependency_tag: String,
    primary_tag: String,
}

impl ArtifactTagPair {
    /// Creates a pair from already-derived tags.
    #[must_use]
    pub fn new(dependency_tag: impl Into<String>, primary_tag: impl Into<String>) -> Self {
        Self {
            dependency_tag: dependency_tag.into(),
            primary_tag: primary_tag.into(),
        }
    }

    /// Tag of the upstream dependency artifact.
    #[must_use]
    pub fn dependency_tag(&self) -> &str {
        &self.dependency_tag
    }

    /// Tag of the artifact this run builds.
    #[must_use]
    pub fn primary_tag(&self) -> &str {
        &self.primary_tag
    }
}

impl fmt::Display for ArtifactTagPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (dependency {})", self.primary_tag, self.dependency_tag)
    }
}

/// Abbreviates a commit hash to [`SHORT_HASH_LEN`] characters.
#[must_use]
pub fn short_hash(commit: &str) -> &str {
    commit
        .char_indices()
        .nth(SHORT_HASH_LEN)
        .map_or(commit, |(idx, _)| &commit[..idx])
}

/// Derives [`ArtifactTagPair`]s for runs.
#[derive(Clone)]
pub struct TagDeriver {
    default_dependency_tag: String,
    resolver: Arc<dyn CommitResolver>,
}

impl fmt::Debug for TagDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagDeriver")
            .field("default_dependency_tag", &self.default_dependency_tag)
            .finish_non_exhaustive()
    }
}

impl TagDeriver {
    /// Creates a deriver with the rolling default dependency tag.
    #[must_use]
    pub fn new(default_dependency_tag: impl Into<String>, resolver: Arc<dyn CommitResolver>) -> Self {
        Self {
            default_dependency_tag: default_dependency_tag.into(),
            resolver,
        }
    }

    /// Derives the tag pair for a run.
    ///
    /// Without an override commit: `(default, commit_sha)`.
    /// With one: `(override, "<commit_sha>-<short(resolved override)>")`.
    ///
    /// # Errors
    ///
    /// Returns [`ShipgateError::UnresolvableCommit`] if the override commit
    /// cannot be resolved. There is no fallback to the default tag.
    pub async fn derive(
        &self,
        trigger: &TriggerContext,
        commit_sha: &str,
    ) -> Result<ArtifactTagPair, ShipgateError> {
        let Some(override_commit) = trigger.override_commit.as_deref() else {
            return Ok(ArtifactTagPair {
                dependency_tag: self.default_dependency_tag.clone(),
                primary_tag: commit_sha.to_string(),
            });
        };

        let resolved = self
            .resolver
            .resolve_commit(override_commit)
            .await
            .map_err(|e| unresolvable(override_commit, &e))?;
        if resolved.trim().is_empty() {
            return Err(unresolvable(
                override_commit,
                &CollaboratorError::CommitNotFound(override_commit.to_string()),
            ));
        }

        let pair = ArtifactTagPair {
            dependency_tag: override_commit.to_string(),
            primary_tag: format!("{commit_sha}-{}", short_hash(resolved.trim())),
        };
        debug!(%pair, override_commit, "Derived tags from override commit");
        Ok(pair)
    }
}

fn unresolvable(commit: &str, err: &CollaboratorError) -> ShipgateError {
    ShipgateError::UnresolvableCommit {
        commit: commit.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockCommitResolver;

    fn manual(override_commit: Option<&str>) -> TriggerContext {
        let mut ctx = TriggerContext::push("refs/heads/develop", "deadbeef");
        ctx.override_commit = override_commit.map(String::from);
        ctx
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash("abc1234def5678"), "abc1234");
        assert_eq!(short_hash("abc"), "abc");
        assert_eq!(short_hash("abc1234"), "abc1234");
    }

    #[tokio::test]
    async fn test_derive_without_override() {
        let mut resolver = MockCommitResolver::new();
        resolver.expect_resolve_commit().never();
        let deriver = TagDeriver::new("latest", Arc::new(resolver));

        let pair = deriver.derive(&manual(None), "deadbeef").await.unwrap();

        assert_eq!(pair.dependency_tag(), "latest");
        assert_eq!(pair.primary_tag(), "deadbeef");
    }

    #[tokio::test]
    async fn test_derive_with_override() {
        let mut resolver = MockCommitResolver::new();
        resolver
            .expect_resolve_commit()
            .withf(|rev: &str| rev == "abc1234ffff0000")
            .times(1)
            .returning(|rev| Ok(rev.to_string()));
        let deriver = TagDeriver::new("latest", Arc::new(resolver));

        let pair = deriver
            .derive(&manual(Some("abc1234ffff0000")), "deadbeef")
            .await
            .unwrap();

        assert_eq!(pair.dependency_tag(), "abc1234ffff0000");
        assert_eq!(pair.primary_tag(), "deadbeef-abc1234");
    }

    #[tokio::test]
    async fn test_derive_short_override_resolves_to_full_hash() {
        let mut resolver = MockCommitResolver::new();
        resolver
            .expect_resolve_commit()
            .returning(|_| Ok("9f8e7d6c5b4a39281706".to_string()));
        let deriver = TagDeriver::new("latest", Arc::new(resolver));

        let pair = deriver.derive(&manual(Some("9f8e")), "deadbeef").await.unwrap();

        assert_eq!(pair.dependency_tag(), "9f8e");
        assert_eq!(pair.primary_tag(), "deadbeef-9f8e7d6");
    }

    #[tokio::test]
    async fn test_unresolvable_override_is_fatal() {
        let mut resolver = MockCommitResolver::new();
        resolver
            .expect_resolve_commit()
            .returning(|rev| Err(CollaboratorError::CommitNotFound(rev.to_string())));
        let deriver = TagDeriver::new("latest", Arc::new(resolver));

        let err = deriver
            .derive(&manual(Some("0000000")), "deadbeef")
            .await
            .unwrap_err();

        assert!(err.is_input_error());
        assert!(matches!(err, ShipgateError::UnresolvableCommit { ref commit, .. } if commit == "0000000"));
    }

    #[tokio::test]
    async fn test_empty_resolution_is_fatal() {
        let mut resolver = MockCommitResolver::new();
        resolver.expect_resolve_commit().returning(|_| Ok("  ".to_string()));
        let deriver = TagDeriver::new("latest", Arc::new(resolver));

        let err = deriver.derive(&manual(Some("abc")), "deadbeef").await.unwrap_err();
        assert!(err.is_input_error());
    }
}
