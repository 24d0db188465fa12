//! Single-flight admission of pipeline runs.
//!
//! Runs are keyed by (workflow, ref, override commit). Admitting a run
//! atomically swaps it in as the key's holder; a run it displaces is
//! cancelled and given a bounded interval to wind down before the new
//! run proceeds.

use crate::cancellation::CancellationToken;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity key shared by runs that target the same logical output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey(String);

impl RunKey {
    /// Computes the key for a workflow, ref and optional override commit.
    #[must_use]
    pub fn new(workflow: &str, git_ref: &str, override_commit: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(workflow.as_bytes());
        hasher.update([0u8]);
        hasher.update(git_ref.as_bytes());
        hasher.update([0u8]);
        hasher.update(override_commit.unwrap_or_default().as_bytes());
        let digest = hasher.finalize();
        Self(format!("run:{}", hex::encode(&digest[..16])))
    }

    /// Returns the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct ActiveRun {
    run_id: Uuid,
    token: Arc<CancellationToken>,
    finished: watch::Receiver<bool>,
}

/// Enforces at most one active run per [`RunKey`].
#[derive(Debug)]
pub struct Gatekeeper {
    active: DashMap<RunKey, ActiveRun>,
    wind_down: Duration,
}

impl Gatekeeper {
    /// Creates a gatekeeper that waits up to `wind_down` for a superseded
    /// run to finish before admitting its successor.
    #[must_use]
    pub fn new(wind_down: Duration) -> Arc<Self> {
        Arc::new(Self {
            active: DashMap::new(),
            wind_down,
        })
    }

    /// Admits a run, superseding any active run with the same key.
    ///
    /// The displaced run's token is cancelled; this waits for it to
    /// release its lease (bounded by the wind-down interval).
    pub async fn admit(self: &Arc<Self>, key: RunKey, run_id: Uuid) -> RunLease {
        let (finished_tx, finished_rx) = watch::channel(false);
        let token = Arc::new(CancellationToken::new());

        let previous = self.active.insert(
            key.clone(),
            ActiveRun {
                run_id,
                token: token.clone(),
                finished: finished_rx,
            },
        );

        let superseded = previous.map(|prev| {
            info!(%key, %run_id, superseded = %prev.run_id, "Superseding active run");
            prev.token.cancel(format!("superseded by run {run_id}"));
            prev
        });

        if let Some(mut prev) = superseded {
            let wait = prev.finished.wait_for(|done| *done);
            match tokio::time::timeout(self.wind_down, wait).await {
                Ok(_) => debug!(%key, run_id = %prev.run_id, "Superseded run finished"),
                Err(_) => warn!(
                    %key,
                    run_id = %prev.run_id,
                    "Superseded run did not finish within {:?}",
                    self.wind_down
                ),
            }
        }

        RunLease {
            key,
            run_id,
            token,
            finished: finished_tx,
            gatekeeper: Arc::clone(self),
        }
    }

    /// Returns true if `run_id` is the current holder of `key`.
    #[must_use]
    pub fn is_holder(&self, key: &RunKey, run_id: Uuid) -> bool {
        self.active.get(key).is_some_and(|a| a.run_id == run_id)
    }

    /// Returns the run currently holding `key`.
    #[must_use]
    pub fn holder(&self, key: &RunKey) -> Option<Uuid> {
        self.active.get(key).map(|a| a.run_id)
    }

    /// Returns the number of keys with an active run.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn release(&self, key: &RunKey, run_id: Uuid) {
        if self.active.remove_if(key, |_, a| a.run_id == run_id).is_some() {
            debug!(%key, %run_id, "Released run key");
        }
    }
}

/// Proof of admission. Dropping it releases the key and signals any
/// successor waiting on this run.
#[derive(Debug)]
pub struct RunLease {
    key: RunKey,
    run_id: Uuid,
    token: Arc<CancellationToken>,
    finished: watch::Sender<bool>,
    gatekeeper: Arc<Gatekeeper>,
}

impl RunLease {
    /// The key this lease holds.
    #[must_use]
    pub fn key(&self) -> &RunKey {
        &self.key
    }

    /// The admitted run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Cancelled when a newer run supersedes this one.
    #[must_use]
    pub fn token(&self) -> Arc<CancellationToken> {
        self.token.clone()
    }

    /// Returns a probe answering whether this run still holds its key.
    #[must_use]
    pub fn holder_check(&self) -> HolderCheck {
        HolderCheck {
            key: self.key.clone(),
            run_id: self.run_id,
            gatekeeper: self.gatekeeper.clone(),
        }
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.gatekeeper.release(&self.key, self.run_id);
        self.finished.send_replace(true);
    }
}

/// Answers whether a run is still the active holder of its key.
#[derive(Debug, Clone)]
pub struct HolderCheck {
    key: RunKey,
    run_id: Uuid,
    gatekeeper: Arc<Gatekeeper>,
}

impl HolderCheck {
    /// Returns true if no newer sibling run has been admitted.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.gatekeeper.is_holder(&self.key, self.run_id)
    }
}
