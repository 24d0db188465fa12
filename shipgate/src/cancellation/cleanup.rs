//! Cleanup registry for scoped teardown.
//!
//! Anything a stage acquires that must be released regardless of how the
//! stage ends (provisioned test infrastructure, running environments) is
//! registered here. The owning run drains the registry when it finishes,
//! including after forced cancellation.
//!
//! A stage that tears down on its own path uses [`CleanupRegistry::run_now`].
//! The teardown then runs on a detached task, so aborting the stage cannot
//! interrupt it, and the registry keeps tracking it until it completes.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Type alias for async cleanup callbacks.
pub type CleanupCallback = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// A teardown running on its own task. Resolves to false if the task panicked.
type InFlight = Shared<BoxFuture<'static, bool>>;

/// Registry for cleanup callbacks executed in LIFO order.
#[derive(Default)]
pub struct CleanupRegistry {
    callbacks: Mutex<Vec<(String, CleanupCallback)>>,
    in_flight: Mutex<Vec<(String, InFlight)>>,
}

impl CleanupRegistry {
    /// Creates a new cleanup registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named cleanup callback.
    pub fn register<F, Fut>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(cleanup = %name, "Registered cleanup");
        let boxed: CleanupCallback = Box::new(move || Box::pin(callback()));
        self.callbacks.lock().push((name, boxed));
    }

    /// Takes a callback by name without running it.
    ///
    /// The caller becomes responsible for the release.
    pub fn take(&self, name: &str) -> Option<CleanupCallback> {
        let mut callbacks = self.callbacks.lock();
        let idx = callbacks.iter().position(|(n, _)| n == name)?;
        Some(callbacks.remove(idx).1)
    }

    /// Runs a registered callback now and waits for it.
    ///
    /// The callback runs on a spawned task and stays visible to
    /// [`CleanupRegistry::run_all`] until it finishes, even if the caller
    /// is dropped mid-way. Returns false if no callback has that name or the
    /// callback panicked.
    pub async fn run_now(&self, name: &str) -> bool {
        let task = {
            let Some(callback) = self.take(name) else {
                return false;
            };
            let task: InFlight = tokio::spawn(callback())
                .map(|joined| joined.is_ok())
                .boxed()
                .shared();
            self.in_flight.lock().push((name.to_string(), task.clone()));
            task
        };

        let completed = task.await;
        self.in_flight.lock().retain(|(n, _)| n != name);
        debug!(cleanup = %name, completed, "Ran cleanup");
        completed
    }

    /// Returns the number of pending cleanup callbacks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Returns the number of callbacks started by `run_now` that have not
    /// finished yet.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Returns the names of pending callbacks in registration order.
    #[must_use]
    pub fn pending_names(&self) -> Vec<String> {
        self.callbacks.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Waits for in-flight teardowns, then runs all pending callbacks in
    /// LIFO order.
    ///
    /// Each callback gets an equal share of `total`. A timed-out callback
    /// does not stop the remaining ones. The registry is empty afterwards.
    /// Returns (completed, failed) callback names.
    pub async fn run_all(&self, total: Duration) -> (Vec<String>, Vec<(String, String)>) {
        let in_flight: Vec<_> = std::mem::take(&mut *self.in_flight.lock());
        let callbacks: Vec<_> = std::mem::take(&mut *self.callbacks.lock());

        let count = in_flight.len() + callbacks.len();
        if count == 0 {
            return (Vec::new(), Vec::new());
        }

        let per_callback =
            (total / u32::try_from(count).unwrap_or(u32::MAX)).max(Duration::from_millis(10));

        let mut completed = Vec::new();
        let mut failed = Vec::new();

        for (name, task) in in_flight {
            match timeout(per_callback, task).await {
                Ok(true) => completed.push(name),
                Ok(false) => {
                    warn!(cleanup = %name, "Cleanup task panicked");
                    failed.push((name, "Panicked".to_string()));
                }
                Err(_) => {
                    warn!(cleanup = %name, "In-flight cleanup timed out");
                    failed.push((name, "Timeout".to_string()));
                }
            }
        }

        for (name, callback) in callbacks.into_iter().rev() {
            match timeout(per_callback, callback()).await {
                Ok(()) => completed.push(name),
                Err(_) => {
                    warn!(cleanup = %name, "Cleanup callback timed out");
                    failed.push((name, "Timeout".to_string()));
                }
            }
        }

        (completed, failed)
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending", &self.pending_names())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}
