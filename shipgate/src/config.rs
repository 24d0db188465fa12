//! Orchestrator configuration.
//!
//! A config value is frozen into every run at creation; nothing in the
//! core reads the process environment.

use crate::errors::ShipgateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variable carrying [`OrchestratorConfig::registry`] to
/// collaborator processes.
pub const REGISTRY_ENV: &str = "SHIPGATE_REGISTRY";

/// Configuration for the orchestrator.
#[derive(Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Workflow identity, part of the single-flight key.
    #[serde(default = "default_workflow_name")]
    pub workflow_name: String,
    /// Rolling dependency tag used when no override commit is supplied.
    #[serde(default = "default_dependency_tag")]
    pub default_dependency_tag: String,
    /// Artifact registry location handed to collaborators.
    #[serde(default = "default_registry")]
    pub registry: String,
    /// Channel that receives failure notifications.
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,
    /// Build URL template; `{run_id}` is substituted.
    #[serde(default = "default_build_url_template")]
    pub build_url_template: String,
    /// Pull-request label that opts into the extended test suite.
    #[serde(default = "default_full_test_label")]
    pub full_test_label: String,
    /// Mainline branch names (without `refs/heads/`).
    #[serde(default = "default_mainline_branches")]
    pub mainline_branches: Vec<String>,
    /// How long a cancelled stage may take to wind down.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_seconds: f64,
    /// Upper bound for running teardown at the end of a run.
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_seconds: f64,
    /// Secrets handed to collaborators. Redacted in `Debug`.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

fn default_workflow_name() -> String {
    "build-test-deploy".to_string()
}

fn default_dependency_tag() -> String {
    "latest".to_string()
}

fn default_registry() -> String {
    "registry.local".to_string()
}

fn default_notify_channel() -> String {
    "#ci-failures".to_string()
}

fn default_build_url_template() -> String {
    "https://ci.local/runs/{run_id}".to_string()
}

fn default_full_test_label() -> String {
    "FullTestSuite".to_string()
}

fn default_mainline_branches() -> Vec<String> {
    vec!["develop".to_string(), "master".to_string()]
}

/// Longest accepted grace or teardown budget, in seconds.
const MAX_WAIT_SECONDS: f64 = 86_400.0;

fn default_cancel_grace() -> f64 {
    30.0
}

fn default_teardown_timeout() -> f64 {
    120.0
}

fn bounded_duration(field: &str, seconds: f64) -> Result<Duration, ShipgateError> {
    if !(0.0..=MAX_WAIT_SECONDS).contains(&seconds) {
        return Err(ShipgateError::Config(format!(
            "{field} must be between 0 and {MAX_WAIT_SECONDS} seconds"
        )));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| ShipgateError::Config(format!("{field}: {e}")))
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workflow_name: default_workflow_name(),
            default_dependency_tag: default_dependency_tag(),
            registry: default_registry(),
            notify_channel: default_notify_channel(),
            build_url_template: default_build_url_template(),
            full_test_label: default_full_test_label(),
            mainline_branches: default_mainline_branches(),
            cancel_grace_seconds: default_cancel_grace(),
            teardown_timeout_seconds: default_teardown_timeout(),
            secrets: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("workflow_name", &self.workflow_name)
            .field("default_dependency_tag", &self.default_dependency_tag)
            .field("registry", &self.registry)
            .field("notify_channel", &self.notify_channel)
            .field("build_url_template", &self.build_url_template)
            .field("full_test_label", &self.full_test_label)
            .field("mainline_branches", &self.mainline_branches)
            .field("cancel_grace_seconds", &self.cancel_grace_seconds)
            .field("teardown_timeout_seconds", &self.teardown_timeout_seconds)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ShipgateError::Config`] if the JSON is invalid or the
    /// resulting configuration fails [`OrchestratorConfig::validate`].
    pub fn from_json_str(json: &str) -> Result<Self, ShipgateError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ShipgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or
    /// [`ShipgateError::Config`] if it does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ShipgateError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks invariants the orchestrator depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ShipgateError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<(), ShipgateError> {
        if self.workflow_name.trim().is_empty() {
            return Err(ShipgateError::Config("workflow_name cannot be empty".into()));
        }
        if self.default_dependency_tag.trim().is_empty() {
            return Err(ShipgateError::Config(
                "default_dependency_tag cannot be empty".into(),
            ));
        }
        let grace = bounded_duration("cancel_grace_seconds", self.cancel_grace_seconds)?;
        let teardown =
            bounded_duration("teardown_timeout_seconds", self.teardown_timeout_seconds)?;
        if teardown.is_zero() {
            return Err(ShipgateError::Config(
                "teardown_timeout_seconds must be positive".into(),
            ));
        }
        if grace.checked_add(teardown).is_none() {
            return Err(ShipgateError::Config(
                "cancel_grace_seconds plus teardown_timeout_seconds overflows".into(),
            ));
        }
        Ok(())
    }

    /// Sets the workflow name.
    #[must_use]
    pub fn with_workflow_name(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = name.into();
        self
    }

    /// Sets the rolling dependency tag.
    #[must_use]
    pub fn with_default_dependency_tag(mut self, tag: impl Into<String>) -> Self {
        self.default_dependency_tag = tag.into();
        self
    }

    /// Sets the artifact registry location.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Sets the notification channel.
    #[must_use]
    pub fn with_notify_channel(mut self, channel: impl Into<String>) -> Self {
        self.notify_channel = channel.into();
        self
    }

    /// Sets the cancellation grace period.
    #[must_use]
    pub fn with_cancel_grace(mut self, seconds: f64) -> Self {
        self.cancel_grace_seconds = seconds;
        self
    }

    /// Adds a secret.
    #[must_use]
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }

    /// Gets the cancellation grace period as a Duration.
    ///
    /// Falls back to the default for values `validate` would reject.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        bounded_duration("cancel_grace_seconds", self.cancel_grace_seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_cancel_grace()))
    }

    /// Gets the teardown budget as a Duration.
    ///
    /// Falls back to the default for values `validate` would reject.
    #[must_use]
    pub fn teardown_timeout(&self) -> Duration {
        bounded_duration("teardown_timeout_seconds", self.teardown_timeout_seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_teardown_timeout()))
    }

    /// How long a newer run waits for a superseded sibling to wind down.
    #[must_use]
    pub fn wind_down(&self) -> Duration {
        self.cancel_grace().saturating_add(self.teardown_timeout())
    }

    /// Environment exported to collaborator processes: the registry
    /// location plus every configured secret.
    #[must_use]
    pub fn collaborator_env(&self) -> BTreeMap<String, String> {
        let mut env = self.secrets.clone();
        env.insert(REGISTRY_ENV.to_string(), self.registry.clone());
        env
    }

    /// Renders the build URL for a run.
    #[must_use]
    pub fn build_url(&self, run_id: &uuid::Uuid) -> String {
        self.build_url_template
            .replace("{run_id}", &run_id.to_string())
    }
}
