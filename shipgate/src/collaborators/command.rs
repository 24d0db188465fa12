//! Process-backed collaborators.

use super::{Collaborators, CommitResolver, StopSignal};
use crate::config::OrchestratorConfig;
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs every verb as `program [base_args..] <verb> [args..]`.
///
/// Once bound to a run, a cancelled run sends the child SIGTERM and kills
/// it if it has not exited within the grace period. Children are also
/// killed when the invocation future is dropped.
#[derive(Clone)]
pub struct CommandCollaborator {
    program: PathBuf,
    base_args: Vec<String>,
    env: BTreeMap<String, String>,
    stop: Option<StopSignal>,
}

impl std::fmt::Debug for CommandCollaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCollaborator")
            .field("program", &self.program)
            .field("base_args", &self.base_args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("bound", &self.stop.is_some())
            .finish()
    }
}

enum Exit {
    Completed(std::io::Result<std::process::ExitStatus>),
    Stopped,
}

impl CommandCollaborator {
    /// Creates a collaborator that invokes `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            env: BTreeMap::new(),
            stop: None,
        }
    }

    /// Creates a collaborator whose children see the configured registry
    /// (as `SHIPGATE_REGISTRY`) and secrets in their environment.
    #[must_use]
    pub fn from_config(program: impl Into<PathBuf>, config: &OrchestratorConfig) -> Self {
        Self::new(program).with_env(&config.collaborator_env())
    }

    /// Adds arguments placed before the verb.
    #[must_use]
    pub fn with_base_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds environment variables.
    #[must_use]
    pub fn with_env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Invokes a verb and returns its standard output.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError::Launch`] if the process cannot be
    /// spawned, [`CollaboratorError::NonZeroExit`] on a failing status and
    /// [`CollaboratorError::Cancelled`] if the bound run was cancelled.
    pub async fn invoke(&self, verb: &str, args: &[&str]) -> Result<String, CollaboratorError> {
        debug!(program = %self.program.display(), verb, ?args, "Invoking collaborator");

        let launch_error = |e: std::io::Error| CollaboratorError::Launch {
            verb: verb.to_string(),
            reason: e.to_string(),
        };

        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .arg(verb)
            .args(args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_error)?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let exit = match &self.stop {
            Some(stop) => tokio::select! {
                biased;
                status = child.wait() => Exit::Completed(status),
                () = stop.token.cancelled() => Exit::Stopped,
            },
            None => Exit::Completed(child.wait().await),
        };

        let status = match exit {
            Exit::Completed(status) => status.map_err(launch_error)?,
            Exit::Stopped => {
                let grace = self.stop.as_ref().map_or(Duration::ZERO, |s| s.grace);
                info!(verb, "run cancelled; terminating collaborator");
                terminate(&mut child, grace).await;
                stdout.abort();
                stderr.abort();
                return Err(CollaboratorError::Cancelled(verb.to_string()));
            }
        };

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();

        if status.success() {
            Ok(String::from_utf8_lossy(&stdout).into_owned())
        } else {
            Err(CollaboratorError::NonZeroExit {
                verb: verb.to_string(),
                code: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            })
        }
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                debug!(error = %e, "collaborator pipe closed early");
            }
        }
        buf
    })
}

/// Asks the child to exit, waits up to `grace`, then kills it.
async fn terminate(child: &mut Child, grace: Duration) {
    if request_exit(child, grace).await {
        return;
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill collaborator");
    }
}

/// Sends SIGTERM and waits up to `grace`. Returns true if the child exited.
#[cfg(unix)]
async fn request_exit(child: &mut Child, grace: Duration) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(pid, error = %e, "failed to signal collaborator");
        return false;
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            debug!(pid, ?status, "collaborator exited after SIGTERM");
            true
        }
        Err(_) => {
            warn!(pid, "collaborator ignored SIGTERM; killing");
            false
        }
    }
}

#[cfg(not(unix))]
async fn request_exit(_child: &mut Child, _grace: Duration) -> bool {
    false
}

#[async_trait]
impl Collaborators for CommandCollaborator {
    fn bind(self: Arc<Self>, stop: StopSignal) -> Arc<dyn Collaborators> {
        let mut bound = (*self).clone();
        bound.stop = Some(stop);
        Arc::new(bound)
    }

    async fn build_artifact(
        &self,
        dependency_tag: &str,
        primary_tag: &str,
        source_branch: &str,
    ) -> Result<(), CollaboratorError> {
        self.invoke("build_artifact", &[dependency_tag, primary_tag, source_branch])
            .await
            .map(drop)
    }

    async fn publish_artifact(&self, primary_tag: &str) -> Result<(), CollaboratorError> {
        self.invoke("publish_artifact", &[primary_tag]).await.map(drop)
    }

    async fn provision_test_environment(
        &self,
        run_id: &str,
        primary_tag: &str,
        dependency_tag: &str,
    ) -> Result<(), CollaboratorError> {
        self.invoke(
            "provision_test_environment",
            &[run_id, primary_tag, dependency_tag],
        )
        .await
        .map(drop)
    }

    async fn run_extended_tests(&self, run_id: &str) -> Result<String, CollaboratorError> {
        self.invoke("run_extended_tests", &[run_id]).await
    }

    async fn destroy_test_environment(&self, run_id: &str) -> Result<(), CollaboratorError> {
        self.invoke("destroy_test_environment", &[run_id]).await.map(drop)
    }

    async fn deploy_check(
        &self,
        primary_tag: &str,
        dependency_tag: &str,
        source_branch: &str,
    ) -> Result<(), CollaboratorError> {
        self.invoke("deploy_check", &[primary_tag, dependency_tag, source_branch])
            .await
            .map(drop)
    }

    async fn collect_logs(&self) -> Result<String, CollaboratorError> {
        self.invoke("collect_logs", &[]).await
    }

    async fn stop_environment(&self) -> Result<(), CollaboratorError> {
        self.invoke("stop_environment", &[]).await.map(drop)
    }

    async fn finalize_artifact(
        &self,
        primary_tag: &str,
        resolved_ref: &str,
    ) -> Result<(), CollaboratorError> {
        self.invoke("finalize_artifact", &[primary_tag, resolved_ref])
            .await
            .map(drop)
    }

    async fn notify(&self, channel: &str, build_url: &str) -> Result<(), CollaboratorError> {
        self.invoke("notify", &[channel, build_url]).await.map(drop)
    }
}

/// Resolves commits with `git rev-parse` inside a checkout.
#[derive(Debug, Clone)]
pub struct GitCommitResolver {
    repo: PathBuf,
}

impl GitCommitResolver {
    /// Creates a resolver for the repository at `repo`.
    #[must_use]
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }
}

#[async_trait]
impl CommitResolver for GitCommitResolver {
    async fn resolve_commit(&self, rev: &str) -> Result<String, CollaboratorError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{rev}^{{commit}}"))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CollaboratorError::Launch {
                verb: "resolve_commit".to_string(),
                reason: e.to_string(),
            })?;

        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || sha.is_empty() {
            return Err(CollaboratorError::CommitNotFound(rev.to_string()));
        }
        Ok(sha)
    }
}

#[async_trait]
impl CommitResolver for CommandCollaborator {
    async fn resolve_commit(&self, rev: &str) -> Result<String, CollaboratorError> {
        let sha = match self.invoke("resolve_commit", &[rev]).await {
            Ok(out) => out.trim().to_string(),
            Err(CollaboratorError::NonZeroExit { .. }) => String::new(),
            Err(e) => return Err(e),
        };
        if sha.is_empty() {
            return Err(CollaboratorError::CommitNotFound(rev.to_string()));
        }
        Ok(sha)
    }
}
