//! Types for step execution.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::cache::{CacheStoreError, Entrypoint};
use crate::fingerprint::Fingerprint;
use crate::plan::{BuildStep, StepKind};
use crate::util::hash::DirHashError;

/// Configuration for step execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Upper bound on a single step's action, external processes included.
  pub timeout: Duration,

  /// `PATH` handed to install commands. Everything else in the environment
  /// is cleared.
  pub path: String,

  /// Where working filesystems are assembled. Defaults to the system temp dir.
  pub scratch_dir: Option<PathBuf>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30 * 60),
      path: std::env::var("PATH").unwrap_or_else(|_| default_path().to_string()),
      scratch_dir: None,
    }
  }
}

#[cfg(unix)]
fn default_path() -> &'static str {
  "/usr/local/bin:/usr/bin:/bin"
}

#[cfg(windows)]
fn default_path() -> &'static str {
  r"C:\Windows\System32;C:\Windows"
}

/// Why a step's action failed.
#[derive(Debug, Error)]
pub enum ActionError {
  #[error("timed out after {timeout:?}")]
  Timeout { timeout: Duration },

  #[error("command `{command}` exited with code {code:?}")]
  CommandFailed {
    command: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("failed to spawn `{command}`: {source}")]
  Spawn {
    command: String,
    #[source]
    source: io::Error,
  },

  #[error("source path {path} does not exist")]
  MissingSource { path: PathBuf },

  #[error("base image '{image}' not found")]
  ImageNotFound { image: String },

  #[error("no action registered for {kind}")]
  NoAction { kind: StepKind },

  #[error("parameters do not match step kind {kind}")]
  InvalidParams { kind: StepKind },

  #[error("failed to {op} {path}: {source}")]
  Io {
    op: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to scan filesystem: {0}")]
  Scan(#[from] DirHashError),

  #[error("cache store: {0}")]
  CacheStore(#[from] CacheStoreError),
}

impl ActionError {
  pub(crate) fn io(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
    let path = path.to_path_buf();
    move |source| ActionError::Io { op, path, source }
  }
}

/// Run filesystem work on Tokio's blocking pool.
pub(crate) async fn blocking<T, F>(op: &'static str, path: &Path, work: F) -> Result<T, ActionError>
where
  F: FnOnce() -> Result<T, ActionError> + Send + 'static,
  T: Send + 'static,
{
  tokio::task::spawn_blocking(work).await.map_err(|e| ActionError::Io {
    op,
    path: path.to_path_buf(),
    source: io::Error::other(e),
  })?
}

/// A step failed. Carries the step position so callers can report and retry.
#[derive(Debug, Error)]
#[error("step {step} ({kind}) failed: {cause}")]
pub struct ExecuteError {
  pub step: usize,
  pub kind: StepKind,
  pub fingerprint: Fingerprint,
  #[source]
  pub cause: ActionError,
}

impl ExecuteError {
  pub fn new(step: &BuildStep, cause: impl Into<ActionError>) -> Self {
    Self {
      step: step.index,
      kind: step.kind,
      fingerprint: step.fingerprint,
      cause: cause.into(),
    }
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self.cause, ActionError::Timeout { .. })
  }
}

/// Everything an action may look at while running.
#[derive(Debug)]
pub struct ActionContext<'a> {
  pub step: &'a BuildStep,
  /// Working filesystem holding the output of every earlier step. Actions
  /// mutate it in place.
  pub rootfs: &'a Path,
  /// Build context that `file-copy` sources are resolved against.
  pub context_dir: &'a Path,
  pub config: &'a ExecuteConfig,
}

/// What an action reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
  /// Paths under the rootfs (relative, `/`-separated) the action created,
  /// modified or deleted.
  pub changed: BTreeSet<String>,
  pub image: Option<String>,
  pub entrypoint: Option<Entrypoint>,
}
