use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::cache::{CommitOutcome, ComposedArtifact};
use crate::execute::ExecuteError;
use crate::fingerprint::Fingerprint;
use crate::plan::{PlanError, StepKind};

/// Lifecycle of a single build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildState {
  Planning,
  Probing,
  Executing,
  Finalizing,
  Succeeded,
  Failed,
}

impl fmt::Display for BuildState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BuildState::Planning => "planning",
      BuildState::Probing => "probing",
      BuildState::Executing => "executing",
      BuildState::Finalizing => "finalizing",
      BuildState::Succeeded => "succeeded",
      BuildState::Failed => "failed",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStatus {
  Hit,
  Miss,
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
  pub index: usize,
  pub kind: StepKind,
  pub fingerprint: Fingerprint,
  pub status: CacheStatus,
  pub duration: Duration,
  /// Set for executed steps.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub commit: Option<CommitOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
  pub artifact: ComposedArtifact,
  pub steps: Vec<StepRecord>,
  pub duration: Duration,
}

impl BuildResult {
  pub fn hits(&self) -> usize {
    self.steps.iter().filter(|s| s.status == CacheStatus::Hit).count()
  }

  pub fn misses(&self) -> usize {
    self.steps.iter().filter(|s| s.status == CacheStatus::Miss).count()
  }

  pub fn statuses(&self) -> Vec<CacheStatus> {
    self.steps.iter().map(|s| s.status).collect()
  }
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("planning failed: {0}")]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Execution(#[from] ExecuteError),

  #[error("build cancelled before step {step} completed")]
  Cancelled { step: usize },
}

/// A failed build, with the records of the steps that finished first.
/// Steps committed before the failure stay in the store.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct BuildFailure {
  #[source]
  pub error: BuildError,
  pub failed_in: BuildState,
  pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
  /// Wait for another build in this process that is producing the same
  /// fingerprint instead of executing it again.
  pub wait_for_inflight: bool,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self { wait_for_inflight: true }
  }
}

/// Requests cancellation of a running build. Checked between steps; a step
/// already executing runs to completion but its artifact is not committed.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
  cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}
