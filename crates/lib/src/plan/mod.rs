//! Step planning.
//!
//! Turns a declarative [`BuildDescriptor`] into an immutable [`BuildPlan`]:
//! an ordered chain of steps with resolved inputs and eagerly computed
//! fingerprints. Planning never executes anything; a plan that fails here
//! leaves no trace in the cache store.
//!
//! # Submodules
//!
//! - [`descriptor`] - descriptor schema and JSON/YAML loading

pub mod descriptor;
mod types;

pub use descriptor::{BuildDescriptor, StepSpec};
pub use types::*;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PlanError {
  #[error("failed to read build descriptor {path}: {source}")]
  ReadDescriptor {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse build descriptor {path}: {message}")]
  ParseDescriptor { path: PathBuf, message: String },

  #[error("build descriptor has no steps")]
  EmptyPlan,

  #[error("step {index}: unknown step kind '{kind}'")]
  UnknownStepKind { index: usize, kind: String },

  #[error("first step must be base-image, found {kind}")]
  MissingBase { kind: StepKind },

  #[error("step {index}: base-image is only allowed as the first step")]
  MisplacedBase { index: usize },

  #[error("step {index}: {message}")]
  InvalidStep { index: usize, message: String },

  #[error("input {path} is unreadable: {message}")]
  InputUnreadable { path: PathBuf, message: String },
}

/// Plan a build from a descriptor, resolving file inputs against `context_dir`.
pub fn plan(descriptor: &BuildDescriptor, context_dir: &Path) -> Result<BuildPlan, PlanError> {
  let drafts = descriptor.drafts()?;
  let plan = BuildPlan::from_drafts(context_dir, drafts)?;

  for step in plan.steps() {
    debug!(
      step = step.index,
      kind = %step.kind,
      fingerprint = %step.fingerprint.short(),
      inputs = step.inputs.len(),
      "planned step"
    );
  }
  info!(steps = plan.len(), fingerprint = %plan.final_fingerprint().short(), "build planned");

  Ok(plan)
}

/// Load a descriptor file and plan it. The context defaults to the
/// descriptor's directory.
pub fn plan_file(path: &Path, context_dir: Option<&Path>) -> Result<BuildPlan, PlanError> {
  let descriptor = BuildDescriptor::load(path)?;
  let context = match context_dir {
    Some(dir) => dir.to_path_buf(),
    None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
  };
  plan(&descriptor, &context)
}
