//! `system-package-install` and `dependency-install`.
//!
//! Both kinds hand their command line to a [`PackageManager`]; the engine
//! never interprets what the command installs. Files declared on the step are
//! copied into the rootfs at their context-relative paths first, so the
//! command can read them, and they become part of the step's layer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::StepAction;
use super::copy::stage_declared;
use crate::execute::types::{ActionContext, ActionError, ActionOutput, blocking};
use crate::fingerprint::InputDescriptor;
use crate::plan::StepParams;

/// One package-manager invocation.
#[derive(Debug, Clone)]
pub struct InstallRequest<'a> {
  /// Working directory: the step's rootfs.
  pub workdir: &'a Path,
  pub command: &'a [String],
  pub env: &'a BTreeMap<String, String>,
  /// `PATH` for the invocation.
  pub path: &'a str,
}

/// External collaborator that installs packages into a working directory and
/// reports the paths it changed, relative to that directory.
#[async_trait]
pub trait PackageManager: Send + Sync {
  async fn install(&self, request: InstallRequest<'_>) -> Result<BTreeSet<String>, ActionError>;
}

pub struct InstallAction {
  manager: Arc<dyn PackageManager>,
}

impl InstallAction {
  pub fn new(manager: Arc<dyn PackageManager>) -> Self {
    Self { manager }
  }
}

#[async_trait]
impl StepAction for InstallAction {
  async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError> {
    let StepParams::Install(spec) = &ctx.step.params else {
      return Err(ActionError::InvalidParams { kind: ctx.step.kind });
    };

    let declared: Vec<String> = ctx
      .step
      .inputs
      .iter()
      .filter_map(|input| match input {
        InputDescriptor::Path { path, .. } => Some(path.clone()),
        InputDescriptor::Literal { .. } => None,
      })
      .collect();

    let mut changed = BTreeSet::new();
    if !declared.is_empty() {
      let context_dir = ctx.context_dir.to_path_buf();
      let rootfs = ctx.rootfs.to_path_buf();
      changed = blocking("stage inputs into", ctx.rootfs, move || {
        stage_declared(&declared, &context_dir, &rootfs)
      })
      .await?;
      debug!(step = ctx.step.index, staged = changed.len(), "staged declared files");
    }

    changed.extend(
      self
        .manager
        .install(InstallRequest {
          workdir: ctx.rootfs,
          command: &spec.command,
          env: &spec.env,
          path: &ctx.config.path,
        })
        .await?,
    );

    Ok(ActionOutput {
      changed,
      ..Default::default()
    })
  }
}
