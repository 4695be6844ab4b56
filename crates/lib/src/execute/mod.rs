//! Step execution.
//!
//! The [`Executor`] runs one step's action against a working filesystem and
//! captures what changed as a layer in a cache staging area. It is only
//! invoked on cache misses and never retries; retry policy belongs to the
//! orchestrator.
//!
//! Actions are looked up by [`StepKind`], so new kinds or alternative
//! package managers plug in through [`ExecutorBuilder`] without touching the
//! orchestrator.
//!
//! # Submodules
//!
//! - [`actions`] - the [`StepAction`] trait and its built-in implementations
//! - [`rootfs`] - working filesystems, snapshots and delta capture

pub mod actions;
pub mod rootfs;
mod types;

pub use actions::{ImageProvider, PackageManager, StepAction};
pub use rootfs::Rootfs;
pub use types::*;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::cache::{Artifact, StagedArtifact, Staging, write_layer};
use crate::consts::STORE_FORMAT_VERSION;
use crate::plan::{BuildStep, StepKind};
use crate::util::now_unix_ms;
use actions::{
  BaseImageAction, EntrypointAction, FileCopyAction, InstallAction, ScratchImages, ShellPackageManager,
};

#[derive(Clone)]
pub struct Executor {
  actions: Arc<HashMap<StepKind, Arc<dyn StepAction>>>,
  config: ExecuteConfig,
}

impl std::fmt::Debug for Executor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut kinds: Vec<_> = self.actions.keys().map(StepKind::as_str).collect();
    kinds.sort();
    f.debug_struct("Executor")
      .field("kinds", &kinds)
      .field("config", &self.config)
      .finish()
  }
}

pub struct ExecutorBuilder {
  config: ExecuteConfig,
  images: Arc<dyn ImageProvider>,
  packages: Arc<dyn PackageManager>,
  overrides: HashMap<StepKind, Arc<dyn StepAction>>,
}

impl Default for ExecutorBuilder {
  fn default() -> Self {
    Self {
      config: ExecuteConfig::default(),
      images: Arc::new(ScratchImages),
      packages: Arc::new(ShellPackageManager),
      overrides: HashMap::new(),
    }
  }
}

impl ExecutorBuilder {
  pub fn config(mut self, config: ExecuteConfig) -> Self {
    self.config = config;
    self
  }

  pub fn images(mut self, images: impl ImageProvider + 'static) -> Self {
    self.images = Arc::new(images);
    self
  }

  /// Package manager used by both install kinds.
  pub fn package_manager(mut self, manager: impl PackageManager + 'static) -> Self {
    self.packages = Arc::new(manager);
    self
  }

  /// Replace the action for one kind.
  pub fn action(mut self, kind: StepKind, action: impl StepAction + 'static) -> Self {
    self.overrides.insert(kind, Arc::new(action));
    self
  }

  pub fn build(self) -> Executor {
    let install: Arc<dyn StepAction> = Arc::new(InstallAction::new(self.packages));
    let mut actions: HashMap<StepKind, Arc<dyn StepAction>> = HashMap::new();
    actions.insert(StepKind::BaseImage, Arc::new(BaseImageAction::new(self.images)));
    actions.insert(StepKind::SystemPackageInstall, Arc::clone(&install));
    actions.insert(StepKind::DependencyInstall, install);
    actions.insert(StepKind::FileCopy, Arc::new(FileCopyAction));
    actions.insert(StepKind::EntrypointConfig, Arc::new(EntrypointAction));
    actions.extend(self.overrides);

    Executor {
      actions: Arc::new(actions),
      config: self.config,
    }
  }
}

impl Executor {
  pub fn new(config: ExecuteConfig) -> Self {
    Self::builder().config(config).build()
  }

  pub fn builder() -> ExecutorBuilder {
    ExecutorBuilder::default()
  }

  pub fn config(&self) -> &ExecuteConfig {
    &self.config
  }

  /// Run `step` against `rootfs`, leaving the rootfs in the step's output
  /// state and the step's delta in `staging`.
  pub async fn execute(
    &self,
    step: &BuildStep,
    rootfs: &Rootfs,
    context_dir: &Path,
    staging: Staging,
  ) -> Result<StagedArtifact, ExecuteError> {
    let action = self
      .actions
      .get(&step.kind)
      .ok_or_else(|| ExecuteError::new(step, ActionError::NoAction { kind: step.kind }))?;

    let ctx = ActionContext {
      step,
      rootfs: rootfs.path(),
      context_dir,
      config: &self.config,
    };

    info!(step = step.index, kind = %step.kind, fingerprint = %step.fingerprint.short(), "executing step");
    let started = Instant::now();

    let output = match tokio::time::timeout(self.config.timeout, action.run(&ctx)).await {
      Ok(result) => result.map_err(|e| ExecuteError::new(step, e))?,
      Err(_) => {
        return Err(ExecuteError::new(
          step,
          ActionError::Timeout {
            timeout: self.config.timeout,
          },
        ));
      }
    };

    let root = rootfs.path().to_path_buf();
    let layer = staging.layer_dir();
    let changed = output.changed;
    let delta = blocking("write layer", &layer, {
      let layer = layer.clone();
      move || {
        let delta = rootfs::describe(&root, &changed)?;
        write_layer(&root, &delta, &layer).map_err(ActionError::io("write layer", &layer))?;
        Ok(delta)
      }
    })
    .await
    .map_err(|e| ExecuteError::new(step, e))?;

    debug!(
      step = step.index,
      paths = delta.len(),
      bytes = delta.size_bytes(),
      elapsed_ms = started.elapsed().as_millis() as u64,
      "step produced delta"
    );

    Ok(StagedArtifact {
      artifact: Artifact {
        version: STORE_FORMAT_VERSION,
        fingerprint: step.fingerprint,
        parent: step.parent,
        kind: step.kind,
        delta,
        image: output.image,
        entrypoint: output.entrypoint,
        created_at_unix_ms: now_unix_ms(),
      },
      staging,
    })
  }
}
