//! Step actions, one per step kind.
//!
//! - [`image`] - `base-image`, backed by an [`ImageProvider`]
//! - [`install`] - `system-package-install` and `dependency-install`, backed by a [`PackageManager`]
//! - [`cmd`] - the default [`PackageManager`], running commands in the rootfs
//! - [`copy`] - `file-copy`
//! - [`entrypoint`] - `entrypoint-config`

pub mod cmd;
pub mod copy;
pub mod entrypoint;
pub mod image;
pub mod install;

use async_trait::async_trait;

use super::types::{ActionContext, ActionError, ActionOutput};

pub use cmd::ShellPackageManager;
pub use copy::FileCopyAction;
pub use entrypoint::EntrypointAction;
pub use image::{BaseImageAction, DirectoryImages, ImageProvider, ScratchImages};
pub use install::{InstallAction, InstallRequest, PackageManager};

/// The side effect of one step kind.
///
/// Implementations mutate `ctx.rootfs` and report which paths they touched.
/// They must be deterministic for identical inputs; the result is cached
/// under the step's fingerprint.
#[async_trait]
pub trait StepAction: Send + Sync {
  async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError>;
}
