//! `base-image`: unpack an image into the empty rootfs.
//!
//! Images are resolved by an [`ImageProvider`]. Pulling from registries is
//! out of scope; the built-in providers either start from nothing or copy a
//! directory tree.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use super::StepAction;
use crate::execute::rootfs;
use crate::execute::types::{ActionContext, ActionError, ActionOutput, blocking};
use crate::plan::StepParams;

#[async_trait]
pub trait ImageProvider: Send + Sync {
  /// Populate `dest` with the filesystem of `image`.
  async fn unpack(&self, image: &str, dest: &Path) -> Result<(), ActionError>;
}

/// Every image is an empty filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScratchImages;

#[async_trait]
impl ImageProvider for ScratchImages {
  async fn unpack(&self, image: &str, _dest: &Path) -> Result<(), ActionError> {
    debug!(image, "using empty root for image");
    Ok(())
  }
}

/// Images stored as plain directories: `python:3.12` resolves to
/// `<root>/python/3.12`, and an untagged name to `<root>/<name>/latest`.
#[derive(Debug, Clone)]
pub struct DirectoryImages {
  root: PathBuf,
}

impl DirectoryImages {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn resolve(&self, image: &str) -> Option<PathBuf> {
    let (name, tag) = image.rsplit_once(':').unwrap_or((image, "latest"));
    if name.is_empty() || tag.is_empty() || name.split('/').any(|part| part == ".." || part.is_empty()) || tag.contains('/') {
      return None;
    }
    let dir = self.root.join(name).join(tag);
    dir.is_dir().then_some(dir)
  }
}

#[async_trait]
impl ImageProvider for DirectoryImages {
  async fn unpack(&self, image: &str, dest: &Path) -> Result<(), ActionError> {
    let src = self.resolve(image).ok_or_else(|| ActionError::ImageNotFound {
      image: image.to_string(),
    })?;
    let target = dest.to_path_buf();
    blocking("unpack image into", dest, move || copy_tree(&src, &target)).await
  }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<(), ActionError> {
  for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| ActionError::Io {
      op: "read image",
      path: src.to_path_buf(),
      source: e.into(),
    })?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dest.join(rel);

    if entry.file_type().is_dir() {
      std::fs::create_dir_all(&target).map_err(ActionError::io("create", &target))?;
    } else if entry.file_type().is_symlink() {
      let link = std::fs::read_link(entry.path()).map_err(ActionError::io("read link", entry.path()))?;
      symlink(&link, &target).map_err(ActionError::io("create link", &target))?;
    } else {
      std::fs::copy(entry.path(), &target).map_err(ActionError::io("copy", entry.path()))?;
    }
  }
  Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
  std::os::windows::fs::symlink_file(target, link)
}

pub struct BaseImageAction {
  provider: Arc<dyn ImageProvider>,
}

impl BaseImageAction {
  pub fn new(provider: Arc<dyn ImageProvider>) -> Self {
    Self { provider }
  }
}

#[async_trait]
impl StepAction for BaseImageAction {
  async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError> {
    let StepParams::BaseImage { image } = &ctx.step.params else {
      return Err(ActionError::InvalidParams { kind: ctx.step.kind });
    };

    self.provider.unpack(image, ctx.rootfs).await?;
    let root = ctx.rootfs.to_path_buf();
    let changed = blocking("scan", ctx.rootfs, move || Ok(rootfs::snapshot(&root)?.into_keys().collect::<BTreeSet<_>>())).await?;

    Ok(ActionOutput {
      changed,
      image: Some(image.clone()),
      entrypoint: None,
    })
  }
}
