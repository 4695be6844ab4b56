//! `file-copy`: copy sources from the build context into the rootfs.
//!
//! Sources are applied in declaration order, so a later source overwrites an
//! earlier one at the same destination. A directory source contributes its
//! contents. The destination is a directory when it ends in `/`, when there
//! are several sources, or when the single source is a directory; otherwise it
//! names the target file.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use super::StepAction;
use crate::cache::remove_any;
use crate::execute::types::{ActionContext, ActionError, ActionOutput, blocking};
use crate::plan::{CopySpec, StepParams};
use crate::util::hash::relative_key;

#[derive(Debug, Clone, Copy, Default)]
pub struct FileCopyAction;

#[async_trait]
impl StepAction for FileCopyAction {
  async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError> {
    let StepParams::FileCopy(spec) = &ctx.step.params else {
      return Err(ActionError::InvalidParams { kind: ctx.step.kind });
    };

    let spec = spec.clone();
    let context_dir = ctx.context_dir.to_path_buf();
    let rootfs = ctx.rootfs.to_path_buf();
    let changed = blocking("copy into", ctx.rootfs, move || copy_sources(&spec, &context_dir, &rootfs)).await?;

    Ok(ActionOutput {
      changed,
      ..Default::default()
    })
  }
}

fn copy_sources(spec: &CopySpec, context_dir: &Path, rootfs: &Path) -> Result<BTreeSet<String>, ActionError> {
  let mut resolved = Vec::with_capacity(spec.sources.len());
  for source in &spec.sources {
    let full = context_dir.join(source);
    if fs::symlink_metadata(&full).is_err() {
      return Err(ActionError::MissingSource { path: full });
    }
    resolved.push(full);
  }

  let dest_rel = spec.destination.trim_start_matches('/');
  let dest = rootfs.join(dest_rel);
  let into_dir = spec.destination.ends_with('/') || resolved.len() > 1 || resolved.first().is_some_and(|p| p.is_dir());

  let mut changed = BTreeSet::new();
  if into_dir {
    create_dirs(rootfs, &dest, &mut changed)?;
  } else if let Some(parent) = dest.parent() {
    create_dirs(rootfs, parent, &mut changed)?;
  }

  for source in &resolved {
    if source.is_dir() {
      copy_dir_contents(source, &dest, rootfs, &mut changed)?;
    } else {
      let target = if into_dir {
        match source.file_name() {
          Some(name) => dest.join(name),
          None => return Err(ActionError::MissingSource { path: source.clone() }),
        }
      } else {
        dest.clone()
      };
      copy_file(source, &target, rootfs, &mut changed)?;
    }
  }

  debug!(sources = resolved.len(), dest = %spec.destination, changed = changed.len(), "copied sources");
  Ok(changed)
}

/// Place each declared context path at the same relative path inside the
/// rootfs, returning every path written.
pub(super) fn stage_declared(paths: &[String], context_dir: &Path, rootfs: &Path) -> Result<BTreeSet<String>, ActionError> {
  let mut changed = BTreeSet::new();
  for rel in paths {
    let src = context_dir.join(rel);
    let target = rootfs.join(rel);
    let meta = fs::symlink_metadata(&src).map_err(|_| ActionError::MissingSource { path: src.clone() })?;

    if meta.is_dir() {
      create_dirs(rootfs, &target, &mut changed)?;
      copy_dir_contents(&src, &target, rootfs, &mut changed)?;
    } else {
      if let Some(parent) = target.parent() {
        create_dirs(rootfs, parent, &mut changed)?;
      }
      copy_file(&src, &target, rootfs, &mut changed)?;
    }
  }
  Ok(changed)
}

fn copy_dir_contents(src: &Path, dest: &Path, rootfs: &Path, changed: &mut BTreeSet<String>) -> Result<(), ActionError> {
  for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| ActionError::Io {
      op: "read",
      path: src.to_path_buf(),
      source: e.into(),
    })?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dest.join(rel);

    if entry.file_type().is_dir() {
      create_dirs(rootfs, &target, changed)?;
    } else {
      copy_file(entry.path(), &target, rootfs, changed)?;
    }
  }
  Ok(())
}

/// Create `dir` and any missing parents, recording each one created.
fn create_dirs(rootfs: &Path, dir: &Path, changed: &mut BTreeSet<String>) -> Result<(), ActionError> {
  let mut missing: Vec<PathBuf> = Vec::new();
  let mut cursor = Some(dir);
  while let Some(path) = cursor {
    if path == rootfs || fs::symlink_metadata(path).is_ok_and(|m| m.is_dir()) {
      break;
    }
    missing.push(path.to_path_buf());
    cursor = path.parent();
  }

  for path in missing.iter().rev() {
    if fs::symlink_metadata(path).is_ok() {
      remove_any(path).map_err(ActionError::io("replace", path))?;
      changed.insert(relative_key(rootfs, path));
    }
    fs::create_dir(path).map_err(ActionError::io("create", path))?;
    changed.insert(relative_key(rootfs, path));
  }
  Ok(())
}

fn copy_file(src: &Path, target: &Path, rootfs: &Path, changed: &mut BTreeSet<String>) -> Result<(), ActionError> {
  if fs::symlink_metadata(target).is_ok_and(|m| m.is_dir()) {
    remove_any(target).map_err(ActionError::io("replace", target))?;
  }
  fs::copy(src, target).map_err(ActionError::io("copy", src))?;
  changed.insert(relative_key(rootfs, target));
  Ok(())
}
