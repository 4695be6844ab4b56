//! Working filesystems and change detection.
//!
//! A [`Rootfs`] is a scratch directory holding the filesystem state a step
//! runs against. Deltas are computed by comparing content snapshots, never
//! timestamps.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

use super::types::ActionError;
use crate::cache::{CachedArtifact, FsDelta, FsEntry, is_executable};
use crate::util::hash::{ContentHash, DirHashError, hash_file, relative_key};

/// A scratch filesystem, deleted on drop.
#[derive(Debug)]
pub struct Rootfs {
  dir: TempDir,
}

impl Rootfs {
  /// An empty filesystem, for the base step.
  pub fn empty(scratch: Option<&Path>) -> Result<Self, ActionError> {
    let parent = scratch.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
    fs::create_dir_all(&parent).map_err(ActionError::io("create", &parent))?;
    let dir = tempfile::Builder::new()
      .prefix("layercake-rootfs-")
      .tempdir_in(&parent)
      .map_err(ActionError::io("create rootfs in", &parent))?;
    Ok(Self { dir })
  }

  /// Replay `layers` (base first) into a fresh filesystem.
  pub fn materialize(layers: &[CachedArtifact], scratch: Option<&Path>) -> Result<Self, ActionError> {
    let rootfs = Self::empty(scratch)?;
    for layer in layers {
      layer
        .apply_to(rootfs.path())
        .map_err(ActionError::io("apply layer to", rootfs.path()))?;
    }
    debug!(layers = layers.len(), path = %rootfs.path().display(), "materialized rootfs");
    Ok(rootfs)
  }

  pub fn path(&self) -> &Path {
    self.dir.path()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
  File { digest: ContentHash, executable: bool },
  Dir,
  Symlink(String),
}

pub type TreeSnapshot = BTreeMap<String, NodeState>;

/// Record the state of every path below `root`.
pub fn snapshot(root: &Path) -> Result<TreeSnapshot, DirHashError> {
  let mut nodes = TreeSnapshot::new();

  for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| DirHashError::WalkDir {
      path: root.display().to_string(),
      message: e.to_string(),
    })?;
    let rel = relative_key(root, entry.path());
    let file_type = entry.file_type();

    let state = if file_type.is_symlink() {
      let target = fs::read_link(entry.path()).map_err(|e| DirHashError::ReadSymlink {
        path: entry.path().display().to_string(),
        message: e.to_string(),
      })?;
      NodeState::Symlink(target.to_string_lossy().into_owned())
    } else if file_type.is_dir() {
      NodeState::Dir
    } else {
      let meta = entry.metadata().map_err(|e| DirHashError::ReadFile {
        path: entry.path().display().to_string(),
        message: e.to_string(),
      })?;
      NodeState::File {
        digest: hash_file(entry.path())?,
        executable: is_executable(&meta),
      }
    };
    nodes.insert(rel, state);
  }

  Ok(nodes)
}

/// Paths whose state differs between two snapshots.
pub fn diff(before: &TreeSnapshot, after: &TreeSnapshot) -> BTreeSet<String> {
  let mut changed = BTreeSet::new();
  for (path, state) in after {
    if before.get(path) != Some(state) {
      changed.insert(path.clone());
    }
  }
  for path in before.keys() {
    if !after.contains_key(path) {
      changed.insert(path.clone());
    }
  }
  changed
}

/// Turn a set of changed paths into a delta by looking at what is on disk now.
/// Removals below an already removed directory are folded into it.
pub fn describe(root: &Path, changed: &BTreeSet<String>) -> Result<FsDelta, ActionError> {
  let mut delta = FsDelta::default();
  let mut removed: Vec<&str> = Vec::new();

  for rel in changed {
    let path = root.join(rel);
    let meta = match fs::symlink_metadata(&path) {
      Ok(meta) => meta,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        let covered = removed
          .iter()
          .any(|dir| rel.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/')));
        if !covered {
          delta.entries.insert(rel.clone(), FsEntry::Removed);
          removed.push(rel);
        }
        continue;
      }
      Err(e) => return Err(ActionError::io("inspect", &path)(e)),
    };

    let entry = if meta.file_type().is_symlink() {
      let target = fs::read_link(&path).map_err(ActionError::io("read link", &path))?;
      FsEntry::Symlink {
        target: target.to_string_lossy().into_owned(),
      }
    } else if meta.is_dir() {
      FsEntry::Dir
    } else {
      FsEntry::File {
        digest: hash_file(&path)?,
        size: meta.len(),
        executable: is_executable(&meta),
      }
    };
    delta.entries.insert(rel.clone(), entry);
  }

  Ok(delta)
}
