//! Copying deltas into and out of layer directories.

use std::fs;
use std::io;
use std::path::Path;

use super::types::{FsDelta, FsEntry};

/// Copy every path the delta adds or changes from `root` into `layer`.
pub fn write_layer(root: &Path, delta: &FsDelta, layer: &Path) -> io::Result<()> {
  fs::create_dir_all(layer)?;

  for (rel, entry) in &delta.entries {
    let src = root.join(rel);
    let dst = layer.join(rel);
    match entry {
      FsEntry::Removed => {}
      FsEntry::Dir => fs::create_dir_all(&dst)?,
      FsEntry::File { .. } => {
        ensure_parent(&dst)?;
        fs::copy(&src, &dst)?;
      }
      FsEntry::Symlink { target } => {
        ensure_parent(&dst)?;
        make_symlink(target, &dst)?;
      }
    }
  }
  Ok(())
}

/// Replay a layer on top of `target`: removals first, then additions in path
/// order so parents exist before their children.
pub fn apply_layer(layer: &Path, delta: &FsDelta, target: &Path) -> io::Result<()> {
  fs::create_dir_all(target)?;

  for (rel, entry) in &delta.entries {
    if matches!(entry, FsEntry::Removed) {
      remove_any(&target.join(rel))?;
    }
  }

  for (rel, entry) in &delta.entries {
    let src = layer.join(rel);
    let dst = target.join(rel);
    match entry {
      FsEntry::Removed => {}
      FsEntry::Dir => {
        if fs::symlink_metadata(&dst).is_ok_and(|m| !m.is_dir()) {
          remove_any(&dst)?;
        }
        fs::create_dir_all(&dst)?;
      }
      FsEntry::File { executable, .. } => {
        ensure_parent(&dst)?;
        if fs::symlink_metadata(&dst).is_ok_and(|m| m.is_dir() || m.file_type().is_symlink()) {
          remove_any(&dst)?;
        }
        fs::copy(&src, &dst)?;
        set_executable(&dst, *executable)?;
      }
      FsEntry::Symlink { target: link } => {
        ensure_parent(&dst)?;
        remove_any(&dst)?;
        make_symlink(link, &dst)?;
      }
    }
  }
  Ok(())
}

pub(crate) fn remove_any(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
    Ok(_) => fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
  match path.parent() {
    Some(parent) => fs::create_dir_all(parent),
    None => Ok(()),
  }
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &str, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_file(target, link)
}

#[cfg(unix)]
pub(crate) fn is_executable(meta: &fs::Metadata) -> bool {
  use std::os::unix::fs::PermissionsExt;
  meta.permissions().mode() & 0o111 != 0
}

#[cfg(windows)]
pub(crate) fn is_executable(_meta: &fs::Metadata) -> bool {
  false
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  let mode = if executable { 0o755 } else { 0o644 };
  fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(windows)]
fn set_executable(_path: &Path, _executable: bool) -> io::Result<()> {
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;
  use tempfile::TempDir;

  fn file(content: &str) -> FsEntry {
    FsEntry::File {
      digest: hash_bytes(content.as_bytes()),
      size: content.len() as u64,
      executable: false,
    }
  }

  fn delta(entries: Vec<(&str, FsEntry)>) -> FsDelta {
    FsDelta {
      entries: entries.into_iter().map(|(p, e)| (p.to_string(), e)).collect(),
    }
  }

  #[test]
  fn write_then_apply_reproduces_changes() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("app")).unwrap();
    fs::write(root.path().join("app/main.py"), "print(1)").unwrap();
    fs::write(root.path().join("untracked"), "not in delta").unwrap();

    let d = delta(vec![("app", FsEntry::Dir), ("app/main.py", file("print(1)"))]);
    let layer = TempDir::new().unwrap();
    write_layer(root.path(), &d, layer.path()).unwrap();
    assert!(!layer.path().join("untracked").exists());

    let target = TempDir::new().unwrap();
    apply_layer(layer.path(), &d, target.path()).unwrap();
    assert_eq!(fs::read_to_string(target.path().join("app/main.py")).unwrap(), "print(1)");
  }

  #[test]
  fn apply_removes_paths() {
    let target = TempDir::new().unwrap();
    fs::create_dir_all(target.path().join("var/cache/apt")).unwrap();
    fs::write(target.path().join("var/cache/apt/x"), "x").unwrap();

    let layer = TempDir::new().unwrap();
    apply_layer(layer.path(), &delta(vec![("var/cache", FsEntry::Removed)]), target.path()).unwrap();

    assert!(!target.path().join("var/cache").exists());
    assert!(target.path().join("var").exists());
  }

  #[test]
  fn removing_absent_path_is_fine() {
    let target = TempDir::new().unwrap();
    remove_any(&target.path().join("missing")).unwrap();
  }
}
