//! Hashing primitives for content addressing.
//!
//! - `ContentHash`: a full 64-character SHA-256 digest of some content
//! - `hash_directory()`: deterministic directory hashing
//! - `hash_file()`: single file hashing
//! - `hash_bytes()`: arbitrary byte hashing
//!
//! Nothing here looks at timestamps, so the same bytes always produce the
//! same digest regardless of when they were written.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A full 64-character SHA256 hash of some content.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during file or directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk {path}: {message}")]
  WalkDir { path: String, message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Compute a deterministic hash of a directory tree.
///
/// Covers file contents, directory structure and symlink targets. Entries are
/// visited in file-name order and keyed by their `/`-separated relative path,
/// so the digest is stable across platforms. Names listed in `exclude` are
/// skipped together with everything below them.
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let mut hasher = Sha256::new();

  let walker = WalkDir::new(path)
    .min_depth(1)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.file_name().to_str().is_none_or(|name| !exclude.contains(&name)));

  for entry in walker {
    let entry = entry.map_err(|e| DirHashError::WalkDir {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    let rel = relative_key(path, entry.path());
    let file_type = entry.file_type();

    let line = if file_type.is_symlink() {
      let target = fs::read_link(entry.path()).map_err(|e| DirHashError::ReadSymlink {
        path: entry.path().display().to_string(),
        message: e.to_string(),
      })?;
      format!("L {} {}", rel, hash_bytes(target.to_string_lossy().as_bytes()))
    } else if file_type.is_dir() {
      format!("D {}", rel)
    } else if file_type.is_file() {
      format!("F {} {}", rel, hash_file(entry.path())?)
    } else {
      // sockets, fifos, devices
      continue;
    };

    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let read_err = |e: std::io::Error| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 16 * 1024];

  loop {
    let n = file.read(&mut buffer).map_err(read_err)?;
    if n == 0 {
      break;
    }
    hasher.update(&buffer[..n]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}

/// `/`-separated path of `path` relative to `root`.
pub(crate) fn relative_key(root: &Path, path: &Path) -> String {
  let rel = path.strip_prefix(root).unwrap_or(path);
  rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}
