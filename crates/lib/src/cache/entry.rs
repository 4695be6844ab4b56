//! On-disk layout of a single store entry.
//!
//! ```text
//! entries/<fingerprint>/
//!   artifact.json          manifest (Artifact)
//!   layer/                 files added or changed by the step
//!   .layercake-complete    marker, written last, carries the layer hash
//! ```
//!
//! An entry without a readable marker, or whose layer no longer hashes to the
//! recorded value, is treated as absent.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{Artifact, CacheStoreError};
use crate::consts::{ARTIFACT_MANIFEST, ENTRY_COMPLETE_MARKER, LAYER_DIR, STORE_FORMAT_VERSION};
use crate::fingerprint::Fingerprint;
use crate::util::hash::hash_directory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMarker {
  pub version: u32,
  pub fingerprint: Fingerprint,
  pub layer_hash: String,
}

/// Result of inspecting an entry directory.
#[derive(Debug)]
pub(crate) enum EntryState {
  Missing,
  Valid(Box<Artifact>),
  Invalid(String),
}

pub(crate) fn write_manifest(dir: &Path, artifact: &Artifact) -> Result<(), CacheStoreError> {
  let path = dir.join(ARTIFACT_MANIFEST);
  let content = serde_json::to_vec_pretty(artifact).map_err(|source| CacheStoreError::Encode {
    fingerprint: artifact.fingerprint,
    source,
  })?;
  fs::write(&path, content).map_err(CacheStoreError::io("write manifest", &path))
}

/// Hash the staged layer and write the completion marker. Must be the last
/// write into the staging directory.
pub(crate) fn write_marker(dir: &Path, fingerprint: &Fingerprint) -> Result<(), CacheStoreError> {
  let layer = dir.join(LAYER_DIR);
  fs::create_dir_all(&layer).map_err(CacheStoreError::io("create layer", &layer))?;

  let marker = EntryMarker {
    version: STORE_FORMAT_VERSION,
    fingerprint: *fingerprint,
    layer_hash: hash_directory(&layer, &[])?.0,
  };
  let path = dir.join(ENTRY_COMPLETE_MARKER);
  let content = serde_json::to_string(&marker).map_err(|source| CacheStoreError::Encode {
    fingerprint: *fingerprint,
    source,
  })?;
  fs::write(&path, format!("{}\n", content)).map_err(CacheStoreError::io("write marker", &path))
}

pub(crate) fn read_marker(dir: &Path) -> io::Result<Option<EntryMarker>> {
  let content = match fs::read_to_string(dir.join(ENTRY_COMPLETE_MARKER)) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(e),
  };
  Ok(serde_json::from_str(&content).ok())
}

pub(crate) fn read_manifest(dir: &Path) -> io::Result<Option<Artifact>> {
  let content = match fs::read_to_string(dir.join(ARTIFACT_MANIFEST)) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(e),
  };
  Ok(serde_json::from_str(&content).ok())
}

/// Inspect an entry directory. I/O failures other than absence are errors;
/// malformed content is reported as `Invalid`.
pub(crate) fn inspect(dir: &Path, fingerprint: &Fingerprint, verify_layer: bool) -> Result<EntryState, CacheStoreError> {
  match fs::symlink_metadata(dir) {
    Ok(meta) if meta.is_dir() => {}
    Ok(_) => return Ok(EntryState::Invalid("entry path is not a directory".to_string())),
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(EntryState::Missing),
    Err(e) => return Err(CacheStoreError::io("stat entry", dir)(e)),
  }

  let Some(marker) = read_marker(dir).map_err(CacheStoreError::io("read marker", dir))? else {
    return Ok(EntryState::Invalid("missing or unreadable completion marker".to_string()));
  };
  if marker.version != STORE_FORMAT_VERSION {
    return Ok(EntryState::Invalid(format!("unsupported entry version {}", marker.version)));
  }
  if marker.fingerprint != *fingerprint {
    return Ok(EntryState::Invalid(format!("marker belongs to {}", marker.fingerprint.short())));
  }

  let Some(artifact) = read_manifest(dir).map_err(CacheStoreError::io("read manifest", dir))? else {
    return Ok(EntryState::Invalid("missing or unreadable manifest".to_string()));
  };
  if artifact.fingerprint != *fingerprint {
    return Ok(EntryState::Invalid(format!("manifest belongs to {}", artifact.fingerprint.short())));
  }

  if verify_layer {
    match hash_directory(&dir.join(LAYER_DIR), &[]) {
      Ok(actual) if actual.0 == marker.layer_hash => {}
      Ok(actual) => {
        warn!(
          fingerprint = %fingerprint.short(),
          expected = %marker.layer_hash,
          actual = %actual,
          "layer content does not match its marker"
        );
        return Ok(EntryState::Invalid("layer hash mismatch".to_string()));
      }
      Err(e) => return Ok(EntryState::Invalid(format!("layer unreadable: {}", e))),
    }
  }

  debug!(fingerprint = %fingerprint.short(), "entry verified");
  Ok(EntryState::Valid(Box::new(artifact)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::types::FsDelta;
  use crate::plan::StepKind;
  use tempfile::TempDir;

  fn artifact(fp: Fingerprint) -> Artifact {
    Artifact {
      version: STORE_FORMAT_VERSION,
      fingerprint: fp,
      parent: None,
      kind: StepKind::BaseImage,
      delta: FsDelta::default(),
      image: Some("alpine".to_string()),
      entrypoint: None,
      created_at_unix_ms: 1,
    }
  }

  fn staged(fp: Fingerprint) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(LAYER_DIR).join("etc")).unwrap();
    fs::write(dir.path().join(LAYER_DIR).join("etc/hostname"), "box").unwrap();
    write_manifest(dir.path(), &artifact(fp)).unwrap();
    write_marker(dir.path(), &fp).unwrap();
    dir
  }

  #[test]
  fn complete_entry_is_valid() {
    let fp = Fingerprint::from_bytes([7; 32]);
    let dir = staged(fp);
    match inspect(dir.path(), &fp, true).unwrap() {
      EntryState::Valid(a) => assert_eq!(*a, artifact(fp)),
      other => panic!("expected valid entry, got {other:?}"),
    }
  }

  #[test]
  fn missing_directory_is_missing() {
    let dir = TempDir::new().unwrap();
    let state = inspect(&dir.path().join("nope"), &Fingerprint::from_bytes([1; 32]), true).unwrap();
    assert!(matches!(state, EntryState::Missing));
  }

  #[test]
  fn entry_without_marker_is_invalid() {
    let fp = Fingerprint::from_bytes([7; 32]);
    let dir = staged(fp);
    fs::remove_file(dir.path().join(ENTRY_COMPLETE_MARKER)).unwrap();
    assert!(matches!(inspect(dir.path(), &fp, true).unwrap(), EntryState::Invalid(_)));
  }

  #[test]
  fn tampered_layer_is_invalid_only_when_verifying() {
    let fp = Fingerprint::from_bytes([7; 32]);
    let dir = staged(fp);
    fs::write(dir.path().join(LAYER_DIR).join("etc/hostname"), "tampered").unwrap();

    assert!(matches!(inspect(dir.path(), &fp, true).unwrap(), EntryState::Invalid(_)));
    assert!(matches!(inspect(dir.path(), &fp, false).unwrap(), EntryState::Valid(_)));
  }

  #[test]
  fn marker_for_other_fingerprint_is_invalid() {
    let fp = Fingerprint::from_bytes([7; 32]);
    let dir = staged(fp);
    let other = Fingerprint::from_bytes([8; 32]);
    assert!(matches!(inspect(dir.path(), &other, true).unwrap(), EntryState::Invalid(_)));
  }
}
