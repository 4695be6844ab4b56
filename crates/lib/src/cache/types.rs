use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::plan::StepKind;
use crate::store_lock::StoreLockError;
use crate::util::hash::{ContentHash, DirHashError};

/// One path in a filesystem delta, keyed by its `/`-separated path relative
/// to the artifact root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FsEntry {
  File {
    digest: ContentHash,
    size: u64,
    #[serde(default)]
    executable: bool,
  },
  Dir,
  Symlink {
    target: String,
  },
  /// The path (and everything below it) was deleted by this step.
  Removed,
}

/// The incremental change a single step made to the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsDelta {
  pub entries: BTreeMap<String, FsEntry>,
}

impl FsDelta {
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Total bytes of file content carried by the delta.
  pub fn size_bytes(&self) -> u64 {
    self
      .entries
      .values()
      .map(|e| match e {
        FsEntry::File { size, .. } => *size,
        _ => 0,
      })
      .sum()
  }
}

/// Process start configuration recorded by `entrypoint-config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoint {
  pub command: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workdir: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
}

/// The materialized result of one step: its delta plus metadata.
///
/// Once committed the store owns it; entries are never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
  pub version: u32,
  pub fingerprint: Fingerprint,
  pub parent: Option<Fingerprint>,
  pub kind: StepKind,
  pub delta: FsDelta,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entrypoint: Option<Entrypoint>,
  pub created_at_unix_ms: u64,
}

/// The filesystem state after a whole chain of artifacts, folded in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedArtifact {
  /// Fingerprint of the last layer.
  pub fingerprint: Fingerprint,
  /// Every layer, base first.
  pub layers: Vec<Fingerprint>,
  pub image: Option<String>,
  pub entrypoint: Option<Entrypoint>,
  /// Final view of the filesystem; never contains `Removed`.
  pub files: BTreeMap<String, FsEntry>,
}

impl ComposedArtifact {
  /// Fold artifacts base-first. Returns `None` for an empty chain.
  pub fn compose<'a>(artifacts: impl IntoIterator<Item = &'a Artifact>) -> Option<Self> {
    let mut composed: Option<ComposedArtifact> = None;

    for artifact in artifacts {
      let state = composed.get_or_insert_with(|| ComposedArtifact {
        fingerprint: artifact.fingerprint,
        layers: Vec::new(),
        image: None,
        entrypoint: None,
        files: BTreeMap::new(),
      });

      state.fingerprint = artifact.fingerprint;
      state.layers.push(artifact.fingerprint);
      if artifact.image.is_some() {
        state.image = artifact.image.clone();
      }
      if artifact.entrypoint.is_some() {
        state.entrypoint = artifact.entrypoint.clone();
      }

      for (path, entry) in &artifact.delta.entries {
        if matches!(entry, FsEntry::Removed) {
          let prefix = format!("{}/", path);
          state.files.retain(|p, _| p != path && !p.starts_with(&prefix));
        }
      }
      for (path, entry) in &artifact.delta.entries {
        if !matches!(entry, FsEntry::Removed) {
          state.files.insert(path.clone(), entry.clone());
        }
      }
    }

    composed
  }
}

/// Summary of a stored entry, as reported by `CacheStore::list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
  pub fingerprint: Fingerprint,
  pub kind: StepKind,
  pub parent: Option<Fingerprint>,
  pub size_bytes: u64,
  pub created_at_unix_ms: u64,
  pub last_used_unix_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitOutcome {
  Committed,
  /// Another build published the same fingerprint first; the duplicate was discarded.
  AlreadyPresent,
}

#[derive(Debug, Error)]
pub enum CacheStoreError {
  #[error("failed to {op} {path}: {source}")]
  Io {
    op: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to encode artifact manifest for {fingerprint}: {source}")]
  Encode {
    fingerprint: Fingerprint,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to hash layer: {0}")]
  Hash(#[from] DirHashError),

  #[error("no entry for {fingerprint} in the store")]
  MissingEntry { fingerprint: Fingerprint },

  #[error("staging area for {staged} cannot publish artifact {artifact}")]
  FingerprintMismatch { staged: Fingerprint, artifact: Fingerprint },

  #[error(transparent)]
  Lock(#[from] StoreLockError),
}

impl CacheStoreError {
  pub(crate) fn io(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
    let path = path.to_path_buf();
    move |source| CacheStoreError::Io { op, path, source }
  }
}
