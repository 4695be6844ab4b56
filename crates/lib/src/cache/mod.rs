//! The content-addressed cache store.
//!
//! Maps step fingerprints to committed artifacts on disk. A store is opened
//! explicitly against a root directory and shared by cloning the handle;
//! every clone sees the same entries, leases and lock.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   .lock                     advisory store lock
//!   entries/<fingerprint>/    committed entries (see [`entry`])
//!   access/<fingerprint>      last-used time, unix millis
//!   staging/                  in-progress commits
//!   trash/                    entries being removed
//! ```
//!
//! Commits are staged next to `entries/` and published with one `rename`, so
//! an entry is either fully visible or absent.

mod entry;
mod evict;
mod layer;
mod lease;
mod types;

pub use entry::EntryMarker;
pub use evict::{EvictPolicy, EvictStats};
pub use layer::{apply_layer, write_layer};
pub use lease::Lease;
pub use types::*;

pub(crate) use layer::{is_executable, remove_any};

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::consts::{APP_NAME, LAYER_DIR};
use crate::fingerprint::Fingerprint;
use crate::store_lock::{LockMode, StoreLock};
use crate::util::now_unix_ms;
use entry::EntryState;
use lease::LeaseTable;

const ENTRIES_DIR: &str = "entries";
const ACCESS_DIR: &str = "access";
const STAGING_DIR: &str = "staging";
const TRASH_DIR: &str = "trash";

#[derive(Debug, Clone)]
pub struct StoreOptions {
  pub lock_mode: LockMode,
  /// Re-hash layers on lookup and treat mismatches as misses.
  pub verify_layers: bool,
  /// Recorded in the lock file when held exclusively.
  pub command: String,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      lock_mode: LockMode::Shared,
      verify_layers: true,
      command: APP_NAME.to_string(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct CacheStore {
  inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
  root: PathBuf,
  verify_layers: bool,
  leases: Arc<LeaseTable>,
  _lock: StoreLock,
}

/// Scratch space for one pending commit. Dropping it without committing
/// discards everything written into it.
#[derive(Debug)]
pub struct Staging {
  dir: TempDir,
  fingerprint: Fingerprint,
}

impl Staging {
  pub fn path(&self) -> &Path {
    self.dir.path()
  }

  /// Where the executor writes the step's delta files.
  pub fn layer_dir(&self) -> PathBuf {
    self.dir.path().join(LAYER_DIR)
  }

  pub fn fingerprint(&self) -> &Fingerprint {
    &self.fingerprint
  }
}

/// An artifact together with the staging area holding its layer.
#[derive(Debug)]
pub struct StagedArtifact {
  pub artifact: Artifact,
  pub staging: Staging,
}

/// A committed artifact, kept alive by its lease until dropped.
#[derive(Debug, Clone)]
pub struct CachedArtifact {
  artifact: Artifact,
  layer_dir: PathBuf,
  lease: Lease,
}

impl CachedArtifact {
  pub fn artifact(&self) -> &Artifact {
    &self.artifact
  }

  pub fn fingerprint(&self) -> &Fingerprint {
    self.lease.fingerprint()
  }

  pub fn layer_dir(&self) -> &Path {
    &self.layer_dir
  }

  /// Replay this artifact's delta onto `target`.
  pub fn apply_to(&self, target: &Path) -> io::Result<()> {
    apply_layer(&self.layer_dir, &self.artifact.delta, target)
  }
}

impl CacheStore {
  /// Open (creating if needed) a store with default options.
  pub fn open(root: impl AsRef<Path>) -> Result<Self, CacheStoreError> {
    Self::open_with(root, StoreOptions::default())
  }

  pub fn open_with(root: impl AsRef<Path>, options: StoreOptions) -> Result<Self, CacheStoreError> {
    let root = root.as_ref().to_path_buf();
    let lock = StoreLock::acquire(&root, options.lock_mode, &options.command)?;

    for dir in [ENTRIES_DIR, ACCESS_DIR, STAGING_DIR, TRASH_DIR] {
      let path = root.join(dir);
      fs::create_dir_all(&path).map_err(CacheStoreError::io("create", &path))?;
    }

    info!(root = %root.display(), lock = ?options.lock_mode, "opened cache store");
    Ok(CacheStore {
      inner: Arc::new(StoreInner {
        root,
        verify_layers: options.verify_layers,
        leases: Arc::new(LeaseTable::default()),
        _lock: lock,
      }),
    })
  }

  /// Release this handle. The lock is dropped once the last clone goes away.
  pub fn close(self) {
    let handles = Arc::strong_count(&self.inner);
    debug!(root = %self.inner.root.display(), remaining = handles - 1, "closing cache store handle");
  }

  pub fn root(&self) -> &Path {
    &self.inner.root
  }

  fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
    self.inner.root.join(ENTRIES_DIR).join(fingerprint.to_hex())
  }

  fn access_path(&self, fingerprint: &Fingerprint) -> PathBuf {
    self.inner.root.join(ACCESS_DIR).join(fingerprint.to_hex())
  }

  /// Create a staging area for the artifact of `fingerprint`.
  pub fn stage(&self, fingerprint: &Fingerprint) -> Result<Staging, CacheStoreError> {
    let staging_root = self.inner.root.join(STAGING_DIR);
    let dir = tempfile::Builder::new()
      .prefix(&format!("{}-", fingerprint.short()))
      .tempdir_in(&staging_root)
      .map_err(CacheStoreError::io("create staging in", &staging_root))?;

    let layer = dir.path().join(LAYER_DIR);
    fs::create_dir(&layer).map_err(CacheStoreError::io("create", &layer))?;

    Ok(Staging {
      dir,
      fingerprint: *fingerprint,
    })
  }

  /// Publish a staged artifact. Committing a fingerprint that is already
  /// present is a successful no-op; the staged copy is discarded.
  pub fn commit(&self, staged: StagedArtifact) -> Result<CommitOutcome, CacheStoreError> {
    let StagedArtifact { artifact, staging } = staged;
    let fingerprint = artifact.fingerprint;
    if staging.fingerprint != fingerprint {
      return Err(CacheStoreError::FingerprintMismatch {
        staged: staging.fingerprint,
        artifact: fingerprint,
      });
    }

    let target = self.entry_dir(&fingerprint);
    match entry::inspect(&target, &fingerprint, self.inner.verify_layers)? {
      EntryState::Valid(_) => {
        debug!(fingerprint = %fingerprint.short(), "entry already present, discarding duplicate");
        return Ok(CommitOutcome::AlreadyPresent);
      }
      EntryState::Invalid(reason) => {
        warn!(fingerprint = %fingerprint.short(), %reason, "replacing invalid entry");
        self.discard(&target)?;
      }
      EntryState::Missing => {}
    }

    entry::write_manifest(staging.path(), &artifact)?;
    entry::write_marker(staging.path(), &fingerprint)?;

    if let Err(e) = fs::rename(staging.path(), &target) {
      // Lost the race to another committer.
      if let EntryState::Valid(_) = entry::inspect(&target, &fingerprint, false)? {
        debug!(fingerprint = %fingerprint.short(), "entry published concurrently, discarding duplicate");
        return Ok(CommitOutcome::AlreadyPresent);
      }
      return Err(CacheStoreError::Io {
        op: "publish entry",
        path: target,
        source: e,
      });
    }

    self.touch(&fingerprint)?;
    info!(
      fingerprint = %fingerprint.short(),
      kind = %artifact.kind,
      paths = artifact.delta.len(),
      bytes = artifact.delta.size_bytes(),
      "committed artifact"
    );
    Ok(CommitOutcome::Committed)
  }

  /// Look up a committed artifact. Incomplete or corrupted entries are misses.
  pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<CachedArtifact>, CacheStoreError> {
    let lease = self.inner.leases.acquire(*fingerprint);
    let dir = self.entry_dir(fingerprint);

    match entry::inspect(&dir, fingerprint, self.inner.verify_layers)? {
      EntryState::Missing => {
        debug!(fingerprint = %fingerprint.short(), "cache miss");
        Ok(None)
      }
      EntryState::Invalid(reason) => {
        warn!(fingerprint = %fingerprint.short(), %reason, "ignoring invalid cache entry");
        Ok(None)
      }
      EntryState::Valid(artifact) => {
        self.touch(fingerprint)?;
        debug!(fingerprint = %fingerprint.short(), "cache hit");
        Ok(Some(CachedArtifact {
          artifact: *artifact,
          layer_dir: dir.join(LAYER_DIR),
          lease,
        }))
      }
    }
  }

  /// Pin `fingerprint` against eviction until the lease is dropped. The
  /// entry need not exist yet; builds take this before executing a step so
  /// the artifact they commit survives until the build has composed it.
  pub fn lease(&self, fingerprint: &Fingerprint) -> Lease {
    self.inner.leases.acquire(*fingerprint)
  }

  /// Whether a valid entry exists, without leasing it or updating its
  /// last-used time.
  pub fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, CacheStoreError> {
    let state = entry::inspect(&self.entry_dir(fingerprint), fingerprint, self.inner.verify_layers)?;
    Ok(matches!(state, EntryState::Valid(_)))
  }

  /// Every valid entry, most recently used first.
  pub fn list(&self) -> Result<Vec<CacheEntry>, CacheStoreError> {
    let mut entries = Vec::new();
    for (fingerprint, path) in self.scan_entries()? {
      if let EntryState::Valid(artifact) = entry::inspect(&path, &fingerprint, false)? {
        entries.push(CacheEntry {
          fingerprint,
          kind: artifact.kind,
          parent: artifact.parent,
          size_bytes: evict::dir_size(&path),
          created_at_unix_ms: artifact.created_at_unix_ms,
          last_used_unix_ms: self.last_used(&fingerprint, &artifact),
        });
      }
    }
    entries.sort_by(|a, b| {
      b.last_used_unix_ms
        .cmp(&a.last_used_unix_ms)
        .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    Ok(entries)
  }

  /// Materialize a composed artifact into `dest` by replaying its layers in order.
  pub fn export(&self, composed: &ComposedArtifact, dest: &Path) -> Result<(), CacheStoreError> {
    let mut layers = Vec::with_capacity(composed.layers.len());
    for fingerprint in &composed.layers {
      let cached = self
        .lookup(fingerprint)?
        .ok_or(CacheStoreError::MissingEntry {
          fingerprint: *fingerprint,
        })?;
      layers.push(cached);
    }

    for cached in &layers {
      cached.apply_to(dest).map_err(CacheStoreError::io("export into", dest))?;
    }
    info!(fingerprint = %composed.fingerprint.short(), dest = %dest.display(), "exported artifact");
    Ok(())
  }

  fn scan_entries(&self) -> Result<Vec<(Fingerprint, PathBuf)>, CacheStoreError> {
    let dir = self.inner.root.join(ENTRIES_DIR);
    let read = fs::read_dir(&dir).map_err(CacheStoreError::io("read", &dir))?;

    let mut found = Vec::new();
    for item in read {
      let item = item.map_err(CacheStoreError::io("read", &dir))?;
      let name = item.file_name();
      match name.to_str().and_then(|n| n.parse::<Fingerprint>().ok()) {
        Some(fingerprint) => found.push((fingerprint, item.path())),
        None => debug!(name = ?name, "skipping foreign file in entries directory"),
      }
    }
    found.sort();
    Ok(found)
  }

  fn touch(&self, fingerprint: &Fingerprint) -> Result<(), CacheStoreError> {
    let access_dir = self.inner.root.join(ACCESS_DIR);
    let target = self.access_path(fingerprint);

    let mut tmp = tempfile::NamedTempFile::new_in(&access_dir).map_err(CacheStoreError::io("create", &access_dir))?;
    tmp
      .write_all(now_unix_ms().to_string().as_bytes())
      .map_err(CacheStoreError::io("write", tmp.path()))?;
    tmp
      .persist(&target)
      .map_err(|e| CacheStoreError::io("update", &target)(e.error))?;
    Ok(())
  }

  fn last_used(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> u64 {
    fs::read_to_string(self.access_path(fingerprint))
      .ok()
      .and_then(|s| s.trim().parse().ok())
      .unwrap_or(artifact.created_at_unix_ms)
  }

  /// Move a published path out of `entries/` and delete it. The rename is the
  /// only step lookups can observe.
  fn discard(&self, path: &Path) -> Result<(), CacheStoreError> {
    if let Some(trash) = self.move_to_trash(path)? {
      let trash_path = trash.path().to_path_buf();
      if let Err(e) = trash.close() {
        warn!(path = %trash_path.display(), error = %e, "failed to delete discarded entry");
      }
    }
    Ok(())
  }

  fn move_to_trash(&self, path: &Path) -> Result<Option<TempDir>, CacheStoreError> {
    let trash_root = self.inner.root.join(TRASH_DIR);
    let trash = tempfile::Builder::new()
      .prefix("discarded-")
      .tempdir_in(&trash_root)
      .map_err(CacheStoreError::io("create trash in", &trash_root))?;

    match fs::rename(path, trash.path().join("entry")) {
      Ok(()) => Ok(Some(trash)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(CacheStoreError::io("discard", path)(e)),
    }
  }
}
