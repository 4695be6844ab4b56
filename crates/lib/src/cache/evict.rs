//! Eviction: age limits first, then least-recently-used removal until the
//! store fits its size and entry budgets.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::entry::{self, EntryState};
use super::{CacheStore, CacheStoreError, STAGING_DIR, TRASH_DIR};
use crate::fingerprint::Fingerprint;
use crate::util::now_unix_ms;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictPolicy {
  /// Remove entries not used for longer than this.
  pub max_age: Option<Duration>,
  /// Keep the total size of all entries at or below this.
  pub max_size_bytes: Option<u64>,
  pub max_entries: Option<usize>,
  /// Staging and trash directories older than this are assumed abandoned.
  pub stale_after: Duration,
  pub dry_run: bool,
}

impl Default for EvictPolicy {
  fn default() -> Self {
    Self {
      max_age: None,
      max_size_bytes: None,
      max_entries: None,
      stale_after: Duration::from_secs(60 * 60),
      dry_run: false,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictStats {
  pub scanned: usize,
  pub evicted: usize,
  pub bytes_freed: u64,
  pub skipped_in_use: usize,
  pub invalid_removed: usize,
  pub staging_removed: usize,
  pub remaining_entries: usize,
  pub remaining_bytes: u64,
  pub evicted_fingerprints: Vec<Fingerprint>,
  pub dry_run: bool,
}

#[derive(Debug)]
struct Candidate {
  fingerprint: Fingerprint,
  path: PathBuf,
  size: u64,
  last_used: u64,
}

pub(crate) fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

impl CacheStore {
  /// Remove entries according to `policy`. Entries leased by in-flight
  /// builds are never removed.
  pub fn evict(&self, policy: &EvictPolicy) -> Result<EvictStats, CacheStoreError> {
    let now = now_unix_ms();
    let mut stats = EvictStats {
      dry_run: policy.dry_run,
      ..Default::default()
    };
    let mut in_use = BTreeSet::new();

    let mut live = Vec::new();
    for (fingerprint, path) in self.scan_entries()? {
      stats.scanned += 1;
      match entry::inspect(&path, &fingerprint, self.inner.verify_layers)? {
        EntryState::Valid(artifact) => live.push(Candidate {
          last_used: self.last_used(&fingerprint, &artifact),
          size: dir_size(&path),
          fingerprint,
          path,
        }),
        EntryState::Invalid(reason) => {
          debug!(fingerprint = %fingerprint.short(), %reason, "removing invalid entry");
          let removed = self.inner.leases.with_unleased(&fingerprint, || {
            if policy.dry_run {
              Ok(())
            } else {
              self.discard(&path)
            }
          });
          match removed {
            Some(result) => {
              result?;
              stats.invalid_removed += 1;
            }
            None => {
              in_use.insert(fingerprint);
            }
          }
        }
        EntryState::Missing => {}
      }
    }
    live.sort_by_key(|c| (c.last_used, c.fingerprint));

    let mut total_bytes: u64 = live.iter().map(|c| c.size).sum();
    let mut total_entries = live.len();

    let mut kept = Vec::with_capacity(live.len());
    for candidate in live {
      let expired = policy
        .max_age
        .is_some_and(|age| now.saturating_sub(candidate.last_used) > age.as_millis() as u64);
      if expired && self.evict_one(&candidate, policy.dry_run, &mut stats, &mut in_use)? {
        total_bytes -= candidate.size;
        total_entries -= 1;
      } else {
        kept.push(candidate);
      }
    }

    for candidate in &kept {
      let over_size = policy.max_size_bytes.is_some_and(|max| total_bytes > max);
      let over_count = policy.max_entries.is_some_and(|max| total_entries > max);
      if !over_size && !over_count {
        break;
      }
      if self.evict_one(candidate, policy.dry_run, &mut stats, &mut in_use)? {
        total_bytes -= candidate.size;
        total_entries -= 1;
      }
    }

    stats.skipped_in_use = in_use.len();
    stats.remaining_entries = total_entries;
    stats.remaining_bytes = total_bytes;
    self.sweep_stale(policy, &mut stats);

    info!(
      evicted = stats.evicted,
      bytes_freed = stats.bytes_freed,
      skipped_in_use = stats.skipped_in_use,
      remaining = stats.remaining_entries,
      dry_run = policy.dry_run,
      "eviction complete"
    );
    Ok(stats)
  }

  fn evict_one(
    &self,
    candidate: &Candidate,
    dry_run: bool,
    stats: &mut EvictStats,
    in_use: &mut BTreeSet<Fingerprint>,
  ) -> Result<bool, CacheStoreError> {
    let moved = self.inner.leases.with_unleased(&candidate.fingerprint, || {
      if dry_run {
        Ok(None)
      } else {
        self.move_to_trash(&candidate.path)
      }
    });

    let trash = match moved {
      None => {
        debug!(fingerprint = %candidate.fingerprint.short(), "entry in use, skipping");
        in_use.insert(candidate.fingerprint);
        return Ok(false);
      }
      Some(result) => result?,
    };

    if let Some(trash) = trash {
      let path = trash.path().to_path_buf();
      if let Err(e) = trash.close() {
        warn!(path = %path.display(), error = %e, "failed to delete evicted entry");
      }
      let access = self.access_path(&candidate.fingerprint);
      match fs::remove_file(&access) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
          warn!(path = %access.display(), error = %e, "failed to remove access record");
        }
        _ => {}
      }
    }

    debug!(
      fingerprint = %candidate.fingerprint.short(),
      bytes = candidate.size,
      dry_run,
      "evicted entry"
    );
    stats.evicted += 1;
    stats.bytes_freed += candidate.size;
    stats.evicted_fingerprints.push(candidate.fingerprint);
    Ok(true)
  }

  /// Remove staging and trash directories abandoned by crashed processes.
  fn sweep_stale(&self, policy: &EvictPolicy, stats: &mut EvictStats) {
    for dir in [STAGING_DIR, TRASH_DIR] {
      let root = self.inner.root.join(dir);
      let Ok(read) = fs::read_dir(&root) else {
        continue;
      };

      for item in read.flatten() {
        let path = item.path();
        let stale = item
          .metadata()
          .and_then(|m| m.modified())
          .ok()
          .and_then(|t| t.elapsed().ok())
          .is_some_and(|age| age >= policy.stale_after);
        if !stale {
          continue;
        }

        debug!(path = %path.display(), "removing stale directory");
        if policy.dry_run {
          stats.staging_removed += 1;
          continue;
        }
        match super::remove_any(&path) {
          Ok(()) => stats.staging_removed += 1,
          Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale directory"),
        }
      }
    }
  }
}
