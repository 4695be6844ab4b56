//! In-process reference counts over store entries.
//!
//! Every successful lookup hands out a [`Lease`]. Eviction consults the same
//! table under the same lock, so an entry that is leased when eviction looks
//! at it is never removed, and a lease is never granted on an entry that is
//! halfway through removal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::fingerprint::Fingerprint;

#[derive(Debug, Default)]
pub(crate) struct LeaseTable {
  counts: Mutex<HashMap<Fingerprint, usize>>,
}

impl LeaseTable {
  fn counts(&self) -> MutexGuard<'_, HashMap<Fingerprint, usize>> {
    self.counts.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn acquire(self: &Arc<Self>, fingerprint: Fingerprint) -> Lease {
    *self.counts().entry(fingerprint).or_insert(0) += 1;
    Lease {
      table: Arc::clone(self),
      fingerprint,
    }
  }

  #[cfg(test)]
  pub(crate) fn is_leased(&self, fingerprint: &Fingerprint) -> bool {
    self.counts().contains_key(fingerprint)
  }

  /// Run `f` only if `fingerprint` has no outstanding leases, holding the
  /// table lock for the duration so no lease can be granted meanwhile.
  pub(crate) fn with_unleased<R>(&self, fingerprint: &Fingerprint, f: impl FnOnce() -> R) -> Option<R> {
    let counts = self.counts();
    if counts.contains_key(fingerprint) {
      return None;
    }
    let result = f();
    drop(counts);
    Some(result)
  }

  fn release(&self, fingerprint: &Fingerprint) {
    let mut counts = self.counts();
    if let Some(count) = counts.get_mut(fingerprint) {
      *count -= 1;
      if *count == 0 {
        counts.remove(fingerprint);
      }
    }
  }
}

/// Keeps a store entry alive until dropped.
#[derive(Debug)]
pub struct Lease {
  table: Arc<LeaseTable>,
  fingerprint: Fingerprint,
}

impl Lease {
  pub fn fingerprint(&self) -> &Fingerprint {
    &self.fingerprint
  }
}

impl Clone for Lease {
  fn clone(&self) -> Self {
    self.table.acquire(self.fingerprint)
  }
}

impl Drop for Lease {
  fn drop(&mut self) {
    self.table.release(&self.fingerprint);
  }
}
