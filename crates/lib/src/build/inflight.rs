//! Per-fingerprint async locks shared by builds in one process.
//!
//! A build holds the lock for a fingerprint from its lookup until the
//! matching commit, so a second build reaching the same fingerprint waits and
//! then finds the entry instead of producing it again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::fingerprint::Fingerprint;

#[derive(Debug, Default)]
pub(crate) struct InflightTable {
  slots: Mutex<HashMap<Fingerprint, Weak<AsyncMutex<()>>>>,
}

impl InflightTable {
  pub(crate) async fn acquire(&self, fingerprint: Fingerprint) -> OwnedMutexGuard<()> {
    let slot = {
      let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
      slots.retain(|_, weak| weak.strong_count() > 0);
      match slots.get(&fingerprint).and_then(Weak::upgrade) {
        Some(slot) => slot,
        None => {
          let slot = Arc::new(AsyncMutex::new(()));
          slots.insert(fingerprint, Arc::downgrade(&slot));
          slot
        }
      }
    };
    slot.lock_owned().await
  }
}
