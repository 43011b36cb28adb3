//! Sync guard: the registry of resources currently admitted for background
//! reconciliation.
//!
//! This is a flat set, not a queue. A caller that loses the admission race is
//! not enqueued; it proceeds with cached data and lets the winner finish.
//! Guarantees are per key only.
//!
//! Each admission carries a sequence number so that a [`GuardTicket`] whose
//! admission was forcibly taken over (watchdog) cannot release a newer
//! admission for the same key when it is finally dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use stride_types::ResourceKey;
use tracing::trace;

/// Registry of admitted resource keys.
#[derive(Debug, Default)]
pub struct SyncGuard {
    admitted: Mutex<HashMap<ResourceKey, u64>>,
    next_admission: AtomicU64,
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert `key` if absent. Returns false if it was already admitted.
    pub fn try_admit(&self, key: &ResourceKey) -> bool {
        self.admit_raw(key).is_some()
    }

    /// Admit `key` and return a ticket that releases the admission on drop.
    pub fn admit(self: &Arc<Self>, key: &ResourceKey) -> Option<GuardTicket> {
        let admission = self.admit_raw(key)?;
        Some(GuardTicket {
            guard: Arc::clone(self),
            key: key.clone(),
            admission,
            armed: true,
        })
    }

    fn admit_raw(&self, key: &ResourceKey) -> Option<u64> {
        let mut admitted = self.admitted.lock();
        if admitted.contains_key(key) {
            trace!(key = %key, "Admission refused, already in flight");
            return None;
        }
        let admission = self.next_admission.fetch_add(1, Ordering::Relaxed);
        admitted.insert(key.clone(), admission);
        trace!(key = %key, admission, "Admitted");
        Some(admission)
    }

    /// Remove `key` regardless of which admission holds it. Idempotent.
    pub fn release(&self, key: &ResourceKey) {
        if self.admitted.lock().remove(key).is_some() {
            trace!(key = %key, "Released");
        }
    }

    /// Remove `key` only if it is still held by the given admission.
    fn release_admission(&self, key: &ResourceKey, admission: u64) -> bool {
        let mut admitted = self.admitted.lock();
        if admitted.get(key) == Some(&admission) {
            admitted.remove(key);
            trace!(key = %key, admission, "Released by ticket");
            true
        } else {
            false
        }
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.admitted.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.admitted.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.lock().is_empty()
    }

    /// Snapshot of the admitted keys.
    pub fn admitted(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.admitted.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Proof of admission for one key. Dropping it releases the admission.
#[derive(Debug)]
pub struct GuardTicket {
    guard: Arc<SyncGuard>,
    key: ResourceKey,
    admission: u64,
    armed: bool,
}

impl GuardTicket {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Whether this ticket still holds the admission for its key.
    pub fn is_held(&self) -> bool {
        self.guard.admitted.lock().get(&self.key) == Some(&self.admission)
    }

    /// Release now. Returns false if the admission had already been taken over.
    pub fn release(mut self) -> bool {
        self.armed = false;
        self.guard.release_admission(&self.key, self.admission)
    }
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        if self.armed {
            self.guard.release_admission(&self.key, self.admission);
        }
    }
}
