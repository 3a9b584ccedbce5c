//! Per-record operation exclusion
//!
//! Each `(record id, operation kind)` key maps to an async mutex. A second
//! request for a key that is in flight waits for the first to finish and
//! then runs against whatever the ledger shows by then, which for a reveal
//! means the short-circuit path. Slots are removed once nobody holds or
//! waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use greendata_core::RecordId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{OperationKind, OperationPhase};

type OperationKey = (RecordId, OperationKind);

#[derive(Default)]
struct Slots {
    locks: HashMap<OperationKey, Arc<AsyncMutex<()>>>,
    phases: HashMap<OperationKey, OperationPhase>,
}

#[derive(Default)]
pub(crate) struct OperationTracker {
    slots: Mutex<Slots>,
}

impl OperationTracker {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for exclusive ownership of `(id, kind)`
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        id: &RecordId,
        kind: OperationKind,
    ) -> OperationGuard {
        let key = (id.clone(), kind);
        let slot = self.lock().locks.entry(key.clone()).or_default().clone();

        let lock = match slot.clone().try_lock_owned() {
            Ok(lock) => lock,
            Err(_) => {
                tracing::info!(%id, ?kind, "Operation in flight, waiting for it to settle");
                slot.lock_owned().await
            }
        };

        OperationGuard {
            tracker: self.clone(),
            key,
            _lock: lock,
        }
    }

    /// Phase of the in-flight operation, `Idle` when none
    pub(crate) fn phase(&self, id: &RecordId, kind: OperationKind) -> OperationPhase {
        self.lock()
            .phases
            .get(&(id.clone(), kind))
            .copied()
            .unwrap_or(OperationPhase::Idle)
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.lock().locks.len()
    }
}

/// Exclusive ownership of one `(id, kind)` key
pub(crate) struct OperationGuard {
    tracker: Arc<OperationTracker>,
    key: OperationKey,
    _lock: OwnedMutexGuard<()>,
}

impl OperationGuard {
    pub(crate) fn set_phase(&self, phase: OperationPhase) {
        tracing::debug!(id = %self.key.0, kind = ?self.key.1, ?phase, "Operation phase");
        self.tracker.lock().phases.insert(self.key.clone(), phase);
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut slots = self.tracker.lock();
        slots.phases.remove(&self.key);
        // the map and this guard are the only holders: nobody is waiting
        let idle = slots
            .locks
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 2);
        if idle {
            slots.locks.remove(&self.key);
        }
    }
}
