//! Single global sync lock
//!
//! One holder across all source kinds. Acquisition is try-only: a held lock
//! is reported back to the caller, never waited on. Release happens when the
//! guard drops, including on unwind.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::OperationKind;

/// Current lock holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockHolder {
    pub held_by: OperationKind,
    pub run_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

/// Global sync lock (cheap to clone, clones share state)
#[derive(Debug, Clone, Default)]
pub struct SyncLock {
    holder: Arc<Mutex<Option<LockHolder>>>,
}

impl SyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if free; otherwise return the current holder
    pub fn try_acquire(
        &self,
        operation: OperationKind,
        run_id: Uuid,
    ) -> Result<SyncLockGuard, LockHolder> {
        let mut holder = lock_state(&self.holder);
        if let Some(current) = holder.as_ref() {
            return Err(current.clone());
        }

        *holder = Some(LockHolder {
            held_by: operation,
            run_id,
            acquired_at: Utc::now(),
        });
        tracing::debug!(operation = %operation, run_id = %run_id, "Sync lock acquired");

        Ok(SyncLockGuard {
            holder: Arc::clone(&self.holder),
        })
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<LockHolder> {
        lock_state(&self.holder).clone()
    }

    pub fn is_held(&self) -> bool {
        lock_state(&self.holder).is_some()
    }
}

/// Releases the sync lock on drop
#[derive(Debug)]
pub struct SyncLockGuard {
    holder: Arc<Mutex<Option<LockHolder>>>,
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        if let Some(released) = lock_state(&self.holder).take() {
            tracing::debug!(
                operation = %released.held_by,
                run_id = %released.run_id,
                "Sync lock released"
            );
        }
    }
}

/// The state is a plain Option, so a poisoned mutex still holds a valid value
fn lock_state(mutex: &Mutex<Option<LockHolder>>) -> MutexGuard<'_, Option<LockHolder>> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
