//! Process-wide per-blog bookkeeping
//!
//! One slot per blog id records what the process is doing with that blog:
//! the sync in flight, the entry updates pending under it, the last status
//! message, the lock state, the cache version and the semaphore that
//! serialises filesystem batches for the account. Slots are created on
//! first use and removed by [`BlogRegistry::disconnect`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::lock::LockState;

#[derive(Debug)]
struct BlogSlot {
    sync_started: Option<DateTime<Utc>>,
    pending_updates: Vec<String>,
    last_status: Option<String>,
    lock_state: LockState,
    cache_version: u64,
    batch: Arc<Semaphore>,
}

impl Default for BlogSlot {
    fn default() -> Self {
        Self {
            sync_started: None,
            pending_updates: Vec::new(),
            last_status: None,
            lock_state: LockState::Unlocked,
            cache_version: 0,
            batch: Arc::new(Semaphore::new(1)),
        }
    }
}

/// Point-in-time view of one blog's slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub blog_id: String,
    pub sync_started: Option<DateTime<Utc>>,
    pub pending_updates: Vec<String>,
    pub last_status: Option<String>,
    pub lock_state: LockState,
    pub cache_version: u64,
}

#[derive(Debug, Default)]
pub struct BlogRegistry {
    slots: Mutex<BTreeMap<String, BlogSlot>>,
}

impl BlogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, BTreeMap<String, BlogSlot>> {
        // A poisoned registry only means a panic happened mid-update of
        // bookkeeping fields; the data is still usable.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_slot<T>(&self, blog_id: &str, f: impl FnOnce(&mut BlogSlot) -> T) -> T {
        let mut slots = self.slots();
        f(slots.entry(blog_id.to_string()).or_default())
    }

    pub fn begin_sync(&self, blog_id: &str) {
        self.with_slot(blog_id, |slot| slot.sync_started = Some(Utc::now()));
    }

    pub fn end_sync(&self, blog_id: &str) {
        self.with_slot(blog_id, |slot| slot.sync_started = None);
    }

    pub fn is_syncing(&self, blog_id: &str) -> bool {
        self.slots()
            .get(blog_id)
            .is_some_and(|slot| slot.sync_started.is_some())
    }

    pub fn begin_update(&self, blog_id: &str, path: &str) {
        self.with_slot(blog_id, |slot| slot.pending_updates.push(path.to_string()));
    }

    pub fn end_update(&self, blog_id: &str, path: &str) {
        self.with_slot(blog_id, |slot| {
            if let Some(index) = slot.pending_updates.iter().position(|p| p == path) {
                slot.pending_updates.remove(index);
            }
        });
    }

    pub fn set_status(&self, blog_id: &str, message: impl Into<String>) {
        let message = message.into();
        self.with_slot(blog_id, |slot| slot.last_status = Some(message));
    }

    pub fn last_status(&self, blog_id: &str) -> Option<String> {
        self.slots().get(blog_id).and_then(|slot| slot.last_status.clone())
    }

    pub fn set_lock_state(&self, blog_id: &str, state: LockState) {
        self.with_slot(blog_id, |slot| slot.lock_state = state);
    }

    pub fn lock_state(&self, blog_id: &str) -> LockState {
        self.slots()
            .get(blog_id)
            .map(|slot| slot.lock_state)
            .unwrap_or(LockState::Unlocked)
    }

    /// Advance the cache version after a sync changed the blog.
    pub fn bump_cache_version(&self, blog_id: &str) -> u64 {
        self.with_slot(blog_id, |slot| {
            slot.cache_version += 1;
            slot.cache_version
        })
    }

    pub fn cache_version(&self, blog_id: &str) -> u64 {
        self.slots().get(blog_id).map(|slot| slot.cache_version).unwrap_or(0)
    }

    /// Wait for the account's batch permit.
    ///
    /// At most one batch of filesystem operations runs per blog at a time.
    /// The permit outlives a concurrent [`disconnect`](Self::disconnect).
    pub async fn batch_permit(&self, blog_id: &str) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.with_slot(blog_id, |slot| Arc::clone(&slot.batch));
        semaphore.acquire_owned().await.ok()
    }

    pub fn snapshot(&self, blog_id: &str) -> Option<RegistrySnapshot> {
        self.slots().get(blog_id).map(|slot| snapshot_of(blog_id, slot))
    }

    pub fn snapshot_all(&self) -> Vec<RegistrySnapshot> {
        self.slots()
            .iter()
            .map(|(blog_id, slot)| snapshot_of(blog_id, slot))
            .collect()
    }

    /// Forget everything about a blog.
    pub fn disconnect(&self, blog_id: &str) -> bool {
        self.slots().remove(blog_id).is_some()
    }
}

fn snapshot_of(blog_id: &str, slot: &BlogSlot) -> RegistrySnapshot {
    RegistrySnapshot {
        blog_id: blog_id.to_string(),
        sync_started: slot.sync_started,
        pending_updates: slot.pending_updates.clone(),
        last_status: slot.last_status.clone(),
        lock_state: slot.lock_state,
        cache_version: slot.cache_version,
    }
}
