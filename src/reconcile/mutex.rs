//! Keyed read/write locks
//!
//! A registry of `tokio::sync::RwLock`s addressed by resource path. Node pool
//! mutations take the parent cluster's key shared and their own key
//! exclusive, so sibling pools proceed in parallel while a single pool is
//! mutated by one caller at a time.
//!
//! Guards release on drop. Entries live as long as the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Debug, Default)]
pub struct MutexStore {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

/// Shared hold on a key; released on drop
#[derive(Debug)]
pub struct SharedGuard {
    key: String,
    _guard: OwnedRwLockReadGuard<()>,
}

/// Exclusive hold on a key; released on drop
#[derive(Debug)]
pub struct ExclusiveGuard {
    key: String,
    _guard: OwnedRwLockWriteGuard<()>,
}

impl MutexStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<RwLock<()>> {
        // The map is only touched for insert/lookup, so a poisoned mutex
        // still holds a consistent map
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Wait for a shared hold on `key`. Blocks while an exclusive holder (or
    /// an earlier exclusive waiter) is present.
    pub async fn acquire_shared(&self, key: &str) -> SharedGuard {
        tracing::debug!("Locking {} (shared)", key);
        let guard = self.entry(key).read_owned().await;
        tracing::debug!("Locked {} (shared)", key);
        SharedGuard {
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Wait for an exclusive hold on `key`.
    pub async fn acquire_exclusive(&self, key: &str) -> ExclusiveGuard {
        tracing::debug!("Locking {}", key);
        let guard = self.entry(key).write_owned().await;
        tracing::debug!("Locked {}", key);
        ExclusiveGuard {
            key: key.to_string(),
            _guard: guard,
        }
    }

    pub fn release_shared(&self, guard: SharedGuard) {
        drop(guard);
    }

    pub fn release_exclusive(&self, guard: ExclusiveGuard) {
        drop(guard);
    }

    /// Number of keys ever locked
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SharedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl ExclusiveGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SharedGuard {
    fn drop(&mut self) {
        tracing::debug!("Unlocked {} (shared)", self.key);
    }
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        tracing::debug!("Unlocked {}", self.key);
    }
}
