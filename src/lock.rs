//! Keyed exclusive locks, one per dataset version.
//!
//! Every pipeline activity runs under its version's lock so two workers
//! resuming the same instance after a crash cannot interleave. Guards are
//! scoped: the lock is released when the guard drops, on success and on the
//! failure path alike.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use uuid::Uuid;

#[derive(Default)]
pub struct VersionLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl VersionLocks {
    pub fn new() -> Self {
        VersionLocks::default()
    }

    /// Returns the lock handle for one version, creating it on first use.
    /// Callers hold the returned handle and lock it for the activity scope:
    ///
    /// ```ignore
    /// let handle = locks.handle(version_id);
    /// let _guard = handle.lock_scoped();
    /// ```
    pub fn handle(&self, version_id: Uuid) -> VersionLock {
        let mut table = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        VersionLock(Arc::clone(table.entry(version_id).or_default()))
    }
}

#[derive(Clone)]
pub struct VersionLock(Arc<Mutex<()>>);

impl VersionLock {
    /// Blocks until the version's lock is available. A lock poisoned by a
    /// panicking activity is still just a token, so the poison is discarded.
    pub fn lock_scoped(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
