//! Per-scope mutual exclusion for sibling writes.
//!
//! The scope `ParentRef::Node(id)` is also held while `id` itself is being
//! deleted, so children cannot be created under a parent mid-delete.

use std::sync::Arc;

use catalog_core::ParentRef;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per parent scope, created on first use.
#[derive(Debug, Default)]
pub struct ScopeLocks {
    locks: DashMap<ParentRef, Arc<Mutex<()>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `scope`. Released when the guard drops.
    pub async fn acquire(&self, scope: ParentRef) -> OwnedMutexGuard<()> {
        // The map shard guard must be gone before awaiting.
        let lock = self
            .locks
            .entry(scope)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Number of scopes that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
