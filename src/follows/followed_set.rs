use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock},
};

/// The operator account's outbound follows, shared between the refresh loop
/// (single writer) and ingestion (readers).
///
/// The set itself is immutable once published. A refresh builds a complete new
/// set off to the side and swaps the `Arc` in one write, so a reader holding a
/// snapshot keeps iterating the old set while the next one becomes visible.
#[derive(Clone, Default)]
pub struct FollowedSet {
    current: Arc<RwLock<Arc<HashSet<String>>>>,
}

impl FollowedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<HashSet<String>> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    pub fn publish(&self, dids: HashSet<String>) {
        let next = Arc::new(dids);
        let previous = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, next)
        };
        // Free the old set outside the lock.
        drop(previous);
    }

    pub fn contains(&self, did: &str) -> bool {
        self.snapshot().contains(did)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
