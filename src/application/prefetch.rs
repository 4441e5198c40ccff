// Prefetch dedup registry, owned by the application for one session
use crate::application::cache_coordinator::CacheKey;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Remembers which cache keys were already warmed so repeated hover
/// prefetches do not hit the source of truth again. `CacheCoordinator`
/// forgets a key whenever it invalidates it.
#[derive(Clone, Default)]
pub struct PrefetchRegistry {
    seen: Arc<Mutex<HashSet<CacheKey>>>,
}

impl PrefetchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `key` is claimed.
    pub async fn claim(&self, key: &CacheKey) -> bool {
        self.seen.lock().await.insert(key.clone())
    }

    pub async fn forget(&self, key: &CacheKey) {
        self.seen.lock().await.remove(key);
    }
}
