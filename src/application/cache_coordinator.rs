// Cache-aside coordinator for dashboard reads
use crate::application::errors::CacheError;
use crate::application::prefetch::PrefetchRegistry;
use crate::application::widget_repository::CacheBackend;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Resources cached per `(dashboard, user)` scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Widgets,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 1] = [ResourceKind::Widgets];

    fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Widgets => "widgets",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub dashboard_id: String,
    pub user_id: String,
    pub resource: ResourceKind,
}

impl CacheKey {
    pub fn new(dashboard_id: &str, user_id: &str, resource: ResourceKind) -> Self {
        Self {
            dashboard_id: dashboard_id.to_string(),
            user_id: user_id.to_string(),
            resource,
        }
    }

    pub fn widgets(dashboard_id: &str, user_id: &str) -> Self {
        Self::new(dashboard_id, user_id, ResourceKind::Widgets)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dashboard:{}:user:{}:{}",
            self.dashboard_id,
            self.user_id,
            self.resource.as_str()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Ignore and invalidate any cached value before reading.
    pub bust: bool,
    /// Whether the fetched value may be written back to the cache.
    pub cacheable: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            bust: false,
            cacheable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRead<T> {
    pub data: T,
    pub from_cache: bool,
}

fn encode<T: Serialize>(data: &T) -> Result<String, CacheError> {
    Ok(serde_json::to_string(data)?)
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CacheError> {
    Ok(serde_json::from_str(raw)?)
}

#[derive(Clone)]
pub struct CacheCoordinator {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    prefetched: PrefetchRegistry,
}

impl CacheCoordinator {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            prefetched: PrefetchRegistry::new(),
        }
    }

    /// Share a prefetch registry. Every invalidation through this coordinator
    /// re-arms prefetch for the keys it drops.
    pub fn with_prefetch(mut self, registry: PrefetchRegistry) -> Self {
        self.prefetched = registry;
        self
    }

    /// Read through the cache. Only errors from `fetch` reach the caller; any
    /// cache failure degrades to the source of truth.
    pub async fn read<T, F, Fut>(
        &self,
        key: &CacheKey,
        options: ReadOptions,
        fetch: F,
    ) -> anyhow::Result<CachedRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let cache_key = key.to_string();

        if options.bust {
            self.invalidate(key).await;
        } else if let Some(data) = self.lookup::<T>(&cache_key).await {
            tracing::debug!(key = %cache_key, "cache hit");
            return Ok(CachedRead {
                data,
                from_cache: true,
            });
        }

        let data = fetch().await?;

        if options.cacheable {
            self.populate(&cache_key, &data).await;
        }

        Ok(CachedRead {
            data,
            from_cache: false,
        })
    }

    /// Warm the cache for `key` unless it was already warmed since its last
    /// invalidation. Returns whether a fetch was issued.
    pub async fn prefetch<T, F, Fut>(&self, key: &CacheKey, fetch: F) -> bool
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if !self.prefetched.claim(key).await {
            return false;
        }
        if let Err(e) = self.read(key, ReadOptions::default(), fetch).await {
            tracing::warn!(key = %key, error = %e, "prefetch failed");
            self.prefetched.forget(key).await;
        }
        true
    }

    async fn lookup<T: DeserializeOwned>(&self, cache_key: &str) -> Option<T> {
        let cached = self.backend.get(cache_key).await;
        match cached.and_then(|raw| raw.as_deref().map(decode::<T>).transpose()) {
            Ok(data) => data,
            Err(e @ CacheError::Codec(_)) => {
                tracing::warn!(key = %cache_key, error = %e, "discarding undecodable cache entry");
                None
            }
            Err(e) => {
                tracing::warn!(key = %cache_key, error = %e, "cache read failed, using source");
                None
            }
        }
    }

    async fn populate<T: Serialize>(&self, cache_key: &str, data: &T) {
        let stored = match encode(data) {
            Ok(raw) => self.backend.set(cache_key, raw, self.ttl).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            tracing::warn!(key = %cache_key, error = %e, "cache populate failed");
        }
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.prefetched.forget(key).await;
        let cache_key = key.to_string();
        if let Err(e) = self.backend.invalidate(&cache_key).await {
            tracing::warn!(key = %cache_key, error = %e, "cache invalidation failed");
        }
    }

    /// Invalidate every cached resource for a `(dashboard, user)` scope.
    pub async fn invalidate_scope(&self, dashboard_id: &str, user_id: &str) {
        for resource in ResourceKind::ALL {
            self.invalidate(&CacheKey::new(dashboard_id, user_id, resource)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_cache::MemoryCache;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BrokenCache;

    #[async_trait]
    impl CacheBackend for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }

        async fn invalidate(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
    }

    fn coordinator(backend: Arc<dyn CacheBackend>) -> CacheCoordinator {
        CacheCoordinator::new(backend, Duration::from_secs(60))
    }

    #[test]
    fn test_cache_key_format() {
        let key = CacheKey::widgets("d1", "u1");
        assert_eq!(key.to_string(), "dashboard:d1:user:u1:widgets");
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = coordinator(Arc::new(MemoryCache::new()));
        let key = CacheKey::widgets("d1", "u1");
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let first = cache
            .read(&key, ReadOptions::default(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1, 2, 3])
            })
            .await
            .unwrap();
        assert!(!first.from_cache);

        let second: CachedRead<Vec<i32>> = cache
            .read(&key, ReadOptions::default(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![9])
            })
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.data, vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bust_ignores_hit_and_reads_source() {
        let backend = Arc::new(MemoryCache::new());
        let cache = coordinator(backend.clone());
        let key = CacheKey::widgets("d1", "u1");
        backend
            .set(&key.to_string(), "[\"stale\"]".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let options = ReadOptions {
            bust: true,
            cacheable: false,
        };
        let read = cache
            .read(&key, options, || async { Ok(vec!["fresh".to_string()]) })
            .await
            .unwrap();
        assert!(!read.from_cache);
        assert_eq!(read.data, vec!["fresh".to_string()]);
        assert_eq!(backend.get(&key.to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_uncacheable_read_is_not_stored() {
        let backend = Arc::new(MemoryCache::new());
        let cache = coordinator(backend.clone());
        let key = CacheKey::widgets("d1", "u1");
        let options = ReadOptions {
            bust: false,
            cacheable: false,
        };
        cache.read(&key, options, || async { Ok(1u32) }).await.unwrap();
        assert_eq!(backend.get(&key.to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_scope_forces_miss() {
        let cache = coordinator(Arc::new(MemoryCache::new()));
        let key = CacheKey::widgets("d1", "u1");
        cache.read(&key, ReadOptions::default(), || async { Ok(1u32) }).await.unwrap();

        cache.invalidate_scope("d1", "u1").await;

        let read = cache.read(&key, ReadOptions::default(), || async { Ok(2u32) }).await.unwrap();
        assert!(!read.from_cache);
        assert_eq!(read.data, 2);
    }

    #[tokio::test]
    async fn test_broken_backend_degrades_to_source() {
        let cache = coordinator(Arc::new(BrokenCache));
        let key = CacheKey::widgets("d1", "u1");
        let read = cache.read(&key, ReadOptions::default(), || async { Ok(7u32) }).await.unwrap();
        assert_eq!(read.data, 7);
        assert!(!read.from_cache);

        cache.invalidate_scope("d1", "u1").await;
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let backend = Arc::new(MemoryCache::new());
        let cache = coordinator(backend.clone());
        let key = CacheKey::widgets("d1", "u1");
        backend
            .set(&key.to_string(), "not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let read = cache.read(&key, ReadOptions::default(), || async { Ok(3u32) }).await.unwrap();
        assert!(!read.from_cache);
    }

    #[tokio::test]
    async fn test_prefetch_runs_once_per_key() {
        let cache = coordinator(Arc::new(MemoryCache::new()));
        let key = CacheKey::widgets("d1", "u1");

        assert!(cache.prefetch(&key, || async { Ok(1u32) }).await);
        assert!(!cache.prefetch(&key, || async { Ok(2u32) }).await);

        let read = cache.read(&key, ReadOptions::default(), || async { Ok(9u32) }).await.unwrap();
        assert!(read.from_cache);
        assert_eq!(read.data, 1);
    }

    #[tokio::test]
    async fn test_invalidation_rearms_prefetch() {
        let registry = PrefetchRegistry::new();
        let cache = coordinator(Arc::new(MemoryCache::new())).with_prefetch(registry.clone());
        let key = CacheKey::widgets("d1", "u1");
        assert!(cache.prefetch(&key, || async { Ok(1u32) }).await);

        cache.invalidate_scope("d1", "u1").await;
        assert!(cache.prefetch(&key, || async { Ok(2u32) }).await);

        cache.invalidate(&key).await;
        assert!(registry.claim(&key).await);

        let busted = ReadOptions {
            bust: true,
            cacheable: true,
        };
        cache.read(&key, busted, || async { Ok(3u32) }).await.unwrap();
        assert!(cache.prefetch(&key, || async { Ok(4u32) }).await);
    }

    #[tokio::test]
    async fn test_failed_prefetch_can_retry() {
        let cache = coordinator(Arc::new(MemoryCache::new()));
        let key = CacheKey::widgets("d1", "u1");

        let attempted = cache
            .prefetch::<u32, _, _>(&key, || async { anyhow::bail!("offline") })
            .await;
        assert!(attempted);
        assert!(cache.prefetch(&key, || async { Ok(1u32) }).await);
    }

    #[test]
    fn test_codec_failures_map_to_codec_error() {
        assert!(matches!(decode::<u32>("not json"), Err(CacheError::Codec(_))));
        assert_eq!(encode(&vec![1u8, 2]).unwrap(), "[1,2]");
    }

    #[tokio::test]
    async fn test_source_errors_propagate() {
        let cache = coordinator(Arc::new(MemoryCache::new()));
        let key = CacheKey::widgets("d1", "u1");
        let result: anyhow::Result<CachedRead<u32>> = cache
            .read(&key, ReadOptions::default(), || async { anyhow::bail!("database down") })
            .await;
        assert!(result.is_err());
    }
}
