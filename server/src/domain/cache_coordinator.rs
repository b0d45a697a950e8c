//! C13 CacheCoordinator: cache-aside reads over the two invalidation
//! regions (§4.13).

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::constants::{CACHE_HARD_TTL_SECS, SEEN_TRACEBACK_TTL_SECS};
use crate::data::cache::{CacheError, CacheKey, CacheService, REGION_JIRA, REGION_TRACEBACK};

#[derive(Clone)]
pub struct CacheCoordinator {
    cache: Arc<CacheService>,
}

impl CacheCoordinator {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    /// Cache-aside read (§4.13): return the cached value if present,
    /// otherwise call `builder`, cache its result, and return it.
    ///
    /// The soft/hard TTL split (§4.13) only matters when a background
    /// refresh can beat an expiring key to the punch; since every miss here
    /// recomputes synchronously, a single hard TTL is what's stored.
    pub async fn get<T, F, Fut, E>(&self, key: &str, builder: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Ok(Some(value)) = self.cache.get::<T>(key).await {
            return Ok(value);
        }

        let value = builder().await?;
        if let Err(e) = self
            .cache
            .set(key, &value, Some(Duration::from_secs(CACHE_HARD_TTL_SECS)))
            .await
        {
            tracing::warn!(key = %key, error = %e, "Failed to populate cache");
        }
        Ok(value)
    }

    /// Invalidate an entire region (§4.13). Callers are responsible for
    /// enqueuing `hydrate_cache()` afterward (C11).
    pub async fn invalidate(&self, region: &str) -> Result<u64, CacheError> {
        self.cache.invalidate_region(region).await
    }

    pub async fn invalidate_traceback(&self) -> Result<u64, CacheError> {
        self.cache.invalidate(REGION_TRACEBACK).await
    }

    pub async fn invalidate_jira(&self) -> Result<u64, CacheError> {
        self.cache.invalidate(REGION_JIRA).await
    }

    /// `SeenTracebackFlag` (§3): mark `origin_id` as posted to chat. Returns
    /// `true` the first time this is called for a given id within the TTL
    /// window, `false` on every repeat — the caller should only post on `true`
    /// (Testable Property 3, "at most once").
    pub async fn mark_seen_once(&self, origin_id: &str) -> Result<bool, CacheError> {
        let key = CacheKey::seen_traceback(origin_id);
        if self.cache.exists(&key).await? {
            return Ok(false);
        }
        self.cache.set_raw(&key, vec![1], Some(Duration::from_secs(SEEN_TRACEBACK_TTL_SECS))).await?;
        Ok(true)
    }

    /// `HiddenTracebackSet` (§3): dismiss `origin_id` from the day's triage
    /// view until the next `restore_all`.
    pub async fn hide_traceback(&self, origin_id: &str) -> Result<(), CacheError> {
        let key = CacheKey::hidden_tracebacks();
        let mut ids: Vec<String> = self.cache.get(&key).await?.unwrap_or_default();
        if !ids.iter().any(|id| id == origin_id) {
            ids.push(origin_id.to_string());
            self.cache.set(&key, &ids, None).await?;
        }
        Ok(())
    }

    pub async fn hidden_traceback_ids(&self) -> Result<HashSet<String>, CacheError> {
        let key = CacheKey::hidden_tracebacks();
        Ok(self.cache.get::<Vec<String>>(&key).await?.unwrap_or_default().into_iter().collect())
    }

    /// Clear every dismissed id, bringing them back into the day's view.
    pub async fn restore_all_tracebacks(&self) -> Result<(), CacheError> {
        self.cache.delete(&CacheKey::hidden_tracebacks()).await?;
        Ok(())
    }

    /// `/healthz`'s "kv reachable" check.
    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.cache.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheBackendType, CacheConfig, EvictionPolicy};
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn coordinator() -> CacheCoordinator {
        let cache = CacheService::new(&CacheConfig {
            backend: CacheBackendType::Memory,
            max_entries: 1000,
            eviction_policy: EvictionPolicy::TinyLfu,
            redis_url: None,
        })
        .await
        .unwrap();
        CacheCoordinator::new(Arc::new(cache))
    }

    #[tokio::test]
    async fn test_get_only_calls_builder_once_for_repeated_keys() {
        let coordinator = coordinator().await;
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value: String = coordinator
                .get("v1:traceback:id:1", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>("value".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "value");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_traceback_forces_recompute() {
        let coordinator = coordinator().await;
        let calls = Arc::new(AtomicU32::new(0));

        let build = |calls: Arc<AtomicU32>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::convert::Infallible>(42u32)
        };

        coordinator.get("v1:traceback:id:1", || build(calls.clone())).await.unwrap();
        coordinator.invalidate_traceback().await.unwrap();
        coordinator.get("v1:traceback:id:1", || build(calls.clone())).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    // Testable Property 3: posting is marked seen on the first call only.
    #[tokio::test]
    async fn test_mark_seen_once_is_true_only_on_first_call() {
        let coordinator = coordinator().await;
        assert!(coordinator.mark_seen_once("700594297938165774").await.unwrap());
        assert!(!coordinator.mark_seen_once("700594297938165774").await.unwrap());
        assert!(coordinator.mark_seen_once("other-id").await.unwrap());
    }

    #[tokio::test]
    async fn test_hide_and_restore_tracebacks() {
        let coordinator = coordinator().await;
        coordinator.hide_traceback("1").await.unwrap();
        coordinator.hide_traceback("2").await.unwrap();
        coordinator.hide_traceback("1").await.unwrap();

        let hidden = coordinator.hidden_traceback_ids().await.unwrap();
        assert_eq!(hidden.len(), 2);
        assert!(hidden.contains("1") && hidden.contains("2"));

        coordinator.restore_all_tracebacks().await.unwrap();
        assert!(coordinator.hidden_traceback_ids().await.unwrap().is_empty());
    }
}
