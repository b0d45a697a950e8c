//! No-op cache backend for `USE_DOGPILE_CACHE=false` (§6, §9): every read is
//! a miss, every write is discarded. CacheCoordinator callers don't need to
//! special-case this; they just always recompute.

use std::time::Duration;

use async_trait::async_trait;

use super::backend::CacheBackend;
use super::error::CacheError;

pub struct NullCache;

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn delete_pattern(&self, _pattern: &str) -> Result<u64, CacheError> {
        Ok(0)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_always_misses() {
        let cache = NullCache;
        cache.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_pattern_is_noop() {
        let cache = NullCache;
        assert_eq!(cache.delete_pattern("traceback:*").await.unwrap(), 0);
    }
}
