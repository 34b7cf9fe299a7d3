use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use scrape_metrics::constants::{CACHE_HIT_RATIO, CACHE_HITS, CACHE_MISSES, TIER_LABEL};

use crate::compression::{maybe_compress, maybe_decompress};
use crate::local::LocalCache;
use crate::remote::RemoteCache;
use crate::types::{CacheConfig, CacheResult, CacheSource};

/// The single get/set/delete/clear_prefix surface the rest of the core
/// talks to. Consults the local tier first, falls through to the remote
/// tier on miss, and degrades to a miss (never an error) when the remote
/// tier is unreachable.
pub struct CacheManager {
    local: LocalCache,
    remote: Arc<dyn RemoteCache>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn new(config: CacheConfig, remote: Arc<dyn RemoteCache>) -> Self {
        CacheManager {
            local: LocalCache::new(config.local_max_bytes),
            remote,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn local_ttl(&self, requested: Option<Duration>) -> Duration {
        let ceiling = Duration::from_secs(self.config.local_tier_ttl_seconds);
        match requested {
            Some(d) => d.min(ceiling),
            None => ceiling,
        }
    }

    pub async fn get<V: DeserializeOwned>(
        &self,
        sub_prefix: Option<&str>,
        key: &str,
    ) -> CacheResult<V> {
        let full_key = self.config.build_key(sub_prefix, key);

        if let Some(bytes) = self.local.get(&full_key) {
            self.record_hit(CacheSource::LocalHit);
            return self.deserialize_or_miss(bytes, CacheSource::LocalHit);
        }

        match self.remote.get(&full_key).await {
            Ok(raw) => {
                let plain = maybe_decompress(raw);
                let local_ttl = self.local_ttl(self.config.ttl_seconds.map(Duration::from_secs));
                self.local.set(full_key, plain.clone(), local_ttl);
                self.record_hit(CacheSource::RemoteHit);
                self.deserialize_or_miss(plain, CacheSource::RemoteHit)
            }
            Err(crate::remote::RemoteCacheError::NotFound) => {
                self.record_miss(CacheSource::Miss);
                CacheResult::not_found(CacheSource::Miss)
            }
            Err(err) => {
                warn!(%err, "remote cache unavailable on read, degrading to miss");
                self.record_miss(CacheSource::RemoteUnavailable);
                CacheResult::not_found(CacheSource::RemoteUnavailable)
            }
        }
    }

    fn deserialize_or_miss<V: DeserializeOwned>(
        &self,
        bytes: Vec<u8>,
        source: CacheSource,
    ) -> CacheResult<V> {
        match serde_json::from_slice::<V>(&bytes) {
            Ok(value) => CacheResult::found(value, source),
            Err(err) => {
                warn!(%err, "cached value failed to deserialize, treating as miss");
                CacheResult::not_found(CacheSource::Miss)
            }
        }
    }

    pub async fn set<V: Serialize>(
        &self,
        sub_prefix: Option<&str>,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) {
        let full_key = self.config.build_key(sub_prefix, key);
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(err) => {
                warn!(%err, "failed to serialize value for cache write");
                return;
            }
        };

        self.local.set(full_key.clone(), bytes.clone(), self.local_ttl(ttl));

        let tagged = maybe_compress(bytes, self.config.compression_threshold_bytes);
        let remote_ttl = ttl.or(self.config.ttl_seconds.map(Duration::from_secs));
        if let Err(err) = self.remote.set(&full_key, tagged, remote_ttl).await {
            warn!(%err, key = %full_key, "remote cache write failed, local tier still holds value");
        }
    }

    pub async fn delete(&self, sub_prefix: Option<&str>, key: &str) {
        let full_key = self.config.build_key(sub_prefix, key);
        self.local.delete(&full_key);
        if let Err(err) = self.remote.del(&full_key).await {
            warn!(%err, key = %full_key, "remote cache delete failed");
        }
    }

    /// Enumerates matching remote keys and deletes them from both tiers.
    /// The enumeration is approximate (a SCAN, not a transaction); missed
    /// keys simply expire by TTL.
    pub async fn clear_prefix(&self, prefix: &str) {
        let full_prefix = format!("{}:{}", self.config.global_prefix, prefix);
        self.local.clear_prefix(&full_prefix);
        match self.remote.scan_prefix(&full_prefix).await {
            Ok(keys) => {
                for key in keys {
                    if let Err(err) = self.remote.del(&key).await {
                        warn!(%err, key, "failed to delete key during prefix invalidation");
                    }
                }
            }
            Err(err) => {
                warn!(%err, prefix = %full_prefix, "prefix scan failed, remote keys will expire by ttl");
            }
        }
    }

    fn record_hit(&self, source: CacheSource) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        scrape_metrics::inc(
            CACHE_HITS,
            &[(TIER_LABEL.to_string(), source.to_string())],
            1,
        );
        self.update_hit_ratio();
    }

    fn record_miss(&self, source: CacheSource) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        scrape_metrics::inc(
            CACHE_MISSES,
            &[(TIER_LABEL.to_string(), source.to_string())],
            1,
        );
        self.update_hit_ratio();
    }

    fn update_hit_ratio(&self) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total > 0 {
            scrape_metrics::gauge(CACHE_HIT_RATIO, &[], hits as f64 / total as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemoteCache;
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn manager(remote: Arc<MockRemoteCache>) -> CacheManager {
        CacheManager::new(CacheConfig::new("test"), remote)
    }

    #[tokio::test]
    async fn set_then_get_is_local_hit() {
        let remote = Arc::new(MockRemoteCache::new());
        let mgr = manager(remote);
        mgr.set(None, "k", &"v".to_string(), None).await;
        let result: CacheResult<String> = mgr.get(None, "k").await;
        assert_eq!(result.value.as_deref(), Some("v"));
        assert_eq!(result.source, CacheSource::LocalHit);
    }

    #[tokio::test]
    async fn remote_hit_populates_local_tier() {
        let remote = Arc::new(MockRemoteCache::new());
        remote
            .set("test:k", serde_json::to_vec(&"v").unwrap(), None)
            .await
            .unwrap();
        let mgr = manager(remote.clone());

        let first: CacheResult<String> = mgr.get(None, "k").await;
        assert_eq!(first.source, CacheSource::RemoteHit);

        let calls_after_first = remote.calls().await.len();
        let second: CacheResult<String> = mgr.get(None, "k").await;
        assert_eq!(second.source, CacheSource::LocalHit);
        assert_eq!(remote.calls().await.len(), calls_after_first);
    }

    #[tokio::test]
    async fn remote_unavailable_degrades_to_miss_not_error() {
        let remote = Arc::new(MockRemoteCache::new());
        remote.force_unavailable.store(true, AtomicOrdering::Relaxed);
        let mgr = manager(remote);
        let result: CacheResult<String> = mgr.get(None, "k").await;
        assert_eq!(result.value, None);
        assert_eq!(result.source, CacheSource::RemoteUnavailable);
    }

    #[tokio::test]
    async fn set_still_succeeds_locally_when_remote_unavailable() {
        let remote = Arc::new(MockRemoteCache::new());
        remote.force_unavailable.store(true, AtomicOrdering::Relaxed);
        let mgr = manager(remote);
        mgr.set(None, "k", &"v".to_string(), None).await;
        let result: CacheResult<String> = mgr.get(None, "k").await;
        assert_eq!(result.value.as_deref(), Some("v"));
        assert_eq!(result.source, CacheSource::LocalHit);
    }

    #[tokio::test]
    async fn clear_prefix_removes_from_both_tiers() {
        let remote = Arc::new(MockRemoteCache::new());
        let mgr = manager(remote.clone());
        mgr.set(Some("sub"), "a", &"1".to_string(), None).await;
        mgr.clear_prefix("sub").await;
        let result: CacheResult<String> = mgr.get(Some("sub"), "a").await;
        assert_eq!(result.value, None);
    }
}
