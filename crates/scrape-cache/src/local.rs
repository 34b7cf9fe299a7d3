use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;

#[derive(Clone)]
struct Entry {
    value: Arc<Vec<u8>>,
    ttl: Duration,
}

/// Per-entry TTL support: Moka's builder-level `time_to_live` is cache-wide,
/// but cache keys here carry mixed TTLs (status views, job results, DNS
/// negatives), so expiry is driven by a value stored alongside each entry
/// instead.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// A bounded-size local cache tier backed by Moka's concurrent TinyLFU
/// cache: byte-weighted capacity via a weigher, per-entry TTL via the
/// `Expiry` trait, lock-free reads off the hot path.
pub struct LocalCache {
    cache: Cache<String, Entry>,
}

impl LocalCache {
    pub fn new(max_bytes: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key: &String, value: &Entry| -> u32 {
                u32::try_from(value.value.len()).unwrap_or(u32::MAX)
            })
            .support_invalidation_closures()
            .expire_after(PerEntryTtl)
            .build();
        LocalCache { cache }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.cache.get(key).map(|entry| entry.value.as_ref().clone())
    }

    pub fn set(&self, key: String, value: Vec<u8>, ttl: Duration) {
        self.cache.insert(
            key,
            Entry {
                value: Arc::new(value),
                ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.cache.invalidate(key);
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn clear_prefix(&self, prefix: &str) {
        let prefix = prefix.to_string();
        self.cache
            .invalidate_entries_if(move |k, _| k.starts_with(&prefix))
            .expect("invalidate_entries_if is only unsupported without an eviction listener");
        self.cache.run_pending_tasks();
    }

    pub fn approx_bytes(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }
}
