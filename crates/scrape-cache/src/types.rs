use std::fmt;

/// Namespacing and default TTL for one cache manager instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prepended to every key, separated from the key by `:`.
    pub global_prefix: String,
    /// Default remote-tier TTL. `None` means entries never expire on
    /// their own (still subject to eviction).
    pub ttl_seconds: Option<u64>,
    /// Upper bound on the local tier's total approximate byte size.
    pub local_max_bytes: u64,
    /// TTL ceiling applied to the local tier regardless of the caller's
    /// requested TTL (`min(requested, local_tier_ttl)` per the read/write
    /// path contract).
    pub local_tier_ttl_seconds: u64,
    /// Serialized values at or above this size are gzip-compressed before
    /// being written to the remote tier.
    pub compression_threshold_bytes: usize,
}

impl CacheConfig {
    pub fn new(global_prefix: impl Into<String>) -> Self {
        CacheConfig {
            global_prefix: global_prefix.into(),
            ttl_seconds: Some(300),
            local_max_bytes: 16 * 1024 * 1024,
            local_tier_ttl_seconds: 60,
            compression_threshold_bytes: 1024,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn build_key(&self, sub_prefix: Option<&str>, key: &str) -> String {
        match sub_prefix {
            Some(sub) => format!("{}:{}:{}", self.global_prefix, sub, key),
            None => format!("{}:{}", self.global_prefix, key),
        }
    }
}

/// Where a `get` was ultimately satisfied from, for observability. Mirrors
/// the outcome taxonomy a read-through cache needs regardless of how many
/// tiers it has: which tier answered, and whether the remote tier was even
/// reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheSource {
    LocalHit,
    RemoteHit,
    Miss,
    RemoteUnavailable,
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheSource::LocalHit => "local_hit",
            CacheSource::RemoteHit => "remote_hit",
            CacheSource::Miss => "miss",
            CacheSource::RemoteUnavailable => "remote_unavailable",
        };
        f.write_str(s)
    }
}

impl CacheSource {
    pub fn was_cached(self) -> bool {
        matches!(self, CacheSource::LocalHit | CacheSource::RemoteHit)
    }

    pub fn had_cache_problem(self) -> bool {
        matches!(self, CacheSource::RemoteUnavailable)
    }
}

/// The result of a `CacheManager::get`.
#[derive(Debug, Clone)]
pub struct CacheResult<V> {
    pub value: Option<V>,
    pub source: CacheSource,
}

impl<V> CacheResult<V> {
    pub fn found(value: V, source: CacheSource) -> Self {
        CacheResult {
            value: Some(value),
            source,
        }
    }

    pub fn not_found(source: CacheSource) -> Self {
        CacheResult {
            value: None,
            source,
        }
    }
}
