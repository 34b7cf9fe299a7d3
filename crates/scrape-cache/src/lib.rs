//! Two-tier read-through cache: a bounded in-process LRU+TTL local tier
//! fronting a pooled, failover-capable remote tier, presented through a
//! single namespaced get/set/delete/clear_prefix surface.

mod compression;
mod local;
mod manager;
mod remote;
mod types;

pub use local::LocalCache;
pub use manager::CacheManager;
pub use remote::{MockRemoteCache, RedisRemoteCache, RemoteCache, RemoteCacheError};
pub use types::{CacheConfig, CacheResult, CacheSource};
