use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use scrape_metrics::constants::OP_LABEL;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteCacheError {
    #[error("key not found")]
    NotFound,
    #[error("operation timed out")]
    Timeout,
    #[error("no remote cache endpoint is reachable")]
    Unavailable,
    #[error("remote cache error: {0}")]
    Other(String),
}

/// Abstraction over the remote tier so `CacheManager` can be exercised
/// against a recording mock in tests without a live Redis server.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, RemoteCacheError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), RemoteCacheError>;
    async fn del(&self, key: &str) -> Result<(), RemoteCacheError>;
    /// Approximate: may miss keys written concurrently with the scan, same
    /// as any non-transactional SCAN-based enumeration. Missed keys expire
    /// by TTL.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, RemoteCacheError>;
    async fn ping(&self) -> Result<(), RemoteCacheError>;
}

struct Inner {
    endpoints: Vec<String>,
    current: AtomicUsize,
    conn: RwLock<Option<redis::aio::MultiplexedConnection>>,
    reconnecting: Mutex<()>,
    op_timeout: Duration,
}

/// Pooled Redis client with endpoint failover: connections are multiplexed
/// (the idiomatic async "pool" in this ecosystem), every operation is
/// wrapped in a bounded timeout, and a background task pings the active
/// endpoint on a timer, rotating to the next candidate endpoint on failure.
pub struct RedisRemoteCache {
    inner: Arc<Inner>,
}

impl RedisRemoteCache {
    pub async fn new(endpoints: Vec<String>, op_timeout: Duration, health_check_interval: Duration) -> Self {
        let inner = Arc::new(Inner {
            endpoints,
            current: AtomicUsize::new(0),
            conn: RwLock::new(None),
            reconnecting: Mutex::new(()),
            op_timeout,
        });

        // Best-effort initial connect; if every endpoint is down at startup
        // the client simply starts in the "unavailable" state and the
        // health-check loop keeps retrying.
        Self::reconnect(inner.clone()).await;

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(health_check_interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if Self::ping_inner(&inner).await.is_err() {
                    warn!("remote cache health check failed, attempting failover");
                    Self::reconnect(inner).await;
                }
            }
        });

        RedisRemoteCache { inner }
    }

    async fn reconnect(inner: Arc<Inner>) {
        let _guard = inner.reconnecting.lock().await;
        let start = inner.current.load(Ordering::Relaxed);
        let n = inner.endpoints.len();
        if n == 0 {
            return;
        }
        for offset in 0..n {
            let idx = (start + offset) % n;
            let endpoint = &inner.endpoints[idx];
            match redis::Client::open(endpoint.as_str()) {
                Ok(client) => match client.get_multiplexed_async_connection().await {
                    Ok(new_conn) => {
                        *inner.conn.write().await = Some(new_conn);
                        inner.current.store(idx, Ordering::Relaxed);
                        scrape_metrics::inc(
                            "scrape_remote_cache_connections_created_total",
                            &[],
                            1,
                        );
                        return;
                    }
                    Err(err) => {
                        warn!(endpoint, %err, "failed to connect to remote cache endpoint");
                    }
                },
                Err(err) => {
                    warn!(endpoint, %err, "invalid remote cache endpoint url");
                }
            }
        }
        *inner.conn.write().await = None;
        scrape_metrics::inc("scrape_remote_cache_connection_errors_total", &[], 1);
    }

    async fn ping_inner(inner: &Arc<Inner>) -> Result<(), RemoteCacheError> {
        let mut guard = inner.conn.write().await;
        let Some(conn) = guard.as_mut() else {
            return Err(RemoteCacheError::Unavailable);
        };
        let result: Result<String, _> = tokio::time::timeout(
            inner.op_timeout,
            redis::cmd("PING").query_async(conn),
        )
        .await
        .map_err(|_| RemoteCacheError::Timeout)?
        .map_err(|e| RemoteCacheError::Other(e.to_string()));
        result.map(|_| ())
    }

    async fn with_conn<F, Fut, T>(&self, op: &'static str, f: F) -> Result<T, RemoteCacheError>
    where
        F: FnOnce(redis::aio::MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let conn = {
            let guard = self.inner.conn.read().await;
            guard.clone()
        };
        let Some(conn) = conn else {
            scrape_metrics::inc(
                "scrape_remote_cache_errors_total",
                &[(OP_LABEL.to_string(), op.to_string())],
                1,
            );
            return Err(RemoteCacheError::Unavailable);
        };

        let timing = scrape_metrics::timing_guard(
            "scrape_remote_cache_op_latency_ms",
            &[(OP_LABEL.to_string(), op.to_string())],
        );
        let result = tokio::time::timeout(self.inner.op_timeout, f(conn)).await;
        timing.fin();

        match result {
            Err(_) => {
                scrape_metrics::inc(
                    "scrape_remote_cache_errors_total",
                    &[(OP_LABEL.to_string(), op.to_string())],
                    1,
                );
                Err(RemoteCacheError::Timeout)
            }
            Ok(Err(err)) => {
                scrape_metrics::inc(
                    "scrape_remote_cache_errors_total",
                    &[(OP_LABEL.to_string(), op.to_string())],
                    1,
                );
                Err(RemoteCacheError::Other(err.to_string()))
            }
            Ok(Ok(value)) => Ok(value),
        }
    }
}

#[async_trait]
impl RemoteCache for RedisRemoteCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, RemoteCacheError> {
        let key = key.to_string();
        let value: Option<Vec<u8>> = self
            .with_conn("get", |mut conn| async move { conn.get(&key).await })
            .await?;
        value.ok_or(RemoteCacheError::NotFound)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), RemoteCacheError> {
        let key = key.to_string();
        self.with_conn("set", move |mut conn| async move {
            match ttl {
                Some(ttl) => conn.set_ex(&key, value, ttl.as_secs().max(1)).await,
                None => conn.set(&key, value).await,
            }
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<(), RemoteCacheError> {
        let key = key.to_string();
        self.with_conn("del", move |mut conn| async move { conn.del(&key).await })
            .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, RemoteCacheError> {
        let pattern = format!("{prefix}*");
        self.with_conn("scan", move |mut conn| async move {
            let mut keys = Vec::new();
            let mut iter: redis::AsyncIter<String> = conn.scan_match(&pattern).await?;
            use futures::StreamExt;
            while let Some(key) = iter.next().await {
                keys.push(key);
            }
            Ok(keys)
        })
        .await
    }

    async fn ping(&self) -> Result<(), RemoteCacheError> {
        Self::ping_inner(&self.inner).await
    }
}

/// Records every call made against it, the way the reference stack's Redis
/// mock does, so cache-manager tests can assert on write behavior (e.g.
/// "a corrupted read triggers exactly one set back to remote") without a
/// live server.
#[derive(Default)]
pub struct MockRemoteCache {
    store: Mutex<HashMap<String, Vec<u8>>>,
    pub calls: Mutex<Vec<String>>,
    pub force_unavailable: std::sync::atomic::AtomicBool,
}

impl MockRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RemoteCache for MockRemoteCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, RemoteCacheError> {
        self.calls.lock().await.push(format!("get:{key}"));
        if self.force_unavailable.load(Ordering::Relaxed) {
            return Err(RemoteCacheError::Unavailable);
        }
        self.store
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or(RemoteCacheError::NotFound)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        _ttl: Option<Duration>,
    ) -> Result<(), RemoteCacheError> {
        self.calls.lock().await.push(format!("set:{key}"));
        if self.force_unavailable.load(Ordering::Relaxed) {
            return Err(RemoteCacheError::Unavailable);
        }
        self.store.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), RemoteCacheError> {
        self.calls.lock().await.push(format!("del:{key}"));
        self.store.lock().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, RemoteCacheError> {
        self.calls.lock().await.push(format!("scan:{prefix}"));
        Ok(self
            .store
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), RemoteCacheError> {
        if self.force_unavailable.load(Ordering::Relaxed) {
            return Err(RemoteCacheError::Unavailable);
        }
        Ok(())
    }
}
