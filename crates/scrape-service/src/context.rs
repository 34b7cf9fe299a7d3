use std::collections::HashMap;
use std::sync::Arc;

use scrape_cache::{CacheConfig, CacheManager, RedisRemoteCache};
use scrape_dispatch::{Fetcher, HeadlessBrowserFetcher, LightHttpFetcher};
use scrape_executor::{BulkCoordinator, RetryPolicy, WorkerPool};
use scrape_health::HealthRegistry;
use scrape_queue::JobQueue;
use scrape_store::{Store, StoreConfig};
use scrape_types::ScraperVariant;
use thiserror::Error;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("fetcher construction failed: {0}")]
    Fetcher(String),
    #[error("startup recovery failed: {0}")]
    Recovery(#[from] scrape_types::CoreError),
}

/// Everything the API handlers and the worker pool need, assembled once at
/// process start. Cheap to clone (everything inside is already an `Arc` or
/// plain config data) so it can be handed to axum as request state and into
/// the worker pool's spawned tasks alike.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<Store>,
    pub queue: Arc<JobQueue>,
    pub cache: Arc<CacheManager>,
    pub bulk: Arc<BulkCoordinator>,
    pub workers: Arc<WorkerPool>,
    pub health: HealthRegistry,
    pub config: AppConfig,
}

impl AppContext {
    pub async fn create(
        config: AppConfig,
        store_config: StoreConfig,
        health: HealthRegistry,
    ) -> Result<Self, StartupError> {
        let pool = scrape_store::connect(&store_config).await?;
        scrape_store::recover_on_startup(&pool).await?;
        let store = Arc::new(Store::new(pool));

        let cache_config = CacheConfig::new("scrape")
            .with_ttl(config.cache_ttl_seconds);
        let cache_config = CacheConfig {
            local_max_bytes: config.cache_local_max_bytes,
            local_tier_ttl_seconds: config.cache_local_ttl_seconds,
            compression_threshold_bytes: config.cache_compression_threshold_bytes,
            ..cache_config
        };
        let remote = Arc::new(
            RedisRemoteCache::new(
                config.remote_cache_endpoints.clone(),
                config.cache_op_timeout,
                config.cache_health_check_interval,
            )
            .await,
        );
        let cache = Arc::new(CacheManager::new(cache_config, remote));

        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let bulk = Arc::new(BulkCoordinator::new());

        // The queue holds no state across restarts; repopulate it from
        // every job the store still considers QUEUED (including ones
        // `recover_on_startup` just bounced back from an orphaned RUNNING).
        for (job_id, priority) in store.queued_for_recovery().await? {
            if let Err(err) = queue.try_enqueue(job_id, priority) {
                tracing::warn!(%job_id, %err, "dropped queued job while repopulating queue at startup");
            }
        }

        let mut fetchers: HashMap<ScraperVariant, Arc<dyn Fetcher>> = HashMap::new();
        let light_http = LightHttpFetcher::new(config.allow_internal_ips)
            .map_err(|e| StartupError::Fetcher(e.to_string()))?;
        fetchers.insert(ScraperVariant::LightHttp, Arc::new(light_http));
        fetchers.insert(ScraperVariant::HeadlessBrowser, Arc::new(HeadlessBrowserFetcher));

        let retry_policy = RetryPolicy {
            backoff_coefficient: config.retry_backoff_coefficient,
            maximum_interval: config.retry_max_interval,
        };

        let workers = Arc::new(WorkerPool::new(
            queue.clone(),
            store.clone(),
            fetchers,
            retry_policy,
            bulk.clone(),
        ));

        Ok(AppContext {
            store,
            queue,
            cache,
            bulk,
            workers,
            health,
            config,
        })
    }
}
