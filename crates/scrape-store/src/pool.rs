use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Pool sizing and lifetime knobs. Mirrors the reference stack's database
/// helper defaults, tuned down slightly for a single-service workload
/// rather than a shared multi-tenant pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(300)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub pool: PoolConfig,
}

pub async fn connect(config: &StoreConfig) -> Result<PgPool, sqlx::Error> {
    let mut options = PgPoolOptions::new()
        .max_connections(config.pool.max_connections)
        .acquire_timeout(config.pool.acquire_timeout);

    if let Some(idle_timeout) = config.pool.idle_timeout {
        options = options.idle_timeout(idle_timeout);
    }
    if let Some(max_lifetime) = config.pool.max_lifetime {
        options = options.max_lifetime(max_lifetime);
    }

    let pool = options.connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
