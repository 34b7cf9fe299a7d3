use std::sync::Arc;

use envconfig::Envconfig;
use scrape_health::HealthRegistry;
use scrape_metrics::setup_metrics_routes;
use scrape_service::{config::Config, context::AppContext};
use tracing::{error, info};

/// Periodically re-scans for `RUNNING` jobs orphaned by a worker that died
/// mid-fetch and re-admits them to the queue, mirroring the startup sweep
/// `AppContext::create` already runs once. Only active when
/// `RECOVERY_SCAN_INTERVAL_SECONDS` is set; the startup-only sweep from
/// §9's "Queue persistence" decision is otherwise sufficient.
async fn recovery_loop(ctx: Arc<AppContext>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match ctx.store.recover_orphaned_running().await {
            Ok(0) => {}
            Ok(recovered) => {
                info!(recovered, "periodic recovery scan requeued orphaned jobs");
                if let Ok(queued) = ctx.store.queued_for_recovery().await {
                    for (job_id, priority) in queued {
                        let _ = ctx.queue.try_enqueue(job_id, priority);
                    }
                }
            }
            Err(err) => error!(%err, "periodic recovery scan failed"),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = Config::init_from_env().expect("failed to load configuration from env");
    let (app_config, store_config) = config.to_components();
    let bind = format!("{}:{}", app_config.host, app_config.port);

    let health = HealthRegistry::new("scrape-core");
    let worker_pool_size = app_config.worker_pool_size;
    let recovery_scan_interval = app_config.recovery_scan_interval;

    info!(bind, worker_pool_size, "scrape orchestration core starting");

    let ctx = Arc::new(
        AppContext::create(app_config, store_config, health.clone())
            .await
            .expect("failed to assemble app context"),
    );

    let worker_handles = scrape_executor::WorkerPool::spawn(&ctx.workers, worker_pool_size, &health).await;

    if let Some(interval) = recovery_scan_interval {
        tokio::spawn(recovery_loop(ctx.clone(), interval));
    }

    let app = setup_metrics_routes(scrape_service::api::router(ctx.clone()));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind}: {e}"));

    info!(bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("http server exited with error");

    info!("shutdown signal received, aborting worker loops");
    for handle in worker_handles {
        handle.abort();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
