use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use scrape_dispatch::{FetchError, FetchRequest, Fetcher, LightHttpFetcher};
use scrape_executor::{BulkCoordinator, RetryPolicy, WorkerPool};
use scrape_health::HealthRegistry;
use scrape_queue::JobQueue;
use scrape_store::Store;
use scrape_types::{HttpMethod, Job, JobResult, JobStatus, ScrapeConfig, ScraperVariant};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

fn light_http_job(url: &str, max_retries: u32) -> Job {
    let mut config = ScrapeConfig::default();
    config.max_retries = max_retries;
    config.delay_between_retries_secs = 0;
    config.timeout_secs = 5;
    Job::new(
        url.to_string(),
        HttpMethod::Get,
        HashMap::new(),
        HashMap::new(),
        None,
        ScraperVariant::LightHttp,
        config,
        vec![],
        0,
        max_retries,
        None,
    )
    .expect("valid job")
}

async fn spawn_pool(
    pool: PgPool,
    workers: usize,
) -> (Arc<Store>, Arc<JobQueue>, Arc<BulkCoordinator>, Vec<tokio::task::JoinHandle<()>>) {
    let store = Arc::new(Store::new(pool));
    let queue = Arc::new(JobQueue::new(1_000));
    let bulk = Arc::new(BulkCoordinator::new());
    let mut fetchers: HashMap<ScraperVariant, Arc<dyn Fetcher>> = HashMap::new();
    fetchers.insert(ScraperVariant::LightHttp, Arc::new(LightHttpFetcher::new(false).unwrap()));

    let worker_pool = Arc::new(WorkerPool::new(
        queue.clone(),
        store.clone(),
        fetchers,
        RetryPolicy::default(),
        bulk.clone(),
    ));
    let health = HealthRegistry::new("test");
    let handles = WorkerPool::spawn(&worker_pool, workers, &health).await;
    (store, queue, bulk, handles)
}

async fn wait_until_terminal(store: &Store, job_id: uuid::Uuid, timeout: Duration) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store.get(job_id).await.expect("job must exist");
        if matches!(job.status, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled) {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {job_id} did not reach a terminal state in time (status={:?})", job.status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// S1 - simple success: a job against a healthy origin completes with the
/// expected status code and is never retried.
#[sqlx::test(migrations = "../scrape-store/migrations")]
async fn simple_success(pool: PgPool) {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/ok");
        then.status(200).header("content-type", "text/plain").body("hello");
    });

    let (store, queue, _bulk, _handles) = spawn_pool(pool, 2).await;
    let job = light_http_job(&server.url("/ok"), 3);
    store.create(&job).await.unwrap();
    queue.try_enqueue(job.id, job.priority).unwrap();

    let finished = wait_until_terminal(&store, job.id, Duration::from_secs(5)).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.retry_count, 0);
    assert_eq!(finished.result.unwrap().status_code, 200);
}

/// S2 - retry then succeed: two 500s followed by a 200 leaves the job
/// COMPLETED with retry_count == 2.
#[sqlx::test(migrations = "../scrape-store/migrations")]
async fn retry_then_succeed(pool: PgPool) {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/flaky");
        then.status(500);
    });

    let (store, queue, _bulk, _handles) = spawn_pool(pool, 1).await;
    let job = light_http_job(&server.url("/flaky"), 3);
    store.create(&job).await.unwrap();
    queue.try_enqueue(job.id, job.priority).unwrap();

    // Let it fail twice, then swap the mock to succeed for the third try.
    tokio::time::sleep(Duration::from_millis(150)).await;
    mock.delete();
    server.mock(|when, then| {
        when.method(GET).path("/flaky");
        then.status(200).body("ok");
    });

    let finished = wait_until_terminal(&store, job.id, Duration::from_secs(5)).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.retry_count, 2);
}

/// S3 - cancel while queued: a job cancelled before any worker claims it
/// must terminate CANCELLED without ever reaching RUNNING.
#[sqlx::test(migrations = "../scrape-store/migrations")]
async fn cancel_while_queued(pool: PgPool) {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET);
        then.status(200).delay(Duration::from_secs(2));
    });

    // Single worker, busy with one slow job, so a second job sits QUEUED
    // long enough to be cancelled before it is ever claimed.
    let (store, queue, _bulk, _handles) = spawn_pool(pool, 1).await;

    let busy = light_http_job(&server.url("/busy"), 0);
    store.create(&busy).await.unwrap();
    queue.try_enqueue(busy.id, busy.priority).unwrap();

    let victim = light_http_job(&server.url("/victim"), 0);
    store.create(&victim).await.unwrap();
    queue.try_enqueue(victim.id, victim.priority).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(queue.cancel(victim.id));
    store
        .transition(
            victim.id,
            JobStatus::Queued,
            JobStatus::Cancelled,
            scrape_store::JobPatch {
                completed_at: Some(Some(chrono::Utc::now())),
                error_message: Some(Some("cancelled before dispatch".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let victim_after = store.get(victim.id).await.unwrap();
    assert_eq!(victim_after.status, JobStatus::Cancelled);
    assert!(victim_after.started_at.is_none());
}

/// S4 - cancel while running: a job cancelled mid-fetch must be observed
/// at the fetcher's next suspension point and terminate CANCELLED, never
/// FAILED.
#[sqlx::test(migrations = "../scrape-store/migrations")]
async fn cancel_while_running(pool: PgPool) {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/slow");
        then.status(200).delay(Duration::from_secs(30));
    });

    let (store, queue, _bulk, _handles) = spawn_pool(pool, 1).await;
    let job = light_http_job(&server.url("/slow"), 0);
    store.create(&job).await.unwrap();
    queue.try_enqueue(job.id, job.priority).unwrap();

    // Give the worker time to claim the job and start the fetch before
    // requesting a cancel.
    tokio::time::sleep(Duration::from_millis(150)).await;
    store.request_cancel(job.id).await.unwrap();

    let finished = wait_until_terminal(&store, job.id, Duration::from_secs(10)).await;
    assert_eq!(finished.status, JobStatus::Cancelled);
}

/// S5 - bulk stop_on_error: a non-retryable execution failure in one job
/// of a bulk submission aborts the rest of the bulk, which terminate
/// CANCELLED without ever running.
#[sqlx::test(migrations = "../scrape-store/migrations")]
async fn bulk_stop_on_error_cancels_pending_jobs(pool: PgPool) {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/bad");
        then.status(400);
    });
    server.mock(|when, then| {
        when.method(GET).path("/never");
        then.status(200).delay(Duration::from_secs(30));
    });

    let (store, queue, bulk, _handles) = spawn_pool(pool, 1).await;

    let bulk_tag = "bulk:bulk-test".to_string();
    let bulk_state = bulk.register("bulk-test".to_string(), 1, 2);

    let mut failing = light_http_job(&server.url("/bad"), 0);
    failing.tags.push(bulk_tag.clone());
    store.create(&failing).await.unwrap();

    let mut pending = light_http_job(&server.url("/never"), 0);
    pending.tags.push(bulk_tag);
    store.create(&pending).await.unwrap();

    // Single worker: enqueue the failing job first so it is claimed before
    // the pending one ever reaches the fetcher.
    queue.try_enqueue(failing.id, failing.priority).unwrap();
    queue.try_enqueue(pending.id, pending.priority).unwrap();

    let failed = wait_until_terminal(&store, failing.id, Duration::from_secs(5)).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(bulk_state.is_aborted());

    let cancelled = wait_until_terminal(&store, pending.id, Duration::from_secs(5)).await;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
}

/// A fetcher that always panics, standing in for a buggy variant (a bad
/// `unwrap()` deep in a parser, say). Used to exercise the worker's
/// panic-at-boundary handling from the failure-semantics table.
struct PanickingFetcher;

#[async_trait]
impl Fetcher for PanickingFetcher {
    async fn fetch(
        &self,
        _request: &FetchRequest,
        _config: &ScrapeConfig,
        _cancel: CancellationToken,
        _progress: Option<Arc<dyn scrape_dispatch::ProgressReporter>>,
    ) -> Result<JobResult, FetchError> {
        panic!("simulated variant crash");
    }
}

/// A variant panicking mid-fetch must not take the worker down with it: the
/// job is recorded FAILED and the pool keeps servicing later jobs.
#[sqlx::test(migrations = "../scrape-store/migrations")]
async fn variant_panic_is_caught_and_recorded_as_failed(pool: PgPool) {
    let store = Arc::new(Store::new(pool));
    let queue = Arc::new(JobQueue::new(1_000));
    let bulk = Arc::new(BulkCoordinator::new());
    let mut fetchers: HashMap<ScraperVariant, Arc<dyn Fetcher>> = HashMap::new();
    fetchers.insert(ScraperVariant::LightHttp, Arc::new(PanickingFetcher));

    let worker_pool = Arc::new(WorkerPool::new(
        queue.clone(),
        store.clone(),
        fetchers,
        RetryPolicy::default(),
        bulk.clone(),
    ));
    let health = HealthRegistry::new("test");
    let _handles = WorkerPool::spawn(&worker_pool, 1, &health).await;

    let job = light_http_job("https://example.invalid/panic", 0);
    store.create(&job).await.unwrap();
    queue.try_enqueue(job.id, job.priority).unwrap();

    let finished = wait_until_terminal(&store, job.id, Duration::from_secs(5)).await;
    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.error_message.unwrap().contains("panicked"));

    // The worker's dispatch loop must have survived the panic and still be
    // servicing the queue.
    let second = light_http_job("https://example.invalid/panic-2", 0);
    store.create(&second).await.unwrap();
    queue.try_enqueue(second.id, second.priority).unwrap();
    let finished2 = wait_until_terminal(&store, second.id, Duration::from_secs(5)).await;
    assert_eq!(finished2.status, JobStatus::Failed);
}
