use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use scrape_dispatch::{FetchFailureKind, FetchRequest, Fetcher};
use scrape_health::{HealthHandle, HealthRegistry};
use scrape_queue::JobQueue;
use scrape_store::{JobPatch, Store};
use scrape_types::{CoreError, Job, JobStatus, ScraperVariant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use scrape_metrics::constants::{
    DEQUEUE_TIME_MS, FETCH_TIME_MS, JOBS_CANCELLED, JOBS_COMPLETED, JOBS_DEQUEUED, JOBS_FAILED,
    JOBS_RETRIED, JOB_TOTAL_TIME_MS, OUTCOME_LABEL, VARIANT_LABEL,
};

use crate::bulk::{BulkCoordinator, BulkState};
use crate::callback::post_callback;
use crate::progress::StoreProgressReporter;
use crate::retry::RetryPolicy;

/// How often, during a long in-flight fetch, the worker polls the store for
/// a cancel request and reports liveness. Short enough that a cancel lands
/// promptly; long enough not to hammer the pool with trivial SELECTs.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);
const HEALTH_DEADLINE: Duration = Duration::from_secs(30);

/// A fixed-size pool of named workers, each in a dequeue -> execute -> loop
/// dispatch cycle. Owns no threads of its own; `spawn` hands back the join
/// handles for the caller (the composition root) to await at shutdown.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    store: Arc<Store>,
    fetchers: HashMap<ScraperVariant, Arc<dyn Fetcher>>,
    retry_policy: RetryPolicy,
    bulk: Arc<BulkCoordinator>,
    callback_client: reqwest::Client,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        store: Arc<Store>,
        fetchers: HashMap<ScraperVariant, Arc<dyn Fetcher>>,
        retry_policy: RetryPolicy,
        bulk: Arc<BulkCoordinator>,
    ) -> Self {
        let callback_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("callback client config is static and valid");

        WorkerPool {
            queue,
            store,
            fetchers,
            retry_policy,
            bulk,
            callback_client,
        }
    }

    /// Registers one health component per worker and spawns its dispatch
    /// loop. Returns immediately; the loops run until their task is
    /// aborted.
    pub async fn spawn(pool: &Arc<Self>, count: usize, health: &HealthRegistry) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let name = format!("worker-{index}");
            let liveness = health.register(name.clone(), HEALTH_DEADLINE).await;
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.dispatch_loop(name, liveness).await }));
        }
        handles
    }

    async fn dispatch_loop(&self, name: String, liveness: HealthHandle) {
        info!(worker = %name, "starting dispatch loop");
        loop {
            liveness.report_healthy().await;
            let dequeue_start = std::time::Instant::now();
            let (job_id, _priority) = self.queue.dequeue().await;
            scrape_metrics::histogram(DEQUEUE_TIME_MS, &[], dequeue_start.elapsed().as_millis() as f64);
            scrape_metrics::inc(JOBS_DEQUEUED, &[], 1);

            if let Err(err) = self.execute_job(job_id, &liveness).await {
                warn!(worker = %name, job_id = %job_id, %err, "job execution ended in error");
            }
        }
    }

    /// Runs the full per-job execution protocol: claim, load, fetch,
    /// transition to a terminal or retry state, fire the callback.
    async fn execute_job(&self, job_id: Uuid, liveness: &HealthHandle) -> Result<(), CoreError> {
        let job_start = std::time::Instant::now();

        // Step 2: claim the job. A concurrent actor (a cancel request, a
        // janitor sweep) may have already moved it off QUEUED; that's not
        // our error to report, just nothing left to do.
        let claim = self
            .store
            .transition(
                job_id,
                JobStatus::Queued,
                JobStatus::Running,
                JobPatch {
                    started_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await;
        match claim {
            Ok(()) => {}
            Err(CoreError::InvalidTransition { .. }) | Err(CoreError::NotFound(_)) => return Ok(()),
            Err(other) => return Err(other),
        }

        // Step 3: load the full record now that we hold it.
        let job = self.store.get(job_id).await?;

        let bulk_state = bulk_tag(&job).and_then(|bulk_id| self.bulk.get(&bulk_id).map(|s| (bulk_id, s)));
        if let Some((_, state)) = &bulk_state {
            if state.is_aborted() {
                self.cancel_without_running(&job).await?;
                self.finish_bulk_job(&bulk_state);
                return Ok(());
            }
        }

        // A per-bulk permit caps how many of the bulk's jobs run
        // concurrently across the whole pool, not just this worker.
        let _permit = match &bulk_state {
            Some((_, state)) => Some(state.acquire().await),
            None => None,
        };

        let variant_label = [(VARIANT_LABEL.to_string(), format!("{:?}", job.scraper_variant))];
        let outcome = self.run_fetch_cycle(&job, liveness, &bulk_state).await;
        scrape_metrics::histogram(JOB_TOTAL_TIME_MS, &variant_label, job_start.elapsed().as_millis() as f64);

        self.finish_bulk_job(&bulk_state);
        outcome
    }

    fn finish_bulk_job(&self, bulk_state: &Option<(String, Arc<BulkState>)>) {
        if let Some((bulk_id, state)) = bulk_state {
            if state.mark_job_done() {
                self.bulk.remove(bulk_id);
            }
        }
    }

    /// Steps 4-9: fetch with cancellation support, then route the outcome
    /// to retry, CANCELLED, FAILED, or COMPLETED, finishing with the
    /// best-effort callback POST.
    async fn run_fetch_cycle(
        &self,
        job: &Job,
        liveness: &HealthHandle,
        bulk_state: &Option<(String, Arc<BulkState>)>,
    ) -> Result<(), CoreError> {
        let Some(fetcher) = self.fetchers.get(&job.scraper_variant).cloned() else {
            return self
                .fail(job, format!("no fetcher registered for {:?}", job.scraper_variant), bulk_state)
                .await;
        };

        let request = FetchRequest {
            url: job.url.clone(),
            method: job.method,
            headers: job.headers.clone(),
            params: job.params.clone(),
            body: job.body.clone(),
        };
        let progress = Arc::new(StoreProgressReporter::new(self.store.clone(), job.id));
        let cancel = CancellationToken::new();

        let watcher = self.spawn_cancel_watcher(job.id, cancel.clone(), liveness.clone());
        let fetch_start = std::time::Instant::now();
        // A variant panicking mid-fetch (a bad unwrap deep in a third-party
        // parser, say) must not take the whole worker's dispatch loop down
        // with it - catch it at this boundary the same way the in-process
        // work-stealing pool in posthog's rayon_dispatcher.rs does, and
        // record it as a FAILED job rather than losing a worker forever.
        let caught = std::panic::AssertUnwindSafe(fetcher.fetch(&request, &job.config, cancel.clone(), Some(progress)))
            .catch_unwind()
            .await;
        watcher.abort();
        let variant_label = [(VARIANT_LABEL.to_string(), format!("{:?}", job.scraper_variant))];
        scrape_metrics::histogram(FETCH_TIME_MS, &variant_label, fetch_start.elapsed().as_millis() as f64);

        let result = match caught {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                error!(job_id = %job.id, %message, "scraper variant panicked during fetch");
                return self.fail(job, format!("scraper variant panicked: {message}"), bulk_state).await;
            }
        };

        match result {
            Ok(job_result) => self.complete(job, job_result).await,
            // The worker observed the cancel flag at a suspension point
            // mid-fetch: this is a cancellation, not a failure, regardless
            // of retry budget.
            Err(fetch_err) if fetch_err.kind == FetchFailureKind::Cancelled => self.cancel(job).await,
            Err(fetch_err) => {
                if fetch_err.retryable && job.retry_count < job.max_retries {
                    self.retry(job, fetch_err.message).await
                } else {
                    self.fail(job, fetch_err.message, bulk_state).await
                }
            }
        }
    }

    /// Polls the store for a cancel request while a fetch is in flight and
    /// flips the token the first time it sees one set.
    fn spawn_cancel_watcher(&self, job_id: Uuid, cancel: CancellationToken, liveness: HealthHandle) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
                liveness.report_healthy().await;
                match store.is_cancel_requested(job_id).await {
                    Ok(true) => {
                        cancel.cancel();
                        return;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(job_id = %job_id, %err, "cancel-watch query failed");
                    }
                }
            }
        })
    }

    async fn complete(&self, job: &Job, result: scrape_types::JobResult) -> Result<(), CoreError> {
        self.store.attach_result(job.id, &result).await?;
        scrape_metrics::inc(JOBS_COMPLETED, &outcome_labels(job, "completed"), 1);
        self.fire_callback(job, "completed").await;
        Ok(())
    }

    async fn retry(&self, job: &Job, error_message: String) -> Result<(), CoreError> {
        let attempt = job.retry_count + 1;
        let delay = self
            .retry_policy
            .delay(Duration::from_secs(job.config.delay_between_retries_secs as u64), attempt);
        tokio::time::sleep(delay).await;

        self.store
            .transition(
                job.id,
                JobStatus::Running,
                JobStatus::Queued,
                JobPatch {
                    retry_count: Some(attempt),
                    started_at: Some(None),
                    error_message: Some(Some(error_message)),
                    ..Default::default()
                },
            )
            .await?;
        if let Err(err) = self.queue.try_enqueue(job.id, job.priority) {
            error!(job_id = %job.id, %err, "failed to re-enqueue retried job; it is stranded in QUEUED");
        }
        scrape_metrics::inc(JOBS_RETRIED, &outcome_labels(job, "retried"), 1);
        Ok(())
    }

    /// A non-retryable (or retry-exhausted) execution failure. If the job
    /// belongs to a `stop_on_error` bulk submission, this is the trigger
    /// that aborts the rest of the bulk - pending same-bulk jobs are
    /// cancelled without running at their next `execute_job` dequeue, via
    /// the `state.is_aborted()` check made there.
    async fn fail(
        &self,
        job: &Job,
        error_message: String,
        bulk_state: &Option<(String, Arc<BulkState>)>,
    ) -> Result<(), CoreError> {
        self.store
            .transition(
                job.id,
                JobStatus::Running,
                JobStatus::Failed,
                JobPatch {
                    completed_at: Some(Some(Utc::now())),
                    error_message: Some(Some(error_message)),
                    ..Default::default()
                },
            )
            .await?;
        scrape_metrics::inc(JOBS_FAILED, &outcome_labels(job, "failed"), 1);
        if let Some((_, state)) = bulk_state {
            state.abort();
        }
        self.fire_callback(job, "failed").await;
        Ok(())
    }

    /// A RUNNING job whose worker observed the cancel flag at a suspension
    /// point mid-fetch (as opposed to `cancel_without_running`, which
    /// covers a job claimed off the queue only to find a bulk already
    /// aborted before any fetch was attempted).
    async fn cancel(&self, job: &Job) -> Result<(), CoreError> {
        self.store
            .transition(
                job.id,
                JobStatus::Running,
                JobStatus::Cancelled,
                JobPatch {
                    completed_at: Some(Some(Utc::now())),
                    error_message: Some(Some("cancelled while running".to_string())),
                    ..Default::default()
                },
            )
            .await?;
        scrape_metrics::inc(JOBS_CANCELLED, &outcome_labels(job, "cancelled"), 1);
        self.fire_callback(job, "cancelled").await;
        Ok(())
    }

    async fn cancel_without_running(&self, job: &Job) -> Result<(), CoreError> {
        self.store
            .transition(
                job.id,
                JobStatus::Running,
                JobStatus::Cancelled,
                JobPatch {
                    completed_at: Some(Some(Utc::now())),
                    error_message: Some(Some("bulk submission aborted".to_string())),
                    ..Default::default()
                },
            )
            .await?;
        scrape_metrics::inc(JOBS_CANCELLED, &outcome_labels(job, "cancelled"), 1);
        Ok(())
    }

    async fn fire_callback(&self, job: &Job, outcome: &str) {
        let Some(callback_url) = &job.callback_url else {
            return;
        };
        post_callback(&self.callback_client, callback_url, job.id, outcome).await;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn bulk_tag(job: &Job) -> Option<String> {
    job.tags.iter().find_map(|t| t.strip_prefix("bulk:").map(str::to_string))
}

fn outcome_labels(job: &Job, outcome: &str) -> [(String, String); 2] {
    [
        (VARIANT_LABEL.to_string(), format!("{:?}", job.scraper_variant)),
        (OUTCOME_LABEL.to_string(), outcome.to_string()),
    ]
}
