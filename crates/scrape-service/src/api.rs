use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use scrape_store::{JobFilter, JobSort, Page, PageResult, SortDirection, SortField};
use scrape_types::{CoreError, HttpMethod, Job, JobResult, JobStatus, ScrapeConfig, ScraperVariant};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::ApiError;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const MAX_BULK_JOBS: usize = 100;
const MIN_BULK_PARALLEL: usize = 1;
const MAX_BULK_PARALLEL: usize = 20;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/bulk", post(submit_bulk))
        .route("/jobs/:id", get(get_status))
        .route("/jobs/:id/result", get(get_result))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/health", get(health))
        .route("/", get(|| async { "scrape orchestration core" }))
        .with_state(ctx)
}

async fn health(State(ctx): State<Arc<AppContext>>) -> impl axum::response::IntoResponse {
    ctx.health.get_status()
}

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    pub scraper_variant: ScraperVariant,
    #[serde(default)]
    pub config: ScrapeConfig,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl ScrapeRequest {
    fn into_job(self, extra_tag: Option<String>) -> Result<Job, CoreError> {
        self.config
            .validate()
            .map_err(CoreError::InvalidInput)?;

        let max_retries = self.config.max_retries;
        let mut tags = self.tags;
        if let Some(tag) = extra_tag {
            tags.push(tag);
        }

        Job::new(
            self.url,
            self.method,
            self.headers,
            self.params,
            self.body,
            self.scraper_variant,
            self.config,
            tags,
            self.priority,
            max_retries,
            self.callback_url,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// Persists before queuing, per §2's data flow ("job store (create row,
/// status=QUEUED) -> queue"). Enqueuing first would let a worker blocked on
/// `dequeue()` pop the entry and call `transition(Queued->Running)` before
/// the `INSERT` has even committed, which races `NotFound` and strands the
/// job: QUEUED in the store with nothing left in the queue to ever claim
/// it, since the recovery scan only re-queues orphaned RUNNING rows, not
/// orphaned QUEUED ones. If admission then fails, the persisted row is
/// finalized here instead of being left QUEUED forever with no queue entry.
async fn submit_job(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<ScrapeRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let job = req.into_job(None)?;
    ctx.store.create(&job).await?;

    if let Err(err) = ctx.queue.try_enqueue(job.id, job.priority) {
        finalize_unqueued_job(&ctx, job.id, "queue is at capacity").await;
        return Err(err.into());
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            task_id: job.id,
            status: job.status,
            created_at: job.created_at,
        }),
    ))
}

/// A job that was persisted as QUEUED but could not be admitted to the
/// queue has no queue entry a worker will ever dequeue. `Queued ->
/// Cancelled` is the only terminal edge the transition table allows
/// directly from QUEUED, so that is the state it is finalized to rather
/// than left stranded.
async fn finalize_unqueued_job(ctx: &AppContext, job_id: Uuid, reason: &str) {
    let patch = scrape_store::JobPatch {
        completed_at: Some(Some(Utc::now())),
        error_message: Some(Some(reason.to_string())),
        ..Default::default()
    };
    if let Err(err) = ctx.store.transition(job_id, JobStatus::Queued, JobStatus::Cancelled, patch).await {
        tracing::warn!(job_id = %job_id, %err, "failed to finalize unqueued job");
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkScrapeRequest {
    pub jobs: Vec<ScrapeRequest>,
    pub parallel_limit: usize,
    #[serde(default)]
    pub stop_on_error: bool,
}

#[derive(Debug, Serialize)]
pub struct BulkSubmitResponse {
    pub bulk_id: String,
    pub job_ids: Vec<Uuid>,
    pub accepted: usize,
    pub rejected: usize,
}

async fn submit_bulk(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<BulkScrapeRequest>,
) -> Result<(StatusCode, Json<BulkSubmitResponse>), ApiError> {
    if req.jobs.is_empty() || req.jobs.len() > MAX_BULK_JOBS {
        return Err(ApiError::InvalidInput(format!(
            "bulk submission must contain 1-{MAX_BULK_JOBS} jobs, got {}",
            req.jobs.len()
        )));
    }
    if !(MIN_BULK_PARALLEL..=MAX_BULK_PARALLEL).contains(&req.parallel_limit) {
        return Err(ApiError::InvalidInput(format!(
            "parallel_limit must be {MIN_BULK_PARALLEL}-{MAX_BULK_PARALLEL}, got {}",
            req.parallel_limit
        )));
    }

    let bulk_id = Uuid::now_v7().to_string();
    let bulk_tag = format!("bulk:{bulk_id}");

    let jobs = req
        .jobs
        .into_iter()
        .map(|r| r.into_job(Some(bulk_tag.clone())))
        .collect::<Result<Vec<Job>, CoreError>>()?;

    // Persist every job before any of them can be dequeued, same ordering
    // as `submit_job` and for the same reason. A job that fails to persist
    // never existed as far as the rest of the bulk is concerned.
    let mut persisted = Vec::with_capacity(jobs.len());
    for job in &jobs {
        match ctx.store.create(job).await {
            Ok(()) => persisted.push(job.clone()),
            Err(err) => tracing::warn!(job_id = %job.id, %err, "bulk job failed to persist, excluding it"),
        }
    }

    let mut job_ids = Vec::with_capacity(persisted.len());
    let mut rejected = jobs.len() - persisted.len();

    // `remaining` is seeded with exactly the jobs that exist in the store,
    // since those are the only ones any code path (worker or this handler)
    // will ever call `mark_job_done` for.
    if let Some(bulk_state) = (!persisted.is_empty()).then(|| ctx.bulk.register(bulk_id.clone(), req.parallel_limit, persisted.len())) {
        for job in &persisted {
            if bulk_state.is_aborted() {
                rejected += 1;
                finish_unqueued_bulk_job(&ctx, &bulk_state, &bulk_id, job.id, "bulk submission aborted").await;
                continue;
            }
            match ctx.queue.try_enqueue(job.id, job.priority) {
                Ok(()) => job_ids.push(job.id),
                Err(_) => {
                    rejected += 1;
                    if req.stop_on_error {
                        bulk_state.abort();
                    }
                    finish_unqueued_bulk_job(&ctx, &bulk_state, &bulk_id, job.id, "queue is at capacity").await;
                }
            }
        }
    }

    let accepted = job_ids.len();
    Ok((
        StatusCode::ACCEPTED,
        Json(BulkSubmitResponse {
            bulk_id,
            job_ids,
            accepted,
            rejected,
        }),
    ))
}

/// Finalizes a persisted bulk job that will never be dispatched (admission
/// rejected it, or the bulk aborted before this job's turn) and accounts
/// for it in the bulk's remaining-job counter the same way a worker does
/// via `finish_bulk_job` for jobs that do get to run. Without this, a job
/// that never reaches a worker never calls `mark_job_done`, so `remaining`
/// never reaches zero and the bulk entry leaks for the life of the process.
async fn finish_unqueued_bulk_job(
    ctx: &AppContext,
    bulk_state: &scrape_executor::BulkState,
    bulk_id: &str,
    job_id: Uuid,
    reason: &str,
) {
    let patch = scrape_store::JobPatch {
        completed_at: Some(Some(Utc::now())),
        error_message: Some(Some(reason.to_string())),
        ..Default::default()
    };
    if let Err(err) = ctx.store.transition(job_id, JobStatus::Queued, JobStatus::Cancelled, patch).await {
        tracing::warn!(job_id = %job_id, %err, "failed to finalize unqueued bulk job");
    }
    if bulk_state.mark_job_done() {
        ctx.bulk.remove(bulk_id);
    }
}

/// A trimmed projection of `Job`: enough to answer "what state is this job
/// in and how far along is it" without shipping the (potentially large) raw
/// response body, which lives behind `/jobs/:id/result` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub url: String,
    pub status: JobStatus,
    pub progress: u8,
    pub progress_message: Option<String>,
    pub scraper_variant: ScraperVariant,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub tags: Vec<String>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        JobStatusView {
            job_id: job.id,
            url: job.url.clone(),
            status: job.status,
            progress: job.progress,
            progress_message: job.progress_message.clone(),
            scraper_variant: job.scraper_variant,
            priority: job.priority,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message.clone(),
            tags: job.tags.clone(),
        }
    }
}

async fn get_status(
    State(ctx): State<Arc<AppContext>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusView>, ApiError> {
    let key = job_id.to_string();
    let cached: scrape_cache::CacheResult<JobStatusView> = ctx.cache.get(Some("status"), &key).await;
    if let Some(view) = cached.value {
        return Ok(Json(view));
    }

    let job = ctx.store.get(job_id).await?;
    let view = JobStatusView::from(&job);
    ctx.cache
        .set(Some("status"), &key, &view, Some(ctx.config.job_status_cache_ttl))
        .await;
    Ok(Json(view))
}

async fn get_result(
    State(ctx): State<Arc<AppContext>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResult>, ApiError> {
    let key = job_id.to_string();
    let cached: scrape_cache::CacheResult<JobResult> = ctx.cache.get(Some("result"), &key).await;
    if let Some(result) = cached.value {
        return Ok(Json(result));
    }

    let job = ctx.store.get(job_id).await?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::JobNotCompleted(job_id.to_string()));
    }
    let result = job.result.ok_or(ApiError::Internal)?;
    ctx.cache.set(Some("result"), &key, &result, None).await;
    Ok(Json(result))
}

async fn cancel_job(
    State(ctx): State<Arc<AppContext>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusView>, ApiError> {
    let job = ctx.store.get(job_id).await?;

    match job.status {
        JobStatus::Queued => {
            ctx.queue.cancel(job_id);
            ctx.store
                .transition(
                    job_id,
                    JobStatus::Queued,
                    JobStatus::Cancelled,
                    scrape_store::JobPatch {
                        completed_at: Some(Some(Utc::now())),
                        error_message: Some(Some("cancelled before dispatch".to_string())),
                        ..Default::default()
                    },
                )
                .await?;
        }
        JobStatus::Running => {
            ctx.store.request_cancel(job_id).await?;
        }
        _ => {}
    }

    ctx.cache.delete(Some("status"), &job_id.to_string()).await;
    let job = ctx.store.get(job_id).await?;
    Ok(Json(JobStatusView::from(&job)))
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub jobs: Vec<JobStatusView>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub query: Option<String>,
    pub status: Option<String>,
    pub scraper_variant: Option<String>,
    pub tags: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

async fn list_jobs(
    State(ctx): State<Arc<AppContext>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let filter = build_filter(&q)?;
    let sort = build_sort(&q)?;

    let page = q.page.unwrap_or(1).max(1);
    let page_size = q.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let page_window = Page {
        offset: (page - 1) * page_size,
        limit: page_size,
    };

    let PageResult {
        items,
        total,
        has_next,
        has_prev,
    } = match q.query.as_deref() {
        Some(query) if !query.is_empty() => ctx.store.search(query, &filter, sort, page_window).await?,
        _ => ctx.store.list(&filter, sort, page_window).await?,
    };

    let total_pages = total.div_ceil(page_size).max(1);
    Ok(Json(ListResponse {
        jobs: items.iter().map(JobStatusView::from).collect(),
        total,
        page,
        page_size,
        total_pages,
        has_next,
        has_prev,
    }))
}

fn build_filter(q: &ListQuery) -> Result<JobFilter, ApiError> {
    let statuses = match &q.status {
        Some(s) => s.split(',').map(parse_status).collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let variants = match &q.scraper_variant {
        Some(s) => s.split(',').map(parse_variant).collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let tags = q
        .tags
        .as_deref()
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    Ok(JobFilter {
        statuses,
        variants,
        tags,
        url_substring: None,
        created_after: q.date_from,
        created_before: q.date_to,
    })
}

fn build_sort(q: &ListQuery) -> Result<JobSort, ApiError> {
    let field = match q.sort_by.as_deref() {
        None | Some("created_at") => SortField::CreatedAt,
        Some("updated_at") => SortField::UpdatedAt,
        Some("priority") => SortField::Priority,
        Some("status") => SortField::Status,
        Some(other) => return Err(ApiError::InvalidInput(format!("unknown sort_by: {other}"))),
    };
    let direction = match q.sort_order.as_deref() {
        None | Some("desc") => SortDirection::Desc,
        Some("asc") => SortDirection::Asc,
        Some(other) => return Err(ApiError::InvalidInput(format!("unknown sort_order: {other}"))),
    };
    Ok(JobSort { field, direction })
}

fn parse_status(raw: &str) -> Result<JobStatus, ApiError> {
    match raw.trim().to_uppercase().as_str() {
        "QUEUED" => Ok(JobStatus::Queued),
        "RUNNING" => Ok(JobStatus::Running),
        "COMPLETED" => Ok(JobStatus::Completed),
        "FAILED" => Ok(JobStatus::Failed),
        "CANCELLED" => Ok(JobStatus::Cancelled),
        other => Err(ApiError::InvalidInput(format!("unknown status: {other}"))),
    }
}

fn parse_variant(raw: &str) -> Result<ScraperVariant, ApiError> {
    match raw.trim().to_lowercase().as_str() {
        "light_http" => Ok(ScraperVariant::LightHttp),
        "headless_browser" => Ok(ScraperVariant::HeadlessBrowser),
        other => Err(ApiError::InvalidInput(format!("unknown scraper_variant: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_query() -> ListQuery {
        ListQuery {
            query: None,
            status: None,
            scraper_variant: None,
            tags: None,
            date_from: None,
            date_to: None,
            page: None,
            page_size: None,
            sort_by: None,
            sort_order: None,
        }
    }

    #[test]
    fn build_filter_parses_comma_separated_statuses_and_variants() {
        let q = ListQuery {
            status: Some("queued, running".to_string()),
            scraper_variant: Some("light_http,headless_browser".to_string()),
            tags: Some("a,b".to_string()),
            ..empty_query()
        };
        let filter = build_filter(&q).expect("valid filter");
        assert_eq!(filter.statuses, vec![JobStatus::Queued, JobStatus::Running]);
        assert_eq!(filter.variants, vec![ScraperVariant::LightHttp, ScraperVariant::HeadlessBrowser]);
        assert_eq!(filter.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn build_filter_rejects_unknown_status() {
        let q = ListQuery {
            status: Some("bogus".to_string()),
            ..empty_query()
        };
        assert!(matches!(build_filter(&q), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn build_sort_defaults_to_created_at_desc() {
        let sort = build_sort(&empty_query()).expect("default sort");
        assert_eq!(sort.field, SortField::CreatedAt);
        assert_eq!(sort.direction, SortDirection::Desc);
    }

    #[test]
    fn build_sort_rejects_unknown_field() {
        let q = ListQuery {
            sort_by: Some("nonsense".to_string()),
            ..empty_query()
        };
        assert!(matches!(build_sort(&q), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn parse_status_is_case_insensitive() {
        assert_eq!(parse_status("completed").unwrap(), JobStatus::Completed);
        assert_eq!(parse_status("FAILED").unwrap(), JobStatus::Failed);
    }
}
