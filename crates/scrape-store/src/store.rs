use chrono::{DateTime, Utc};
use scrape_types::{CoreError, Job, JobResult, JobStatus, ScraperVariant};
use sqlx::postgres::Postgres;
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use crate::error::map_sqlx_error;
use crate::row::{JobResultRow, JobRow};

/// `None` on a field means "leave untouched"; `Some(None)` means "set to
/// NULL"; `Some(Some(v))` means "set to v". Mirrors the double-`Option`
/// patch idiom the reference stack uses for atomic partial updates.
#[derive(Debug, Default, Clone)]
pub struct JobPatch {
    pub progress: Option<u8>,
    pub progress_message: Option<Option<String>>,
    pub retry_count: Option<u32>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub error_message: Option<Option<String>>,
    pub cancel_requested: Option<bool>,
}

#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub statuses: Vec<JobStatus>,
    pub variants: Vec<ScraperVariant>,
    /// All tags must be present (intersection, not union).
    pub tags: Vec<String>,
    pub url_substring: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Priority,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy)]
pub struct JobSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for JobSort {
    fn default() -> Self {
        JobSort {
            field: SortField::CreatedAt,
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Store { pool }
    }

    pub async fn create(&self, job: &Job) -> Result<Uuid, CoreError> {
        let headers = serde_json::to_value(&job.headers).map_err(|e| CoreError::Other(e.into()))?;
        let params = serde_json::to_value(&job.params).map_err(|e| CoreError::Other(e.into()))?;
        let config = serde_json::to_value(&job.config).map_err(|e| CoreError::Other(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, url, method, headers, params, body, scraper_variant, config, tags,
                 priority, status, progress, progress_message, retry_count, max_retries,
                 created_at, started_at, completed_at, error_message, callback_url, cancel_requested)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(job.id)
        .bind(&job.url)
        .bind(job.method)
        .bind(headers)
        .bind(params)
        .bind(&job.body)
        .bind(job.scraper_variant)
        .bind(config)
        .bind(&job.tags)
        .bind(job.priority as i16)
        .bind(job.status)
        .bind(job.progress as i16)
        .bind(&job.progress_message)
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(&job.callback_url)
        .bind(job.cancel_requested)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(job.id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job, CoreError> {
        let row: JobRow = sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;

        let result = self.fetch_result(id).await?;
        row.into_domain(result)
    }

    async fn fetch_result(&self, id: Uuid) -> Result<Option<JobResult>, CoreError> {
        let row: Option<JobResultRow> = sqlx::query_as("SELECT * FROM job_results WHERE job_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(JobResultRow::into_domain).transpose()
    }

    /// Atomically moves `id` from `from` to `to`, patching the fields named
    /// in `patch` in the same statement. The current status column doubles
    /// as the compare-and-swap guard: a concurrent transition that already
    /// moved the row away from `from` causes this to affect zero rows.
    pub async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        patch: JobPatch,
    ) -> Result<(), CoreError> {
        if !from.can_transition_to(to) {
            return Err(CoreError::InvalidTransition { id: id.to_string(), from, to });
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE jobs SET status = ");
        qb.push_bind(to);

        if let Some(progress) = patch.progress {
            qb.push(", progress = ").push_bind(progress as i16);
        }
        if let Some(message) = patch.progress_message {
            qb.push(", progress_message = ").push_bind(message);
        }
        if let Some(retry_count) = patch.retry_count {
            qb.push(", retry_count = ").push_bind(retry_count as i32);
        }
        if let Some(started_at) = patch.started_at {
            qb.push(", started_at = ").push_bind(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            qb.push(", completed_at = ").push_bind(completed_at);
        }
        if let Some(error_message) = patch.error_message {
            qb.push(", error_message = ").push_bind(error_message);
        }
        if let Some(cancel_requested) = patch.cancel_requested {
            qb.push(", cancel_requested = ").push_bind(cancel_requested);
        }

        qb.push(" WHERE id = ").push_bind(id).push(" AND status = ").push_bind(from);

        let result = qb.build().execute(&self.pool).await.map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.classify_failed_transition(id, from, to).await);
        }
        Ok(())
    }

    async fn classify_failed_transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> CoreError {
        match self.current_status(id).await {
            Ok(Some(_)) => CoreError::InvalidTransition { id: id.to_string(), from, to },
            Ok(None) => CoreError::NotFound(id.to_string()),
            Err(err) => err,
        }
    }

    async fn current_status(&self, id: Uuid) -> Result<Option<JobStatus>, CoreError> {
        let row: Option<(JobStatus,)> = sqlx::query_as("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(|(s,)| s))
    }

    /// Transitions RUNNING -> COMPLETED and stores the result atomically.
    pub async fn attach_result(&self, id: Uuid, result: &JobResult) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let updated = sqlx::query("UPDATE jobs SET status = $1, completed_at = $2 WHERE id = $3 AND status = $4")
            .bind(JobStatus::Completed)
            .bind(Utc::now())
            .bind(id)
            .bind(JobStatus::Running)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(self
                .classify_failed_transition(id, JobStatus::Running, JobStatus::Completed)
                .await);
        }

        let headers = serde_json::to_value(&result.headers).map_err(|e| CoreError::Other(e.into()))?;
        let links = result
            .links
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CoreError::Other(e.into()))?;
        let images = result
            .images
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CoreError::Other(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO job_results
                (job_id, status_code, response_time_ms, content_length, content_type,
                 headers, content, text, links, images, final_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (job_id) DO UPDATE SET
                status_code = EXCLUDED.status_code,
                response_time_ms = EXCLUDED.response_time_ms,
                content_length = EXCLUDED.content_length,
                content_type = EXCLUDED.content_type,
                headers = EXCLUDED.headers,
                content = EXCLUDED.content,
                text = EXCLUDED.text,
                links = EXCLUDED.links,
                images = EXCLUDED.images,
                final_url = EXCLUDED.final_url
            "#,
        )
        .bind(id)
        .bind(result.status_code as i32)
        .bind(result.response_time_ms as i64)
        .bind(result.content_length as i64)
        .bind(&result.content_type)
        .bind(headers)
        .bind(&result.content)
        .bind(&result.text)
        .bind(links)
        .bind(images)
        .bind(&result.final_url)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Progress updates are not state transitions (status stays RUNNING) so
    /// they bypass `transition`'s compare-and-swap table entirely; guarded
    /// only by `status = RUNNING` so a job that raced to a terminal state
    /// silently drops a late progress write instead of erroring.
    pub async fn update_progress(
        &self,
        id: Uuid,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE jobs SET progress = $1, progress_message = $2 WHERE id = $3 AND status = $4")
            .bind(progress as i16)
            .bind(message)
            .bind(id)
            .bind(JobStatus::Running)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Flips the cancel-requested bit on a RUNNING job without touching its
    /// status; the worker transitions it to CANCELLED itself at its next
    /// suspension point. A no-op (zero rows) if the job isn't RUNNING, which
    /// callers treat as "nothing to flag" rather than an error, since a
    /// QUEUED or terminal job is cancelled by a direct status transition
    /// instead.
    pub async fn request_cancel(&self, id: Uuid) -> Result<(), CoreError> {
        sqlx::query("UPDATE jobs SET cancel_requested = true WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(JobStatus::Running)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, CoreError> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT cancel_requested FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(|(c,)| c).unwrap_or(false))
    }

    pub async fn list(&self, filter: &JobFilter, sort: JobSort, page: Page) -> Result<PageResult<Job>, CoreError> {
        self.query_paginated(filter, None, sort, page).await
    }

    /// Same orphan sweep as `recover_on_startup`, exposed on an already-built
    /// `Store` so the composition root can re-run it on an interval without
    /// holding on to a bare `PgPool` past construction.
    pub async fn recover_orphaned_running(&self) -> Result<u64, CoreError> {
        crate::recovery::recover_on_startup(&self.pool).await
    }

    /// All `QUEUED` job ids in the order they should be re-admitted to the
    /// in-memory queue: priority descending, then age so earlier-created
    /// jobs within a priority class keep their place in line. Used once at
    /// startup (and optionally on an interval) to repopulate the queue,
    /// which holds no state of its own across restarts.
    pub async fn queued_for_recovery(&self) -> Result<Vec<(Uuid, i32)>, CoreError> {
        let rows: Vec<(Uuid, i32)> = sqlx::query_as(
            r#"
            SELECT id, priority FROM jobs
            WHERE status = $1
            ORDER BY priority DESC, created_at ASC
            "#,
        )
        .bind(JobStatus::Queued)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows)
    }

    pub async fn search(
        &self,
        query: &str,
        filter: &JobFilter,
        sort: JobSort,
        page: Page,
    ) -> Result<PageResult<Job>, CoreError> {
        self.query_paginated(filter, Some(query), sort, page).await
    }

    async fn query_paginated(
        &self,
        filter: &JobFilter,
        search_query: Option<&str>,
        sort: JobSort,
        page: Page,
    ) -> Result<PageResult<Job>, CoreError> {
        let total = self.count(filter, search_query).await?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM jobs");
        push_where(&mut qb, filter, search_query);
        push_order(&mut qb, sort);
        qb.push(" LIMIT ").push_bind(page.limit).push(" OFFSET ").push_bind(page.offset);

        let rows: Vec<JobRow> = qb.build_query_as().fetch_all(&self.pool).await.map_err(map_sqlx_error)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let result = self.fetch_result(row.id).await?;
            items.push(row.into_domain(result)?);
        }

        Ok(PageResult {
            total,
            has_next: page.offset + (items.len() as i64) < total,
            has_prev: page.offset > 0,
            items,
        })
    }

    async fn count(&self, filter: &JobFilter, search_query: Option<&str>) -> Result<i64, CoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM jobs");
        push_where(&mut qb, filter, search_query);
        let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(count)
    }
}

fn push_where(qb: &mut QueryBuilder<Postgres>, filter: &JobFilter, search_query: Option<&str>) {
    let mut any = false;
    let mut clause = |qb: &mut QueryBuilder<Postgres>, any: &mut bool| {
        qb.push(if *any { " AND " } else { " WHERE " });
        *any = true;
    };

    if !filter.statuses.is_empty() {
        clause(qb, &mut any);
        qb.push("status = ANY(").push_bind(filter.statuses.clone()).push(")");
    }
    if !filter.variants.is_empty() {
        clause(qb, &mut any);
        qb.push("scraper_variant = ANY(").push_bind(filter.variants.clone()).push(")");
    }
    if !filter.tags.is_empty() {
        clause(qb, &mut any);
        qb.push("tags @> ").push_bind(filter.tags.clone());
    }
    if let Some(substring) = &filter.url_substring {
        clause(qb, &mut any);
        qb.push("url ILIKE ").push_bind(format!("%{substring}%"));
    }
    if let Some(after) = filter.created_after {
        clause(qb, &mut any);
        qb.push("created_at >= ").push_bind(after);
    }
    if let Some(before) = filter.created_before {
        clause(qb, &mut any);
        qb.push("created_at <= ").push_bind(before);
    }
    if let Some(query) = search_query {
        clause(qb, &mut any);
        qb.push("(id::text ILIKE ")
            .push_bind(format!("%{query}%"))
            .push(" OR url ILIKE ")
            .push_bind(format!("%{query}%"))
            .push(")");
    }
}

fn push_order(qb: &mut QueryBuilder<Postgres>, sort: JobSort) {
    let column = match sort.field {
        // There is no separate updated_at column; the most recent state
        // transition timestamp available is used as its proxy.
        SortField::UpdatedAt => "COALESCE(completed_at, started_at, created_at)",
        SortField::CreatedAt => "created_at",
        SortField::Priority => "priority",
        SortField::Status => "status",
    };
    let direction = match sort.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    qb.push(" ORDER BY ").push(column).push(" ").push(direction);
}
