use scrape_types::JobStatus;
use sqlx::PgPool;
use tracing::info;

use crate::error::map_sqlx_error;

/// Re-queues every `RUNNING` job, on the assumption that a running job found
/// at process start belonged to a previous instance that crashed mid-fetch
/// (nothing in this process could legitimately have one in flight yet).
/// Run once at startup; callers that also want periodic recovery of workers
/// that die mid-run can call this again on an interval.
pub async fn recover_on_startup(pool: &PgPool) -> Result<u64, scrape_types::CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1, started_at = NULL, retry_count = retry_count + 1
        WHERE status = $2
        "#,
    )
    .bind(JobStatus::Queued)
    .bind(JobStatus::Running)
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;

    let recovered = result.rows_affected();
    if recovered > 0 {
        info!(recovered, "recovered orphaned running jobs on startup");
    }
    Ok(recovered)
}
