use std::collections::HashMap;

use scrape_store::{JobFilter, JobPatch, JobSort, Page, SortDirection, SortField, Store};
use scrape_types::{CoreError, HttpMethod, Job, JobResult, JobStatus, ScrapeConfig, ScraperVariant};
use sqlx::PgPool;

fn new_job(url: &str, priority: i32) -> Job {
    Job::new(
        url.to_string(),
        HttpMethod::Get,
        HashMap::new(),
        HashMap::new(),
        None,
        ScraperVariant::LightHttp,
        ScrapeConfig::default(),
        vec!["t1".to_string()],
        priority,
        3,
        None,
    )
    .expect("valid job")
}

fn sample_result() -> JobResult {
    JobResult {
        status_code: 200,
        response_time_ms: 12,
        content_length: 5,
        content_type: Some("text/html".to_string()),
        headers: HashMap::new(),
        content: b"hello".to_vec(),
        text: None,
        links: None,
        images: None,
        final_url: None,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn create_then_get_roundtrips(pool: PgPool) {
    let store = Store::new(pool);
    let job = new_job("https://example.com/a", 0);

    store.create(&job).await.expect("create");
    let fetched = store.get(job.id).await.expect("get");

    assert_eq!(fetched.id, job.id);
    assert_eq!(fetched.url, job.url);
    assert_eq!(fetched.status, JobStatus::Queued);
    assert_eq!(fetched.tags, job.tags);
}

#[sqlx::test(migrations = "./migrations")]
async fn create_duplicate_id_is_rejected(pool: PgPool) {
    let store = Store::new(pool);
    let job = new_job("https://example.com/a", 0);

    store.create(&job).await.expect("first create succeeds");
    let err = store.create(&job).await.expect_err("duplicate id must fail");
    assert!(matches!(err, CoreError::DuplicateId(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn get_missing_job_is_not_found(pool: PgPool) {
    let store = Store::new(pool);
    let err = store.get(uuid::Uuid::now_v7()).await.expect_err("missing job");
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn valid_transition_then_invalid_transition(pool: PgPool) {
    let store = Store::new(pool);
    let job = new_job("https://example.com/a", 0);
    store.create(&job).await.expect("create");

    store
        .transition(job.id, JobStatus::Queued, JobStatus::Running, JobPatch::default())
        .await
        .expect("queued -> running is valid");

    // The job is now RUNNING; attempting the same QUEUED -> RUNNING move again
    // must fail because the current status no longer matches `from`.
    let err = store
        .transition(job.id, JobStatus::Queued, JobStatus::Running, JobPatch::default())
        .await
        .expect_err("stale transition must be rejected");
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
}

#[sqlx::test(migrations = "./migrations")]
async fn attach_result_completes_job(pool: PgPool) {
    let store = Store::new(pool);
    let job = new_job("https://example.com/a", 0);
    store.create(&job).await.expect("create");
    store
        .transition(job.id, JobStatus::Queued, JobStatus::Running, JobPatch::default())
        .await
        .expect("queued -> running");

    store.attach_result(job.id, &sample_result()).await.expect("attach result");

    let completed = store.get(job.id).await.expect("get");
    assert_eq!(completed.status, JobStatus::Completed);
    assert!(completed.result.is_some());
    assert_eq!(completed.result.unwrap().status_code, 200);
}

#[sqlx::test(migrations = "./migrations")]
async fn list_filters_by_status_and_paginates(pool: PgPool) {
    let store = Store::new(pool);
    for i in 0..5 {
        let job = new_job(&format!("https://example.com/{i}"), 0);
        store.create(&job).await.expect("create");
    }
    let running = new_job("https://example.com/running", 0);
    store.create(&running).await.expect("create");
    store
        .transition(running.id, JobStatus::Queued, JobStatus::Running, JobPatch::default())
        .await
        .expect("queued -> running");

    let filter = JobFilter {
        statuses: vec![JobStatus::Queued],
        ..Default::default()
    };
    let page = store
        .list(&filter, JobSort::default(), Page { offset: 0, limit: 3 })
        .await
        .expect("list");

    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 3);
    assert!(page.has_next);
    assert!(!page.has_prev);
}

#[sqlx::test(migrations = "./migrations")]
async fn list_sorts_by_priority_descending(pool: PgPool) {
    let store = Store::new(pool);
    let low = new_job("https://example.com/low", -5);
    let high = new_job("https://example.com/high", 10);
    store.create(&low).await.expect("create");
    store.create(&high).await.expect("create");

    let page = store
        .list(
            &JobFilter::default(),
            JobSort {
                field: SortField::Priority,
                direction: SortDirection::Desc,
            },
            Page { offset: 0, limit: 10 },
        )
        .await
        .expect("list");

    assert_eq!(page.items[0].id, high.id);
    assert_eq!(page.items[1].id, low.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn search_matches_url_substring(pool: PgPool) {
    let store = Store::new(pool);
    let a = new_job("https://example.com/widgets", 0);
    let b = new_job("https://example.com/gadgets", 0);
    store.create(&a).await.expect("create");
    store.create(&b).await.expect("create");

    let page = store
        .search("widgets", &JobFilter::default(), JobSort::default(), Page { offset: 0, limit: 10 })
        .await
        .expect("search");

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, a.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn queued_for_recovery_orders_by_priority_then_age(pool: PgPool) {
    let store = Store::new(pool);
    let first = new_job("https://example.com/first", 0);
    let second = new_job("https://example.com/second", 0);
    let urgent = new_job("https://example.com/urgent", 10);
    store.create(&first).await.expect("create");
    store.create(&second).await.expect("create");
    store.create(&urgent).await.expect("create");

    let recovery = store.queued_for_recovery().await.expect("queued_for_recovery");
    assert_eq!(recovery[0].0, urgent.id);
    assert_eq!(recovery[1].0, first.id);
    assert_eq!(recovery[2].0, second.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn recover_orphaned_running_requeues_and_bumps_retry_count(pool: PgPool) {
    let store = Store::new(pool);
    let job = new_job("https://example.com/a", 0);
    store.create(&job).await.expect("create");
    store
        .transition(job.id, JobStatus::Queued, JobStatus::Running, JobPatch::default())
        .await
        .expect("queued -> running");

    let recovered = store.recover_orphaned_running().await.expect("recover");
    assert_eq!(recovered, 1);

    let after = store.get(job.id).await.expect("get");
    assert_eq!(after.status, JobStatus::Queued);
    assert_eq!(after.retry_count, 1);
    assert!(after.started_at.is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn request_cancel_sets_flag_on_running_job(pool: PgPool) {
    let store = Store::new(pool);
    let job = new_job("https://example.com/a", 0);
    store.create(&job).await.expect("create");
    store
        .transition(job.id, JobStatus::Queued, JobStatus::Running, JobPatch::default())
        .await
        .expect("queued -> running");

    assert!(!store.is_cancel_requested(job.id).await.expect("check"));
    store.request_cancel(job.id).await.expect("request cancel");
    assert!(store.is_cancel_requested(job.id).await.expect("check"));
}
