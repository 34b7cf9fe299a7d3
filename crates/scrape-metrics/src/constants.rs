//! Metric name and label-key constants for the orchestration core, kept in
//! one place so instrumentation sites and dashboards agree on spelling.

pub const WORKER_SATURATION: &str = "scrape_worker_saturation";
pub const JOBS_DEQUEUED: &str = "scrape_jobs_dequeued_total";
pub const DEQUEUE_TIME_MS: &str = "scrape_dequeue_time_ms";
pub const JOB_TOTAL_TIME_MS: &str = "scrape_job_total_time_ms";
pub const FETCH_TIME_MS: &str = "scrape_fetch_time_ms";
pub const JOBS_COMPLETED: &str = "scrape_jobs_completed_total";
pub const JOBS_FAILED: &str = "scrape_jobs_failed_total";
pub const JOBS_CANCELLED: &str = "scrape_jobs_cancelled_total";
pub const JOBS_RETRIED: &str = "scrape_jobs_retried_total";
pub const CALLBACK_FAILURES: &str = "scrape_callback_failures_total";
pub const QUEUE_DEPTH: &str = "scrape_queue_depth";
pub const QUEUE_REJECTIONS: &str = "scrape_queue_rejections_total";
pub const CACHE_HITS: &str = "scrape_cache_hits_total";
pub const CACHE_MISSES: &str = "scrape_cache_misses_total";
pub const CACHE_HIT_RATIO: &str = "scrape_cache_hit_ratio";
pub const STORE_QUERY_TIME_MS: &str = "scrape_store_query_time_ms";

pub const OUTCOME_LABEL: &str = "outcome";
pub const VARIANT_LABEL: &str = "scraper_variant";
pub const TIER_LABEL: &str = "tier";
pub const OP_LABEL: &str = "op";
