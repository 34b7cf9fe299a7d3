use std::collections::HashMap;

use chrono::{DateTime, Utc};
use scrape_types::{CoreError, HttpMethod, Job, JobResult, JobStatus, ScrapeConfig, ScraperVariant};
use uuid::Uuid;

/// Mirrors the `jobs` table shape column-for-column so sqlx can derive
/// `FromRow` without a macro-checked query; converted into the domain
/// `Job` type at the store boundary.
#[derive(sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub url: String,
    pub method: HttpMethod,
    pub headers: serde_json::Value,
    pub params: serde_json::Value,
    pub body: Option<serde_json::Value>,
    pub scraper_variant: ScraperVariant,
    pub config: serde_json::Value,
    pub tags: Vec<String>,
    pub priority: i16,
    pub status: JobStatus,
    pub progress: i16,
    pub progress_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub callback_url: Option<String>,
    pub cancel_requested: bool,
}

#[derive(sqlx::FromRow)]
pub struct JobResultRow {
    pub status_code: i32,
    pub response_time_ms: i64,
    pub content_length: i64,
    pub content_type: Option<String>,
    pub headers: serde_json::Value,
    pub content: Vec<u8>,
    pub text: Option<String>,
    pub links: Option<serde_json::Value>,
    pub images: Option<serde_json::Value>,
    pub final_url: Option<String>,
}

impl JobResultRow {
    pub fn into_domain(self) -> Result<JobResult, CoreError> {
        let headers: HashMap<String, String> = serde_json::from_value(self.headers)
            .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;
        let links = self
            .links
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;
        let images = self
            .images
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;

        Ok(JobResult {
            status_code: self.status_code as u16,
            response_time_ms: self.response_time_ms as u64,
            content_length: self.content_length as u64,
            content_type: self.content_type,
            headers,
            content: self.content,
            text: self.text,
            links,
            images,
            final_url: self.final_url,
        })
    }
}

impl JobRow {
    pub fn into_domain(self, result: Option<JobResult>) -> Result<Job, CoreError> {
        let headers: HashMap<String, String> = serde_json::from_value(self.headers)
            .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;
        let params: HashMap<String, String> = serde_json::from_value(self.params)
            .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;
        let config: ScrapeConfig = serde_json::from_value(self.config)
            .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;

        Ok(Job {
            id: self.id,
            url: self.url,
            method: self.method,
            headers,
            params,
            body: self.body,
            scraper_variant: self.scraper_variant,
            config,
            tags: self.tags,
            priority: self.priority as i32,
            status: self.status,
            progress: self.progress as u8,
            progress_message: self.progress_message,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_message: self.error_message,
            callback_url: self.callback_url,
            result,
            cancel_requested: self.cancel_requested,
        })
    }
}
