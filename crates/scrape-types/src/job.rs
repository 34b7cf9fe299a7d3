use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, JobResult, ScrapeConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "http_method", rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Get
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "scraper_variant", rename_all = "snake_case")]
pub enum ScraperVariant {
    LightHttp,
    HeadlessBrowser,
}

/// The job state machine. Transitions only flow QUEUED -> {RUNNING,
/// CANCELLED} and RUNNING -> {COMPLETED, FAILED, CANCELLED}; terminal
/// states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "job_status", rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> to` is a legal edge in the transition table. Note
    /// this does not special-case cancel-is-idempotent: callers that
    /// transition a terminal job to the same terminal state should check
    /// that separately (store::transition treats it as a no-op success).
    ///
    /// `Running -> Queued` is the retry re-enqueue edge: a retryable fetch
    /// failure sends a job back to the queue with an incremented
    /// `retry_count` rather than failing it outright.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Queued, Running) | (Queued, Cancelled) |
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) | (Running, Queued)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// The central entity: one scrape work item from submission to terminal
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub scraper_variant: ScraperVariant,
    pub config: ScrapeConfig,
    pub tags: Vec<String>,
    pub priority: i32,
    pub status: JobStatus,
    pub progress: u8,
    pub progress_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub callback_url: Option<String>,
    pub result: Option<JobResult>,
    /// Flipped by a cancel request against a RUNNING job; the worker
    /// observes it at its next suspension point.
    pub cancel_requested: bool,
}

impl Job {
    /// Builds a freshly-QUEUED job from submission parameters, validating
    /// the fields the spec bounds (`tags`, `priority`, `max_retries`).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: String,
        method: HttpMethod,
        headers: HashMap<String, String>,
        params: HashMap<String, String>,
        body: Option<serde_json::Value>,
        scraper_variant: ScraperVariant,
        config: ScrapeConfig,
        tags: Vec<String>,
        priority: i32,
        max_retries: u32,
        callback_url: Option<String>,
    ) -> Result<Self, CoreError> {
        if tags.len() > crate::MAX_TAGS {
            return Err(CoreError::InvalidInput(format!(
                "at most {} tags allowed, got {}",
                crate::MAX_TAGS,
                tags.len()
            )));
        }
        if !(crate::MIN_PRIORITY..=crate::MAX_PRIORITY).contains(&priority) {
            return Err(CoreError::InvalidInput(format!(
                "priority {priority} out of range [{},{}]",
                crate::MIN_PRIORITY,
                crate::MAX_PRIORITY
            )));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(CoreError::InvalidInput(format!(
                "url must be absolute http(s): {url}"
            )));
        }

        Ok(Job {
            id: Uuid::now_v7(),
            url,
            method,
            headers,
            params,
            body,
            scraper_variant,
            config,
            tags,
            priority,
            status: JobStatus::Queued,
            progress: 0,
            progress_message: None,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            callback_url,
            result: None,
            cancel_requested: false,
        })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(priority: i32, tags: Vec<String>) -> Result<Job, CoreError> {
        Job::new(
            "https://example.com".to_string(),
            HttpMethod::Get,
            HashMap::new(),
            HashMap::new(),
            None,
            ScraperVariant::LightHttp,
            ScrapeConfig::default(),
            tags,
            priority,
            3,
            None,
        )
    }

    #[test]
    fn new_job_defaults_to_queued() {
        let job = new_job(0, vec![]).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 0);
        assert!(!job.cancel_requested);
    }

    #[test]
    fn new_job_rejects_non_http_url() {
        let err = Job::new(
            "ftp://example.com".to_string(),
            HttpMethod::Get,
            HashMap::new(),
            HashMap::new(),
            None,
            ScraperVariant::LightHttp,
            ScrapeConfig::default(),
            vec![],
            0,
            3,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn new_job_rejects_priority_out_of_range() {
        assert!(new_job(crate::MAX_PRIORITY + 1, vec![]).is_err());
        assert!(new_job(crate::MIN_PRIORITY - 1, vec![]).is_err());
        assert!(new_job(crate::MAX_PRIORITY, vec![]).is_ok());
    }

    #[test]
    fn new_job_rejects_too_many_tags() {
        let tags = (0..crate::MAX_TAGS + 1).map(|i| i.to_string()).collect();
        assert!(new_job(0, tags).is_err());
    }

    #[test]
    fn transition_table_matches_spec() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(!Queued.can_transition_to(Completed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Queued));
        for terminal in [Completed, Failed, Cancelled] {
            assert!(!terminal.can_transition_to(Queued));
            assert!(!terminal.can_transition_to(Running));
            assert!(terminal.is_terminal());
        }
    }
}
