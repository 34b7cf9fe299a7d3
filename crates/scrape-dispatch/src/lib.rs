mod extract;
mod headless;
mod light_http;

pub use extract::{extract_images, extract_links, extract_text};
pub use headless::HeadlessBrowserFetcher;
pub use light_http::LightHttpFetcher;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scrape_types::{HttpMethod, JobResult, ScrapeConfig};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailureKind {
    Timeout,
    RequestError,
    FailureStatus,
    InvalidBody,
    ResponseTooLarge,
    InvalidParameters,
    BlockedTarget,
    Unsupported,
    Cancelled,
}

/// The dispatcher reports whether a failure is worth retrying; deciding
/// whether to actually retry (and how) is the executor's job, not the
/// variant's.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    pub kind: FetchFailureKind,
    pub message: String,
    pub retryable: bool,
}

impl FetchError {
    pub fn new(kind: FetchFailureKind, retryable: bool, message: impl Into<String>) -> Self {
        FetchError {
            kind,
            retryable,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: u8, message: Option<String>);
}

/// The polymorphic scraper interface: every variant produces a uniform
/// `JobResult` regardless of how it fetched the page.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request: &FetchRequest,
        config: &ScrapeConfig,
        cancel: CancellationToken,
        progress: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<JobResult, FetchError>;
}

/// Applies the optional post-fetch extractions named in `config` onto an
/// already-fetched result, in place. A no-op if none are requested or the
/// body isn't valid UTF-8 (e.g. a binary response).
pub fn apply_extractions(result: &mut JobResult, config: &ScrapeConfig) {
    if !config.extract_text && !config.extract_links && !config.extract_images {
        return;
    }
    let Ok(html) = std::str::from_utf8(&result.content) else {
        return;
    };

    if config.extract_text {
        result.text = Some(extract_text(html));
    }
    if config.extract_links {
        result.links = Some(extract_links(html, result.final_url.as_deref()));
    }
    if config.extract_images {
        result.images = Some(extract_images(html, result.final_url.as_deref()));
    }
}
