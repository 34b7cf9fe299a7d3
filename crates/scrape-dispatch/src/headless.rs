use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use chrono::Utc;
use futures::StreamExt;
use scrape_types::{HttpMethod, JobResult, ScrapeConfig};
use tokio_util::sync::CancellationToken;

use crate::{FetchError, FetchFailureKind, FetchRequest, Fetcher, ProgressReporter};

const NAVIGATION_HEARTBEAT: Duration = Duration::from_secs(5);
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Drives a headless Chrome instance per fetch via CDP. One browser
/// process per job rather than a shared pool: this variant is the
/// exception, not the hot path, and a dedicated process means one job's
/// crashed tab can never wedge another job's page.
pub struct HeadlessBrowserFetcher;

impl HeadlessBrowserFetcher {
    pub fn new() -> Self {
        HeadlessBrowserFetcher
    }
}

impl Default for HeadlessBrowserFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HeadlessBrowserFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        config: &ScrapeConfig,
        cancel: CancellationToken,
        progress: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<JobResult, FetchError> {
        if request.method != HttpMethod::Get {
            return Err(FetchError::new(
                FetchFailureKind::Unsupported,
                false,
                "headless browser variant only supports GET navigation",
            ));
        }

        let timeout = Duration::from_secs(config.timeout_secs as u64);
        match tokio::time::timeout(timeout, drive(request, config, cancel, progress)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::new(FetchFailureKind::Timeout, true, "headless fetch timed out")),
        }
    }
}

async fn drive(
    request: &FetchRequest,
    config: &ScrapeConfig,
    cancel: CancellationToken,
    progress: Option<Arc<dyn ProgressReporter>>,
) -> Result<JobResult, FetchError> {
    let (width, height) = config.window_size;
    let browser_config = BrowserConfig::builder()
        .window_size(width, height)
        .build()
        .map_err(|e| FetchError::new(FetchFailureKind::InvalidParameters, false, e))?;

    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .map_err(|e| FetchError::new(FetchFailureKind::RequestError, true, e.to_string()))?;

    let handler_task = tokio::spawn(async move {
        while handler.next().await.is_some() {}
    });

    let outcome = run_page(&browser, request, config, &cancel, progress.as_ref()).await;

    let _ = browser.close().await;
    handler_task.abort();

    outcome
}

async fn run_page(
    browser: &Browser,
    request: &FetchRequest,
    config: &ScrapeConfig,
    cancel: &CancellationToken,
    progress: Option<&Arc<dyn ProgressReporter>>,
) -> Result<JobResult, FetchError> {
    if let Some(progress) = progress {
        progress.report(10, Some("opening page".to_string())).await;
    }

    let start = Utc::now();
    let page = browser
        .new_page(request.url.as_str())
        .await
        .map_err(|e| FetchError::new(FetchFailureKind::RequestError, true, e.to_string()))?;

    wait_with_cancel(page.wait_for_navigation(), cancel)
        .await?
        .map_err(|e| FetchError::new(FetchFailureKind::Timeout, true, e.to_string()))?;

    if let Some(selector) = &config.wait_for_selector {
        if let Some(progress) = progress {
            progress.report(40, Some(format!("waiting for selector {selector}"))).await;
        }
        wait_for_selector(&page, selector, cancel).await?;
    }

    if let Some(script) = &config.execute_script {
        if let Some(progress) = progress {
            progress.report(60, Some("executing script".to_string())).await;
        }
        page.evaluate(script.as_str())
            .await
            .map_err(|e| FetchError::new(FetchFailureKind::InvalidParameters, false, e.to_string()))?;
    }

    if let Some(progress) = progress {
        progress.report(80, Some("reading page content".to_string())).await;
    }

    let html = page
        .content()
        .await
        .map_err(|e| FetchError::new(FetchFailureKind::RequestError, true, e.to_string()))?;
    let final_url = page.url().await.ok().flatten().unwrap_or_else(|| request.url.clone());

    let response_time_ms = (Utc::now() - start).num_milliseconds().max(0) as u64;
    let content = html.into_bytes();

    let mut result = JobResult {
        status_code: 200,
        response_time_ms,
        content_length: content.len() as u64,
        content_type: Some("text/html".to_string()),
        headers: HashMap::new(),
        content,
        text: None,
        links: None,
        images: None,
        final_url: Some(final_url),
    };
    crate::apply_extractions(&mut result, config);

    if let Some(progress) = progress {
        progress.report(100, None).await;
    }

    Ok(result)
}

/// Polls the cancellation token alongside a future with no suspension
/// points of its own (navigation, an `evaluate` call) so a cancel mid-fetch
/// is observed within one heartbeat instead of only after the future
/// settles on its own.
async fn wait_with_cancel<F, T>(fut: F, cancel: &CancellationToken) -> Result<T, FetchError>
where
    F: std::future::Future<Output = T>,
{
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Ok(out),
            _ = tokio::time::sleep(NAVIGATION_HEARTBEAT) => {
                if cancel.is_cancelled() {
                    return Err(FetchError::new(FetchFailureKind::Cancelled, false, "cancelled"));
                }
            }
        }
    }
}

async fn wait_for_selector(page: &Page, selector: &str, cancel: &CancellationToken) -> Result<(), FetchError> {
    loop {
        if page.find_element(selector).await.is_ok() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(FetchError::new(FetchFailureKind::Cancelled, false, "cancelled"));
        }
        tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    #[tokio::test]
    async fn non_get_method_is_reported_unsupported() {
        let fetcher = HeadlessBrowserFetcher::new();
        let request = FetchRequest {
            url: "https://example.com".to_string(),
            method: HttpMethod::Post,
            headers: Map::new(),
            params: Map::new(),
            body: None,
        };
        let err = fetcher
            .fetch(&request, &ScrapeConfig::default(), CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchFailureKind::Unsupported);
        assert!(!err.retryable);
    }
}
