use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use scrape_dns::InternalClient;
use scrape_types::{JobResult, ScrapeConfig};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{FetchError, FetchFailureKind, FetchRequest, Fetcher, ProgressReporter};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RESPONSE_BYTES: usize = 32 * 1024 * 1024;

/// Anti-automation challenge pages advertise themselves through a handful
/// of stable markers; a fetch that lands on one is reported as a
/// retryable failure so the executor's retry-with-backoff policy can ride
/// it out (challenges are frequently solved by the origin after a short
/// wait, e.g. a JS redirect loop finishing).
const CHALLENGE_MARKERS: &[&str] = &[
    "checking your browser before accessing",
    "cf-browser-verification",
    "challenge-platform",
    "ddos protection by",
];

/// Plain HTTP client augmented with challenge-page detection. Outbound DNS
/// is routed through the public-address-only resolver whenever the
/// deployment is configured to reject internal targets.
pub struct LightHttpFetcher {
    client: InternalClient,
}

impl LightHttpFetcher {
    pub fn new(block_internal_targets: bool) -> Result<Self, FetchError> {
        let client = InternalClient::new(block_internal_targets)
            .map_err(|e| FetchError::new(FetchFailureKind::InvalidParameters, false, e.to_string()))?;
        Ok(LightHttpFetcher { client })
    }
}

#[async_trait]
impl Fetcher for LightHttpFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        config: &ScrapeConfig,
        cancel: CancellationToken,
        progress: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<JobResult, FetchError> {
        let headers = build_headers(&request.headers, config.user_agent.as_deref())?;

        // Per-request proxying needs a dedicated client (reqwest clients
        // are built with a fixed proxy set); validate the URL through the
        // shared client first either way, so SSRF guarding always applies.
        self.client
            .request(request.method.into(), &request.url)
            .map_err(|e| FetchError::new(FetchFailureKind::BlockedTarget, false, e.to_string()))?;

        let mut builder = match &config.proxy {
            Some(proxy_url) => {
                let proxied = reqwest::Client::builder()
                    .proxy(reqwest::Proxy::all(proxy_url).map_err(|e| {
                        FetchError::new(FetchFailureKind::InvalidParameters, false, e.to_string())
                    })?)
                    .build()
                    .map_err(|e| FetchError::new(FetchFailureKind::InvalidParameters, false, e.to_string()))?;
                proxied.request(request.method.into(), &request.url)
            }
            None => self.client.inner().request(request.method.into(), &request.url),
        }
        .headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs as u64));

        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        if let Some(progress) = &progress {
            progress.report(10, Some("sending request".to_string())).await;
        }

        let start = Utc::now();
        let mut send_fut = Box::pin(builder.send());
        let response = loop {
            tokio::select! {
                res = &mut send_fut => break res,
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    if cancel.is_cancelled() {
                        return Err(FetchError::new(FetchFailureKind::Cancelled, false, "cancelled"));
                    }
                }
            }
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let kind = if e.is_timeout() {
                    FetchFailureKind::Timeout
                } else {
                    FetchFailureKind::RequestError
                };
                return Err(FetchError::new(kind, true, e.to_string()));
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        if let Some(progress) = &progress {
            progress.report(50, Some("reading response body".to_string())).await;
        }

        let content = read_body_with_limit(response, &cancel).await?;
        let response_time_ms = (Utc::now() - start).num_milliseconds().max(0) as u64;

        if !status.is_success() {
            return Err(FetchError::new(
                FetchFailureKind::FailureStatus,
                status.is_server_error(),
                format!("received status {status}"),
            ));
        }

        let body_looks_like_challenge = content_type
            .as_deref()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(true)
            && is_challenge_page(&content);
        if body_looks_like_challenge && config.bypass_cloudflare {
            warn!(url = %request.url, "challenge page detected, reporting as retryable");
            return Err(FetchError::new(
                FetchFailureKind::FailureStatus,
                true,
                "anti-automation challenge page detected",
            ));
        }

        if let Some(progress) = &progress {
            progress.report(90, Some("applying extractions".to_string())).await;
        }

        let mut result = JobResult {
            status_code: status.as_u16(),
            response_time_ms,
            content_length: content.len() as u64,
            content_type,
            headers,
            content,
            text: None,
            links: None,
            images: None,
            final_url: Some(final_url),
        };
        crate::apply_extractions(&mut result, config);

        if let Some(progress) = &progress {
            progress.report(100, None).await;
        }

        Ok(result)
    }
}

fn build_headers(raw: &HashMap<String, String>, user_agent: Option<&str>) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    for (key, value) in raw {
        let name = HeaderName::try_from(key.as_str())
            .map_err(|e| FetchError::new(FetchFailureKind::InvalidParameters, false, e.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::new(FetchFailureKind::InvalidParameters, false, e.to_string()))?;
        headers.insert(name, value);
    }
    if !headers.contains_key(reqwest::header::USER_AGENT) {
        if let Some(ua) = user_agent {
            if let Ok(value) = HeaderValue::from_str(ua) {
                headers.insert(reqwest::header::USER_AGENT, value);
            }
        }
    }
    Ok(headers)
}

fn is_challenge_page(content: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(content) else {
        return false;
    };
    let lower = text.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|marker| lower.contains(marker))
}

async fn read_body_with_limit(
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, FetchError> {
    let mut stream = response.bytes_stream();
    let mut buffer = Vec::new();

    loop {
        tokio::select! {
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(&bytes);
                        if buffer.len() > MAX_RESPONSE_BYTES {
                            return Err(FetchError::new(
                                FetchFailureKind::ResponseTooLarge,
                                false,
                                "response exceeded the size limit",
                            ));
                        }
                    }
                    Some(Err(e)) => {
                        return Err(FetchError::new(FetchFailureKind::RequestError, true, e.to_string()));
                    }
                    None => return Ok(buffer),
                }
            }
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                if cancel.is_cancelled() {
                    return Err(FetchError::new(FetchFailureKind::Cancelled, false, "cancelled"));
                }
            }
        }
    }
}
