use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use scrape_metrics::constants::CALLBACK_FAILURES;

/// Fire-and-forget notification: a single POST attempt, bounded by the
/// client's own timeout, never retried. Failures are logged and counted,
/// never surfaced to the job's own state.
pub async fn post_callback(client: &reqwest::Client, callback_url: &str, job_id: Uuid, outcome: &str) {
    let body = json!({
        "job_id": job_id,
        "status": outcome,
    });

    if let Err(err) = client.post(callback_url).json(&body).send().await {
        warn!(job_id = %job_id, callback_url, %err, "callback POST failed");
        scrape_metrics::inc(CALLBACK_FAILURES, &[], 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn posts_job_id_and_outcome_as_json() {
        let server = MockServer::start();
        let job_id = Uuid::now_v7();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/cb")
                .json_body(json!({"job_id": job_id, "status": "completed"}));
            then.status(200);
        });

        let client = reqwest::Client::new();
        post_callback(&client, &server.url("/cb"), job_id, "completed").await;

        mock.assert();
    }

    #[tokio::test]
    async fn unreachable_callback_url_does_not_panic() {
        let client = reqwest::Client::new();
        post_callback(&client, "http://127.0.0.1:1/cb", Uuid::now_v7(), "failed").await;
    }
}
