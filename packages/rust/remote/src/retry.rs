//! HTTP send loop with exponential backoff for transient failures.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use docmirror_shared::{MirrorError, Result, RetryPolicy};

/// Whether a response status is worth retrying (rate limiting or server error).
pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send the request built by `build`, retrying 429/5xx/transport failures.
///
/// `build` is called once per attempt since a `RequestBuilder` is consumed
/// by `send`. Non-retryable statuses map straight to an error; exhausting
/// the policy yields [`MirrorError::RemoteUnavailable`].
pub async fn send_with_retry<F>(policy: &RetryPolicy, what: &str, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt: u32 = 0;

    loop {
        let (reason, retry_after) = match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                if !is_retryable(status) {
                    let body = response.text().await.unwrap_or_default();
                    return Err(status_error(status, &body));
                }
                let hint = parse_retry_after(&response);
                (format!("HTTP {status}"), hint)
            }
            Err(e) if e.is_builder() => {
                return Err(MirrorError::validation(format!("{what}: {e}")));
            }
            Err(e) => (e.to_string(), None),
        };

        attempt += 1;
        if attempt > policy.max_retries {
            warn!(what, attempts = attempt, reason = %reason, "giving up after retries");
            return Err(MirrorError::unavailable(format!(
                "{what}: {reason} (after {attempt} attempts)"
            )));
        }

        let delay = retry_after
            .map_or_else(|| policy.backoff(attempt), |hint| hint.max(policy.backoff(attempt)))
            .min(policy.max_delay);
        debug!(
            what,
            attempt,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Map a non-retryable status to the error taxonomy.
pub fn status_error(status: StatusCode, body: &str) -> MirrorError {
    let message = error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string()
    });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MirrorError::RemoteAuth(message),
        _ => MirrorError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

/// Pull `message` out of a JSON error body, if there is one.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

/// `Retry-After` in whole seconds. HTTP-date values are ignored.
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
