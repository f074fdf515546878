//! Retry with exponential backoff for transient errors.
//!
//! All network-backed sources should use [`send_json`] instead of calling
//! `reqwest::RequestBuilder::send()` directly, and anything else that can
//! fail transiently can wrap itself in [`with_backoff`].
//!
//! # Usage
//!
//! ```ignore
//! use crate::retry::{self, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let body = retry::send_json(&policy, || client.get(&url)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::SourceError;

/// Default number of retries after the first attempt.
///
/// With the default 2s base delay the waits are 2s, 4s, 8s, 16s, 32s, so a
/// request gives up after 62 seconds of backoff.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based): `base_delay * 2^(retry-1)`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Runs `op` until it succeeds, fails permanently, or runs out of retries.
///
/// The `op` closure is called on each attempt to build a fresh future.
/// Errors for which [`SourceError::is_transient`] is `false` are returned
/// immediately.
///
/// # Errors
///
/// Returns the first permanent error, or [`SourceError::RetriesExhausted`]
/// once `policy.max_retries` retries have all failed transiently.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempt >= policy.max_retries {
                    log::error!(
                        "{label}: giving up after {} attempts: {e}",
                        policy.max_retries + 1
                    );
                    return Err(SourceError::RetriesExhausted {
                        attempts: policy.max_retries + 1,
                        last_error: e.to_string(),
                    });
                }

                attempt += 1;
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "{label}: transient error: {e} (retry {attempt}/{} in {delay:?})",
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Sends an HTTP request and parses the response body as JSON.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (since builders are consumed by
/// `.send()`).
///
/// Connection errors, timeouts, HTTP 429, HTTP 5xx, and unreadable or
/// truncated bodies are retried. HTTP 4xx (except 429) is permanent.
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails permanently or after all
/// retries.
pub async fn send_json<F>(
    policy: &RetryPolicy,
    build_request: F,
) -> Result<serde_json::Value, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let build_request = &build_request;
    with_backoff(policy, "send_json", || async move {
        let response = build_request().send().await?;
        let url = response.url().to_string();
        let status = response.status();

        if status.is_client_error() || status.is_server_error() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                message: format!("{url} answered {status}"),
            });
        }

        let text = response.text().await.map_err(|e| SourceError::Body {
            message: format!("{url}: {e}"),
        })?;

        serde_json::from_str(&text).map_err(|json_err| {
            let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
            log::warn!(
                "JSON parse failed\n  \
                 url: {url}\n  \
                 status: {status}\n  \
                 received: {} bytes\n  \
                 parse error: {json_err}\n  \
                 body preview: {preview}",
                text.len(),
            );
            SourceError::Body {
                message: format!("JSON parse failed: {json_err} ({} bytes)", text.len()),
            }
        })
    })
    .await
}
