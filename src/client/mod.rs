use crate::config::ClientConfig;
use crate::error::{LimiterError, Result};
use crate::rate_limit::{RateLimitCategory, RateLimiter, MAX_COOLDOWN};
use bytes::{Bytes, BytesMut};
use http::{header::RETRY_AFTER, HeaderMap, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cooldown applied when a 429 carries no usable `Retry-After`
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// HTTP client that passes every request through the rate limiter
///
/// Waits for admission before sending, and turns an upstream 429 into a
/// cooldown on the request's category.
#[derive(Clone)]
pub struct ThrottledClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
    retry_delay: Duration,
    max_download_bytes: u64,
}

impl ThrottledClient {
    /// Create a new throttled client
    pub fn new(limiter: Arc<RateLimiter>, config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            http,
            limiter,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_download_bytes: config.max_download_bytes,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Underlying client, for building requests to pass to [`ThrottledClient::send`]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Wait for admission in `category`, then send the request once
    pub async fn send(
        &self,
        category: RateLimitCategory,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let waited = self.limiter.wait_if_needed(category, 1).await;
        if !waited.is_zero() {
            debug!(
                category = %category,
                waited_secs = waited.as_secs_f64(),
                "Waited before sending request"
            );
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            let applied = self.limiter.trigger_cooldown(category, Some(retry_after));
            warn!(
                category = %category,
                url = %response.url(),
                retry_after_secs = applied.as_secs_f64(),
                "Upstream rate limited, cooling down"
            );
            return Err(LimiterError::UpstreamThrottled {
                category: category.to_string(),
                retry_after: applied,
            });
        }

        if !status.is_success() {
            return Err(LimiterError::Upstream {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        Ok(response)
    }

    /// [`ThrottledClient::send`] with retries on 429s, transport errors and 5xx
    ///
    /// A 429 is retried as soon as the cooldown it set has been waited out;
    /// other failures sleep `retry_delay * attempt` first. Requests whose
    /// body can't be cloned are sent once.
    pub async fn send_with_retry(
        &self,
        category: RateLimitCategory,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut attempt: u32 = 0;

        loop {
            let Some(next) = request.try_clone() else {
                return self.send(category, request).await;
            };
            attempt += 1;

            match self.send(category, next).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(category = %category, attempt, "Request succeeded after retries");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if !is_retryable(&e) {
                        return Err(e);
                    }

                    if attempt > self.max_retries {
                        warn!(
                            category = %category,
                            attempt,
                            max_retries = self.max_retries,
                            error = %e,
                            "Request failed after max retries"
                        );
                        return Err(e);
                    }

                    // The next send waits out the cooldown a 429 just set
                    let delay = match &e {
                        LimiterError::UpstreamThrottled { .. } => Duration::ZERO,
                        _ => self.retry_delay.saturating_mul(attempt),
                    };
                    debug!(
                        category = %category,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// POST a JSON body, e.g. a webhook embed
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        category: RateLimitCategory,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        self.send_with_retry(category, self.http.post(url).json(body)).await
    }

    pub async fn get(&self, category: RateLimitCategory, url: &str) -> Result<reqwest::Response> {
        self.send_with_retry(category, self.http.get(url)).await
    }

    /// Fetch an attachment under the `file_download` budget
    ///
    /// Bodies larger than `max_download_bytes` are refused up front when
    /// `Content-Length` says so, and abandoned mid-stream otherwise.
    pub async fn download(&self, url: &str) -> Result<Bytes> {
        let mut response = self.get(RateLimitCategory::FileDownload, url).await?;
        let limit = self.max_download_bytes;
        let too_large = || LimiterError::DownloadTooLarge {
            url: url.to_string(),
            limit,
        };

        let expected = response.content_length();
        if let Some(length) = expected.filter(|length| *length > limit) {
            warn!(url = %url, content_length = length, limit, "Refusing oversized download");
            return Err(too_large());
        }

        let mut body = BytesMut::with_capacity(expected.unwrap_or(0) as usize);
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > limit {
                warn!(url = %url, limit, "Download exceeded size limit while streaming");
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

fn is_retryable(err: &LimiterError) -> bool {
    match err {
        LimiterError::UpstreamThrottled { .. } | LimiterError::Http(_) => true,
        LimiterError::Upstream { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Seconds to back off from a `Retry-After` header, fractional values allowed
///
/// Capped at [`MAX_COOLDOWN`].
fn parse_retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_or(MAX_COOLDOWN, |retry_after| retry_after.min(MAX_COOLDOWN))
        })
        .unwrap_or(DEFAULT_RETRY_AFTER)
}
