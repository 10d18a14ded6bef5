use std::time::Duration;

use metrics::{counter, histogram};
use reqwest::{
    header::{HeaderMap, ACCEPT, RETRY_AFTER},
    Client, StatusCode,
};
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Retries allowed after the first attempt.
    pub retries: u32,
    /// First local wait; doubled after every retry.
    pub base_delay: Duration,
    /// Per-attempt timeout applied by the underlying client.
    pub request_timeout: Duration,
}

impl BackoffConfig {
    /// Longest local wait the budget allows; also caps server `Retry-After` hints.
    pub fn max_wait(&self) -> Duration {
        let doublings = self.retries.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << doublings)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited on all {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("request failed after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Transport { .. } => "transport",
            FetchError::Status { .. } => "status",
            FetchError::Body(_) => "body",
            FetchError::DeadlineExceeded(_) => "deadline",
            FetchError::Client(_) => "client",
        }
    }
}

/// GET-only client that absorbs 429s and transport failures.
///
/// A 429 waits for the server's `Retry-After` hint when one is given and the
/// local delay otherwise. Hints are capped at [`BackoffConfig::max_wait`].
/// Any other non-success status is returned at once.
#[derive(Debug, Clone)]
pub struct BackoffClient {
    http: Client,
    config: BackoffConfig,
}

impl BackoffClient {
    pub fn new(config: BackoffConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: Client, config: BackoffConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let started = Instant::now();
        let result = self.fetch_with_retries(url).await;
        histogram!(
            "inspect_http_fetch_seconds",
            started.elapsed().as_secs_f64()
        );
        if let Err(err) = &result {
            counter!("inspect_http_fetch_failures_total", 1, "reason" => err.metric_label());
        }
        result
    }

    /// Like [`fetch`](Self::fetch), but gives up once `deadline` has elapsed,
    /// even in the middle of a backoff wait.
    pub async fn fetch_within(&self, url: &str, deadline: Duration) -> Result<String, FetchError> {
        match timeout(deadline, self.fetch(url)).await {
            Ok(result) => result,
            Err(_) => {
                counter!("inspect_http_fetch_failures_total", 1, "reason" => "deadline");
                Err(FetchError::DeadlineExceeded(deadline))
            }
        }
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<String, FetchError> {
        let mut delay = self.config.base_delay;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let exhausted = attempt > self.config.retries;
            let outcome = self
                .http
                .get(url)
                .header(ACCEPT, "application/json")
                .send()
                .await;

            let (hint, reason) = match outcome {
                Ok(response) if response.status().is_success() => {
                    debug!(attempt, "fetch succeeded");
                    return response.text().await.map_err(FetchError::Body);
                }
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    if exhausted {
                        return Err(FetchError::RateLimited { attempts: attempt });
                    }
                    (retry_after(response.headers()), "rate_limited")
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(FetchError::Status { status, body });
                }
                Err(source) => {
                    if exhausted {
                        return Err(FetchError::Transport {
                            attempts: attempt,
                            source,
                        });
                    }
                    warn!(attempt, error = %source, "request failed");
                    (None, "transport")
                }
            };

            let wait = match hint {
                Some(hint) if hint > self.config.max_wait() => {
                    debug!(
                        hint_ms = hint.as_millis() as u64,
                        cap_ms = self.config.max_wait().as_millis() as u64,
                        "capping retry-after hint"
                    );
                    self.config.max_wait()
                }
                Some(hint) => hint,
                None => delay,
            };
            warn!(attempt, wait_ms = wait.as_millis() as u64, reason, "backing off before retry");
            counter!("inspect_http_retries_total", 1, "reason" => reason);
            sleep(wait).await;
            delay = delay.saturating_mul(2);
        }
    }
}

/// Delta-seconds form of `Retry-After`; HTTP dates are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
