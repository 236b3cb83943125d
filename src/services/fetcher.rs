//! Outbound HTTP GET against unreliable third-party image services.
//!
//! Policy: 200 with an image content type succeeds; 429, 5xx, connection
//! failures, timeouts and broken bodies are retried with linear backoff
//! (`base_delay * attempt`); anything else fails at once. Every attempt is
//! reported as a [`FetchEvent`] so callers can rebuild the retry history.

use std::future::Future;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use strum::IntoStaticStr;
use tokio::time::Instant;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(600);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
    /// Substring the response `content-type` must contain.
    pub expected_media: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            expected_media: "image".to_string(),
        }
    }
}

impl RetryPolicy {
    /// Backoff applied after a retryable failure on `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        linear_backoff(self.base_delay, attempt)
    }
}

fn linear_backoff(base_delay: Duration, attempt: u32) -> Duration {
    base_delay * attempt
}

/// A successfully fetched body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Retryable,
    Hard,
    DeadlineExceeded,
}

/// One attempt as observed by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchEvent {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub status: Option<u16>,
    pub cause: Option<String>,
    /// Backoff slept after this attempt, if another attempt followed.
    pub delay: Option<Duration>,
    pub bytes: Option<usize>,
}

impl FetchEvent {
    fn new(attempt: u32, outcome: AttemptOutcome) -> Self {
        Self {
            attempt,
            outcome,
            status: None,
            cause: None,
            delay: None,
            bytes: None,
        }
    }
}

/// Outcome of a fetch plus the full attempt history.
#[derive(Debug)]
pub struct FetchReport {
    pub events: Vec<FetchEvent>,
    pub result: Result<FetchedImage, FetchError>,
}

impl FetchReport {
    /// Number of requests actually issued.
    pub fn attempts(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.outcome != AttemptOutcome::DeadlineExceeded)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("external API HTTP {status}")]
    Status { status: u16 },

    #[error("external API returned non-image ({0})")]
    UnexpectedContentType(String),

    #[error("external API failed after {attempts} attempts: {last_cause}")]
    Exhausted { attempts: u32, last_cause: String },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("request could not be sent: {0}")]
    Request(String),
}

enum Attempt {
    Ok(FetchedImage),
    Retryable { status: Option<u16>, cause: String },
    Hard { status: Option<u16>, error: FetchError },
}

/// HTTP client with bounded retries.
#[derive(Clone)]
pub struct RetryingFetcher {
    http: Client,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(policy: RetryPolicy) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("image-jobs/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(policy.request_timeout)
            .build()?;

        Ok(Self { http, policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch with the configured attempt budget and backoff.
    pub async fn get(&self, url: &Url, deadline: Option<Instant>) -> FetchReport {
        self.get_with(url, self.policy.max_attempts, self.policy.base_delay, deadline)
            .await
    }

    pub async fn get_with(
        &self,
        url: &Url,
        max_attempts: u32,
        base_delay: Duration,
        deadline: Option<Instant>,
    ) -> FetchReport {
        let max_attempts = max_attempts.max(1);
        let mut events = Vec::with_capacity(max_attempts as usize);
        let mut last_cause = String::new();

        for attempt in 1..=max_attempts {
            let Some(outcome) = until(deadline, self.attempt(url)).await else {
                return deadline_report(events, attempt);
            };

            match outcome {
                Attempt::Ok(image) => {
                    let mut event = FetchEvent::new(attempt, AttemptOutcome::Success);
                    event.status = Some(StatusCode::OK.as_u16());
                    event.bytes = Some(image.bytes.len());
                    record(&event);
                    events.push(event);
                    return FetchReport {
                        events,
                        result: Ok(image),
                    };
                }
                Attempt::Hard { status, error } => {
                    let mut event = FetchEvent::new(attempt, AttemptOutcome::Hard);
                    event.status = status;
                    event.cause = Some(error.to_string());
                    record(&event);
                    events.push(event);
                    return FetchReport {
                        events,
                        result: Err(error),
                    };
                }
                Attempt::Retryable { status, cause } => {
                    let delay = (attempt < max_attempts).then(|| linear_backoff(base_delay, attempt));

                    let mut event = FetchEvent::new(attempt, AttemptOutcome::Retryable);
                    event.status = status;
                    event.cause = Some(cause.clone());
                    event.delay = delay;
                    record(&event);
                    events.push(event);
                    last_cause = cause;

                    if let Some(delay) = delay {
                        if until(deadline, tokio::time::sleep(delay)).await.is_none() {
                            return deadline_report(events, attempt);
                        }
                    }
                }
            }
        }

        tracing::warn!(url = %url, attempts = max_attempts, cause = %last_cause, "Remote fetch exhausted retries");
        FetchReport {
            events,
            result: Err(FetchError::Exhausted {
                attempts: max_attempts,
                last_cause,
            }),
        }
    }

    async fn attempt(&self, url: &Url) -> Attempt {
        let response = match self.http.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) if is_transient(&e) => {
                return Attempt::Retryable {
                    status: None,
                    cause: describe(&e),
                }
            }
            Err(e) => {
                return Attempt::Hard {
                    status: None,
                    error: FetchError::Request(e.to_string()),
                }
            }
        };

        let status = response.status();
        if status == StatusCode::OK {
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            if !content_type.contains(&self.policy.expected_media) {
                return Attempt::Hard {
                    status: Some(status.as_u16()),
                    error: FetchError::UnexpectedContentType(content_type),
                };
            }

            return match response.bytes().await {
                Ok(body) => Attempt::Ok(FetchedImage {
                    bytes: body.to_vec(),
                    content_type,
                }),
                Err(e) => Attempt::Retryable {
                    status: Some(status.as_u16()),
                    cause: format!("body read failed: {}", describe(&e)),
                },
            };
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Attempt::Retryable {
                status: Some(status.as_u16()),
                cause: format!("HTTP {}", status.as_u16()),
            }
        } else {
            Attempt::Hard {
                status: Some(status.as_u16()),
                error: FetchError::Status {
                    status: status.as_u16(),
                },
            }
        }
    }
}

/// Runs `fut` unless `deadline` passes first.
async fn until<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn deadline_report(mut events: Vec<FetchEvent>, attempt: u32) -> FetchReport {
    let event = FetchEvent::new(attempt, AttemptOutcome::DeadlineExceeded);
    record(&event);
    events.push(event);
    FetchReport {
        events,
        result: Err(FetchError::DeadlineExceeded),
    }
}

fn record(event: &FetchEvent) {
    let outcome: &'static str = event.outcome.into();
    metrics::counter!("fetch_attempts_total", "outcome" => outcome).increment(1);

    match event.outcome {
        AttemptOutcome::Success => {
            tracing::debug!(attempt = event.attempt, bytes = event.bytes, "Remote fetch succeeded")
        }
        AttemptOutcome::Retryable => tracing::warn!(
            attempt = event.attempt,
            status = event.status,
            cause = event.cause.as_deref(),
            delay_ms = event.delay.map(|d| d.as_millis() as u64),
            "Remote fetch failed, retrying"
        ),
        AttemptOutcome::Hard => tracing::warn!(
            attempt = event.attempt,
            status = event.status,
            cause = event.cause.as_deref(),
            "Remote fetch failed permanently"
        ),
        AttemptOutcome::DeadlineExceeded => {
            tracing::warn!(attempt = event.attempt, "Remote fetch aborted by deadline")
        }
    }
}

/// Connection, timeout and body failures may clear up on their own. Other
/// request errors will fail the same way on every attempt.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_body()
}

fn describe(e: &reqwest::Error) -> String {
    let class = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_body() {
        "body"
    } else {
        "request"
    };
    format!("{class}: {e}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(600));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(1800));

        let fast = RetryPolicy {
            base_delay: Duration::from_millis(20),
            ..RetryPolicy::default()
        };
        assert_eq!(fast.delay_for_attempt(2), Duration::from_millis(40));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.expected_media, "image");
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried_then_exhausted() {
        // Bind and drop a listener so the port is very likely closed.
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/img")).unwrap();

        let fetcher = RetryingFetcher::new(RetryPolicy::default()).unwrap();
        let report = fetcher.get_with(&url, 2, Duration::from_millis(1), None).await;

        assert_eq!(report.attempts(), 2);
        assert!(report.events.iter().all(|e| e.outcome == AttemptOutcome::Retryable));
        assert!(matches!(report.result, Err(FetchError::Exhausted { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn test_connection_closed_before_response_is_hard() {
        // Accept every connection and hang up without answering.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });
        let url = Url::parse(&format!("http://127.0.0.1:{port}/img")).unwrap();

        let fetcher = RetryingFetcher::new(RetryPolicy::default()).unwrap();
        let report = fetcher.get_with(&url, 3, Duration::from_millis(1), None).await;

        assert_eq!(report.attempts(), 1);
        assert_eq!(report.events[0].outcome, AttemptOutcome::Hard);
        assert!(matches!(report.result, Err(FetchError::Request(_))));
    }
}
