//! Upstream transport seam.
//!
//! Adapters talk to the upstream catalog through [`Transport`], which returns
//! every HTTP response (any status) as an [`UpstreamResponse`] and reserves
//! [`TransportError`] for failures that produced no response at all. Status
//! classification is the adapter's job, not the transport's.
//!
//! [`RetryingTransport`] layers bounded exponential backoff over any transport.
//! It retries connect failures and 502/503 responses only; timeouts are never
//! retried.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// One upstream HTTP response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Value of the upstream's request-id header, if present.
    pub request_id: Option<String>,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8, truncated for error messages.
    pub fn body_snippet(&self) -> String {
        const MAX: usize = 200;
        let text = String::from_utf8_lossy(&self.body);
        if text.len() <= MAX {
            return text.into_owned();
        }
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

/// Failure to obtain any response.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),
}

/// GET-only access to the upstream catalog API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues `GET {base}{path}` with the given query pairs.
    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<UpstreamResponse, TransportError>;
}

/// Retry policy for exponential backoff.
///
/// ```text
/// backoff(attempt) = min(initial_backoff * multiplier^attempt, max_backoff)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-indexed).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

fn is_retryable(outcome: &Result<UpstreamResponse, TransportError>) -> bool {
    match outcome {
        Ok(response) => matches!(response.status, 502 | 503),
        Err(TransportError::Connect(_)) => true,
        Err(TransportError::Timeout) => false,
    }
}

/// Applies a [`RetryPolicy`] uniformly to every call of the inner transport.
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<UpstreamResponse, TransportError> {
        let mut attempt = 0;
        loop {
            let outcome = self.inner.get(path, query).await;
            if !is_retryable(&outcome) || attempt >= self.policy.max_retries {
                if attempt > 0 {
                    debug!(path, attempts = attempt + 1, "transport: giving up retries");
                }
                return outcome;
            }
            let delay = self.policy.backoff(attempt);
            warn!(path, attempt = attempt + 1, ?delay, "transport: transient failure, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
