// src/retry.rs
//! Per-call retry with exponential backoff for outbound HTTP (search, LLM).
//!
//! Transient failures (429, 408, 5xx, timeouts, connection errors) are retried
//! up to `max_attempts`. A 429 honors `retry-after` when present. Auth failures
//! (401/403) return immediately. The budget belongs to one call; a batch of
//! calls never shares it.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HttpError {
    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),
    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl HttpError {
    pub fn from_status(status: u16, retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => HttpError::Auth(status),
            429 => HttpError::RateLimited { retry_after },
            _ => HttpError::Status {
                status,
                message: message.into(),
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::RateLimited { .. } | HttpError::Timeout | HttpError::Connect(_) => true,
            HttpError::Status { status, .. } => *status == 408 || *status >= 500,
            HttpError::Auth(_) | HttpError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HttpError::Timeout
        } else if e.is_decode() || e.is_body() {
            HttpError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            HttpError::from_status(status.as_u16(), None, e.to_string())
        } else {
            HttpError::Connect(e.to_string())
        }
    }
}

/// Turn a non-success response into an `HttpError`, reading `retry-after`.
pub fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    Err(HttpError::from_status(
        status.as_u16(),
        retry_after,
        status.canonical_reason().unwrap_or("unexpected status"),
    ))
}

/// `retry-after` in (possibly fractional) seconds. HTTP-date values are ignored.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first call included. Zero behaves like one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    /// Backoff before attempt `attempt + 1` (0-based `attempt` just failed).
    pub fn delay_for(&self, attempt: u32, err: &HttpError) -> Duration {
        if let HttpError::RateLimited {
            retry_after: Some(after),
        } = err
        {
            return (*after).min(self.max_delay);
        }
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, HttpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HttpError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(target: "retry", %label, error = %e, "non-retryable failure");
                    return Err(e);
                }
                Err(e) => {
                    if attempt + 1 >= attempts {
                        tracing::warn!(target: "retry", %label, attempts, error = %e, "retries exhausted");
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt, &e);
                    tracing::warn!(
                        target: "retry",
                        %label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
