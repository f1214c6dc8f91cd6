use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{StatusCode, header::HeaderMap, header::RETRY_AFTER};
use std::time::Duration;

/// What to do with a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    /// Transient: 429 or 5xx. Consumes retry budget.
    Retry,
    /// Permanent: any other non-success status.
    Fail,
}

pub fn classify(status: StatusCode) -> Disposition {
    if status.is_success() {
        Disposition::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Disposition::Retry
    } else {
        Disposition::Fail
    }
}

/// Exponential backoff with jitter for transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Ceiling on a provider-supplied `Retry-After` hint.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
            max_retry_after: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Delay before retry number `retry` with up to 25% random jitter added.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let jitter_ms = (base.as_millis() / 4) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Delay to honor for a 429 response: the `Retry-After` hint when present,
    /// otherwise regular backoff.
    pub fn rate_limit_delay(&self, retry: u32, headers: &HeaderMap) -> Duration {
        retry_after(headers, Utc::now())
            .map(|hint| hint.min(self.max_retry_after))
            .unwrap_or_else(|| self.backoff(retry))
    }
}

/// Parse a `Retry-After` header given as delta-seconds or an HTTP date.
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
