use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, header};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    config::ApiSettings,
    error::SyncError,
    planner::RequestSpec,
    provider::{RawPayload, WeatherApi, provider_reason},
};

use super::retry::{Disposition, RetryPolicy, classify};

const USER_AGENT: &str = concat!("tap-openmeteo/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the Open-Meteo forecast and archive endpoints.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    http: Client,
    policy: RetryPolicy,
}

impl OpenMeteoClient {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(settings.user_agent.as_deref().unwrap_or(USER_AGENT))
            .default_headers(
                [(header::ACCEPT, header::HeaderValue::from_static("application/json"))]
                    .into_iter()
                    .collect(),
            )
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            policy: RetryPolicy::with_max_retries(settings.max_retries),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn failed(request: &RequestSpec, status: Option<u16>, detail: String) -> SyncError {
        SyncError::RequestFailed {
            locations: request.location_names(),
            status,
            detail,
        }
    }
}

#[async_trait]
impl WeatherApi for OpenMeteoClient {
    async fn fetch(&self, request: &RequestSpec) -> Result<RawPayload, SyncError> {
        let attempts = self.policy.max_retries + 1;
        let mut retry = 0;

        loop {
            let attempt = retry + 1;
            debug!(
                stream = %request.stream,
                url = %request.url,
                locations = request.locations.len(),
                attempt,
                "Sending request"
            );

            let (status, delay, detail) = match self
                .http
                .get(&request.url)
                .query(request.query())
                .send()
                .await
            {
                Err(e) => (None, self.policy.backoff(retry), format!("network error: {e}")),
                Ok(res) => {
                    let status = res.status();
                    match classify(status) {
                        Disposition::Success => match res.text().await {
                            Ok(body) => return RawPayload::decode(request, &body),
                            Err(e) => (
                                Some(status.as_u16()),
                                self.policy.backoff(retry),
                                format!("failed to read response body: {e}"),
                            ),
                        },
                        Disposition::Retry => {
                            let delay = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                                self.policy.rate_limit_delay(retry, res.headers())
                            } else {
                                self.policy.backoff(retry)
                            };
                            let body = res.text().await.unwrap_or_default();
                            (Some(status.as_u16()), delay, error_detail(status, &body))
                        }
                        Disposition::Fail => {
                            let body = res.text().await.unwrap_or_default();
                            return Err(Self::failed(
                                request,
                                Some(status.as_u16()),
                                error_detail(status, &body),
                            ));
                        }
                    }
                }
            };

            if retry >= self.policy.max_retries {
                warn!(
                    stream = %request.stream,
                    attempts,
                    status = ?status,
                    "Retry budget exhausted: {detail}"
                );
                return Err(Self::failed(request, status, detail));
            }

            warn!(
                stream = %request.stream,
                attempt,
                attempts,
                status = ?status,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, retrying: {detail}"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

fn error_detail(status: reqwest::StatusCode, body: &str) -> String {
    let reason = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.as_object().map(provider_reason));

    match reason {
        Some(reason) => format!("HTTP {status}: {reason}"),
        None => format!("HTTP {status}: {}", truncate_body(body)),
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}
