//! HTTP client utilities.

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::rate_limit::{LimitMode, RateSpec, SourceGovernor};
use super::retry::{with_retry, RetryConfig};
use crate::config::Config;
use crate::models::SourceKind;
use crate::sources::SourceError;

/// Per-source HTTP client: rate limiter, retry policy and status mapping
///
/// Clones share the underlying connection pool and limiter.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    kind: SourceKind,
    governor: Arc<SourceGovernor>,
    retry: RetryConfig,
}

impl HttpClient {
    /// Create a client with an explicit governor and retry policy
    pub fn new(
        kind: SourceKind,
        governor: SourceGovernor,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SourceError::Transient(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            kind,
            governor: Arc::new(governor),
            retry,
        })
    }

    /// Create the client for a source from configuration
    pub fn from_config(kind: SourceKind, config: &Config) -> Result<Self, SourceError> {
        let governor = SourceGovernor::new(kind, config.rate_for(kind), config.governor.mode);
        Self::new(
            kind,
            governor,
            config.retry_for(kind),
            config.source_timeout(kind),
        )
    }

    /// A client with no rate limit and a short retry schedule
    pub fn unthrottled(kind: SourceKind) -> Result<Self, SourceError> {
        Self::new(
            kind,
            SourceGovernor::unlimited(kind),
            RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                backoff_multiplier: 2.0,
            },
            Duration::from_secs(10),
        )
    }

    /// Same client with a different rate
    pub fn with_rate(mut self, spec: RateSpec, mode: LimitMode) -> Self {
        self.governor = Arc::new(SourceGovernor::new(self.kind, spec, mode));
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Get the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET a JSON document
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let body = self.get_text(url, query, headers).await?;
        serde_json::from_str(&body).map_err(SourceError::from)
    }

    /// GET a text body, rate limited and retried
    pub async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<String, SourceError> {
        // The first token follows the configured mode; retries always wait
        self.governor.acquire().await?;

        let mut first_attempt = true;
        with_retry(self.retry, || {
            let is_retry = !std::mem::replace(&mut first_attempt, false);
            async move {
                if is_retry {
                    self.governor.wait().await;
                }
                let response = self.send(url, query, headers).await?;
                response.text().await.map_err(SourceError::from)
            }
        })
        .await
    }

    async fn send(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<Response, SourceError> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        tracing::debug!("{} GET {}", self.kind, url);
        let response = request.send().await?;
        check_status(self.kind, url, response)
    }
}

/// Map HTTP status codes onto the source error taxonomy
fn check_status(kind: SourceKind, url: &str, response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::NOT_FOUND => Err(SourceError::NotFound(format!("{} ({})", url, kind))),
        StatusCode::TOO_MANY_REQUESTS => Err(SourceError::RateLimited {
            retry_after: retry_after(&response),
        }),
        s if s.is_server_error() => Err(SourceError::Transient(format!(
            "{} returned HTTP {}",
            kind, s
        ))),
        s => Err(SourceError::InvalidRequest(format!(
            "{} returned HTTP {}",
            kind, s
        ))),
    }
}

/// `Retry-After` in delta-seconds form
fn retry_after(response: &Response) -> Option<Duration> {
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
