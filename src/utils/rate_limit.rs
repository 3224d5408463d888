//! Per-source request rate limiting.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};

use crate::models::SourceKind;
use crate::sources::SourceError;

/// What to do when no token is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitMode {
    /// Wait until the limiter grants a token
    #[default]
    Block,
    /// Return `RateLimited` immediately
    FailFast,
}

/// `requests` per `per`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    pub requests: u32,
    pub per: Duration,
}

impl RateSpec {
    pub fn new(requests: u32, per: Duration) -> Self {
        Self { requests, per }
    }

    /// Published limits of each catalog
    pub fn default_for(kind: SourceKind, has_api_key: bool) -> Self {
        match kind {
            SourceKind::OpenAlex => Self::new(10, Duration::from_secs(1)),
            SourceKind::CrossRef => Self::new(50, Duration::from_secs(1)),
            SourceKind::Dblp => Self::new(1, Duration::from_secs(1)),
            SourceKind::Arxiv => Self::new(1, Duration::from_secs(3)),
            SourceKind::SemanticScholar if has_api_key => Self::new(1, Duration::from_secs(1)),
            SourceKind::SemanticScholar => Self::new(100, Duration::from_secs(300)),
        }
    }

    /// Token bucket of `requests` cells refilled evenly over `per`
    fn quota(&self) -> Option<Quota> {
        let burst = NonZeroU32::new(self.requests)?;
        let period = self.per.checked_div(self.requests)?;
        Quota::with_period(period).map(|q| q.allow_burst(burst))
    }
}

/// Rate limiter guarding every request to one source
pub struct SourceGovernor {
    kind: SourceKind,
    limiter: Option<DefaultDirectRateLimiter>,
    mode: LimitMode,
}

impl std::fmt::Debug for SourceGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceGovernor")
            .field("kind", &self.kind)
            .field("limited", &self.limiter.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}

impl SourceGovernor {
    pub fn new(kind: SourceKind, spec: RateSpec, mode: LimitMode) -> Self {
        let limiter = spec.quota().map(RateLimiter::direct);
        if limiter.is_none() {
            tracing::warn!("Invalid rate for {}: {:?}, requests are not limited", kind, spec);
        }
        Self {
            kind,
            limiter,
            mode,
        }
    }

    /// A governor that never limits (tests, local mirrors)
    pub fn unlimited(kind: SourceKind) -> Self {
        Self {
            kind,
            limiter: None,
            mode: LimitMode::Block,
        }
    }

    pub fn mode(&self) -> LimitMode {
        self.mode
    }

    /// Take a token according to the configured mode
    pub async fn acquire(&self) -> Result<(), SourceError> {
        let Some(ref limiter) = self.limiter else {
            return Ok(());
        };

        match self.mode {
            LimitMode::Block => {
                limiter.until_ready().await;
                Ok(())
            }
            LimitMode::FailFast => limiter.check().map_err(|not_until| {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                tracing::debug!("{} rate limit reached, next token in {:?}", self.kind, wait);
                SourceError::RateLimited {
                    retry_after: Some(wait),
                }
            }),
        }
    }

    /// Wait for a token regardless of mode (used between retries)
    pub async fn wait(&self) {
        if let Some(ref limiter) = self.limiter {
            limiter.until_ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rates() {
        assert_eq!(
            RateSpec::default_for(SourceKind::Arxiv, false),
            RateSpec::new(1, Duration::from_secs(3))
        );
        assert_eq!(
            RateSpec::default_for(SourceKind::SemanticScholar, false),
            RateSpec::new(100, Duration::from_secs(300))
        );
        assert_eq!(
            RateSpec::default_for(SourceKind::SemanticScholar, true),
            RateSpec::new(1, Duration::from_secs(1))
        );
    }

    #[test]
    fn test_zero_rate_has_no_quota() {
        assert!(RateSpec::new(0, Duration::from_secs(1)).quota().is_none());
        assert!(RateSpec::new(5, Duration::ZERO).quota().is_none());
    }

    #[tokio::test]
    async fn test_fail_fast_rejects_when_exhausted() {
        let governor = SourceGovernor::new(
            SourceKind::Dblp,
            RateSpec::new(2, Duration::from_secs(60)),
            LimitMode::FailFast,
        );

        tokio_test::assert_ok!(governor.acquire().await);
        tokio_test::assert_ok!(governor.acquire().await);
        match governor.acquire().await {
            Err(SourceError::RateLimited {
                retry_after: Some(wait),
            }) => assert!(wait > Duration::ZERO),
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_block_mode_waits_for_token() {
        let governor = SourceGovernor::new(
            SourceKind::Arxiv,
            RateSpec::new(1, Duration::from_millis(50)),
            LimitMode::Block,
        );

        let start = std::time::Instant::now();
        governor.acquire().await.unwrap();
        governor.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_unlimited_never_blocks() {
        let governor = SourceGovernor::unlimited(SourceKind::OpenAlex);
        for _ in 0..100 {
            governor.acquire().await.unwrap();
        }
    }
}
