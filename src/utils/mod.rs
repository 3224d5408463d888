//! Utility modules supporting the aggregator and source adapters.
//!
//! - [`ResponseCache`]: TTL cache with per-key request coalescing and statistics
//! - [`deduplicate`]: Merge duplicate records using DOI, arXiv id and title similarity
//! - [`HttpClient`]: Per-source HTTP client with rate limiting and retries
//! - [`SourceGovernor`]: Token-bucket limiter for one source
//! - [`RetryConfig`] / [`with_retry`]: Exponential backoff for retryable errors
//! - [`bibtex`]: BibTeX generation, key disambiguation and parsing
//!
//! # Caching
//!
//! ```rust,no_run
//! use research_aggregator::models::SourceKind;
//! use research_aggregator::sources::{Operation, SourceError};
//! use research_aggregator::utils::{CacheKey, ResponseCache};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), SourceError> {
//! let cache = ResponseCache::new(1000);
//! let key = CacheKey::new(SourceKind::OpenAlex, Operation::Search, "graph neural networks", "");
//! let count: u32 = cache
//!     .get_or_fetch(key, Duration::from_secs(600), || async { Ok(42) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod bibtex;
mod cache;
mod dedup;
mod http;
mod rate_limit;
mod retry;

pub use cache::{CacheKey, CacheStats, OperationStats, ResponseCache};
pub use dedup::{
    deduplicate, deduplicate_by, is_duplicate, merge_records, normalize_title, same_title,
};
pub use http::HttpClient;
pub use rate_limit::{LimitMode, RateSpec, SourceGovernor};
pub use retry::{with_retry, RetryConfig};
