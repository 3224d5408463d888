//! Multi-source aggregation engine.
//!
//! The [`Aggregator`] selects eligible sources by capability, routes every call
//! through the shared [`ResponseCache`] with a per-source timeout, and combines
//! the answers:
//!
//! - [`Aggregator::search`] and [`Aggregator::search_author`] fan out to every
//!   capable source, isolate failures and merge duplicates ([`search`]).
//! - [`Aggregator::get_bibtex`] walks an ordered cascade of tiers ([`bibtex`]).
//! - [`Aggregator::get_citations`] and [`Aggregator::build_citation_network`]
//!   bridge identifiers to OpenAlex works ([`network`]).
//! - [`Aggregator::get_details`] tries a fixed chain of sources per identifier type.

pub mod bibtex;
pub mod network;
pub mod search;

pub use bibtex::{BibtexSlot, BibtexTier, BIBTEX_CASCADE, MAX_BATCH};
pub use network::NetworkOptions;
pub use search::AggregatedResults;

use serde::de::DeserializeOwned;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::models::{PaperIdentifier, PaperRecord, SearchQuery, SourceKind};
use crate::resolver;
use crate::sources::{Operation, Source, SourceError, SourceRegistry};
use crate::utils::{CacheKey, CacheStats, ResponseCache};

/// Results requested when a free-text identifier is resolved by search
const RESOLVE_SEARCH_LIMIT: usize = 5;

/// One source's failure inside a multi-source operation
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub source: SourceKind,
    pub error: SourceError,
}

impl SourceFailure {
    pub fn new(source: SourceKind, error: SourceError) -> Self {
        Self { source, error }
    }
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

impl Serialize for SourceFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SourceFailure", 3)?;
        state.serialize_field("source", &self.source)?;
        state.serialize_field("kind", self.error.kind())?;
        state.serialize_field("message", &self.error.to_string())?;
        state.end()
    }
}

/// Errors returned by aggregate operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregatorError {
    /// The most specific failure of a single-source step
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Every candidate source failed
    #[error("{operation} failed on every source: {}", join_failures(.failures))]
    AllSourcesFailed {
        operation: Operation,
        failures: Vec<SourceFailure>,
    },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The request itself is unusable
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

fn join_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AggregatorError {
    /// Stable snake_case name of the failure, used in tool output
    pub fn kind(&self) -> &'static str {
        match self {
            AggregatorError::Source(e) => e.kind(),
            AggregatorError::AllSourcesFailed { .. } => "all_sources_failed",
            AggregatorError::Cancelled => "cancelled",
            AggregatorError::InvalidInput(_) => "invalid_input",
        }
    }

    /// Collapse the failures of a fallback chain into the most specific error
    fn from_chain(operation: Operation, id: &PaperIdentifier, failures: Vec<SourceFailure>) -> Self {
        if failures.is_empty() {
            return AggregatorError::Source(SourceError::NotFound(id.to_string()));
        }
        if failures
            .iter()
            .all(|f| matches!(f.error, SourceError::NotFound(_)))
        {
            return AggregatorError::Source(SourceError::NotFound(id.to_string()));
        }
        if failures.len() == 1 {
            return AggregatorError::Source(failures[0].error.clone());
        }
        AggregatorError::AllSourcesFailed {
            operation,
            failures,
        }
    }
}

/// Aggregation engine over the configured sources
#[derive(Debug, Clone)]
pub struct Aggregator {
    registry: SourceRegistry,
    cache: Arc<ResponseCache>,
    config: Config,
    priority: Vec<SourceKind>,
    source_timeouts: BTreeMap<SourceKind, Duration>,
    overall_timeout: Duration,
}

impl Aggregator {
    /// Create an aggregator over `registry`, using `config` for TTLs, timeouts and priority
    pub fn new(registry: SourceRegistry, cache: ResponseCache, config: Config) -> Self {
        let source_timeouts = SourceKind::ALL
            .iter()
            .map(|kind| (*kind, config.source_timeout(*kind)))
            .collect();
        Self {
            registry,
            cache: Arc::new(cache),
            priority: config.source_priority(),
            overall_timeout: config.overall_timeout(),
            source_timeouts,
            config,
        }
    }

    /// Build the registry and cache from configuration
    pub fn from_config(config: &Config) -> Result<Self, AggregatorError> {
        let registry = SourceRegistry::from_config(config)?;
        let cache = ResponseCache::from_config(&config.cache);
        tracing::info!(
            "Aggregator ready with {} sources: {}",
            registry.len(),
            registry
                .kinds()
                .map(|k| k.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self::new(registry, cache, config.clone()))
    }

    /// Override every per-source timeout and the overall fan-out bound
    pub fn with_timeouts(mut self, per_source: Duration, overall: Duration) -> Self {
        for timeout in self.source_timeouts.values_mut() {
            *timeout = per_source;
        }
        self.overall_timeout = overall;
        self
    }

    pub fn with_priority(mut self, priority: Vec<SourceKind>) -> Self {
        let mut order: Vec<SourceKind> = Vec::with_capacity(SourceKind::ALL.len());
        for kind in priority.into_iter().chain(SourceKind::ALL) {
            if !order.contains(&kind) {
                order.push(kind);
            }
        }
        self.priority = order;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Tie-break order, highest priority first
    pub fn priority(&self) -> &[SourceKind] {
        &self.priority
    }

    fn priority_rank(&self, kind: SourceKind) -> usize {
        self.priority
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(self.priority.len())
    }

    fn source_timeout(&self, kind: SourceKind) -> Duration {
        self.source_timeouts
            .get(&kind)
            .copied()
            .unwrap_or_else(|| self.config.source_timeout(kind))
    }

    /// Per-(source, operation) cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Run `operation`, returning [`AggregatorError::Cancelled`] if `token` fires first
    ///
    /// In-flight source calls are dropped on cancellation; no partial result is kept.
    pub async fn run_cancellable<T, F>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> Result<T, AggregatorError>
    where
        F: Future<Output = Result<T, AggregatorError>>,
    {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Aggregate operation cancelled");
                Err(AggregatorError::Cancelled)
            }
            result = operation => result,
        }
    }

    /// Call one source through the cache, bounded by its timeout
    ///
    /// Undeclared operations fail with `Unsupported` without touching the cache.
    async fn call_source<T, F, Fut>(
        &self,
        source: &Arc<dyn Source>,
        operation: Operation,
        subject: &str,
        params: &str,
        fetch: F,
    ) -> Result<T, SourceError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let kind = source.kind();
        if !source.supports(operation) {
            return Err(source.unsupported(operation));
        }

        let key = CacheKey::new(kind, operation, subject, params);
        let ttl = self.config.cache_ttl(kind, operation);
        let timeout = self.source_timeout(kind);

        match tokio::time::timeout(timeout, self.cache.get_or_fetch(key, ttl, fetch)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Transient(format!(
                "{} {} timed out after {:.1}s",
                kind,
                operation,
                timeout.as_secs_f64()
            ))),
        }
    }

    /// Cached details lookup on one source
    async fn source_details(
        &self,
        source: &Arc<dyn Source>,
        id: &PaperIdentifier,
    ) -> Result<PaperRecord, SourceError> {
        self.call_source(source, Operation::Details, &id.key(), "", || {
            source.get_details(id)
        })
        .await
    }

    /// Sources tried, in order, for a details lookup
    pub fn details_chain(id: &PaperIdentifier) -> Vec<SourceKind> {
        match id {
            PaperIdentifier::Doi { .. } => vec![
                SourceKind::OpenAlex,
                SourceKind::CrossRef,
                SourceKind::SemanticScholar,
            ],
            PaperIdentifier::Arxiv { .. } => vec![
                SourceKind::Arxiv,
                SourceKind::SemanticScholar,
                SourceKind::OpenAlex,
            ],
            PaperIdentifier::OpenAlex { .. } => vec![SourceKind::OpenAlex],
            PaperIdentifier::SemanticScholar { .. } => vec![SourceKind::SemanticScholar],
            PaperIdentifier::Dblp { .. } => vec![SourceKind::Dblp],
            PaperIdentifier::RawQuery { .. } => Vec::new(),
        }
    }

    /// Details for any identifier, trying the chain for its type until one source answers
    ///
    /// A free-text identifier resolves to the best-ranked search hit.
    pub async fn get_details(&self, id: &PaperIdentifier) -> Result<PaperRecord, AggregatorError> {
        let id = resolver::normalize(id);

        if let PaperIdentifier::RawQuery { value } = &id {
            if value.is_empty() {
                return Err(AggregatorError::InvalidInput("empty identifier".to_string()));
            }
            let query = SearchQuery::new(value.clone()).limit(RESOLVE_SEARCH_LIMIT);
            let results = self.search(&query).await?;
            return results
                .papers
                .into_iter()
                .next()
                .ok_or_else(|| SourceError::NotFound(format!("no paper matches {}", id)).into());
        }

        let mut failures = Vec::new();
        for kind in Self::details_chain(&id) {
            let Some(source) = self.registry.get(kind) else {
                continue;
            };
            match self.source_details(source, &id).await {
                Ok(paper) => {
                    tracing::debug!("Details for {} answered by {}", id, kind);
                    return Ok(paper);
                }
                Err(e) => {
                    tracing::debug!("Details for {} failed on {}: {}", id, kind, e);
                    failures.push(SourceFailure::new(kind, e));
                }
            }
        }

        if failures.is_empty() {
            let kind = Self::details_chain(&id)
                .first()
                .copied()
                .unwrap_or(SourceKind::OpenAlex);
            return Err(SourceError::Unsupported {
                operation: Operation::Details,
                source_kind: kind,
            }
            .into());
        }
        Err(AggregatorError::from_chain(Operation::Details, &id, failures))
    }

    /// Semantic Scholar recommendations for a paper
    ///
    /// DOIs, arXiv ids and S2 ids are looked up directly. Other identifiers fail
    /// with `Unsupported` unless `fallback_to_search` is set, in which case the
    /// paper's title (or the free text itself) is searched on Semantic Scholar and
    /// the first hit is used.
    pub async fn get_related(
        &self,
        id: &PaperIdentifier,
        limit: usize,
        fallback_to_search: bool,
    ) -> Result<Vec<PaperRecord>, AggregatorError> {
        let source = self
            .registry
            .get_required(SourceKind::SemanticScholar, Operation::Related)?
            .clone();
        let id = resolver::normalize(id);
        let limit = limit.clamp(1, crate::models::MAX_LIMIT);

        let lookup = match &id {
            PaperIdentifier::SemanticScholar { .. }
            | PaperIdentifier::Arxiv { .. }
            | PaperIdentifier::Doi { .. } => id.clone(),
            _ if !fallback_to_search => {
                return Err(SourceError::Unsupported {
                    operation: Operation::Related,
                    source_kind: id.owning_source().unwrap_or(SourceKind::SemanticScholar),
                }
                .into());
            }
            _ => self.related_fallback(&source, &id).await?,
        };

        let papers = self
            .call_source(
                &source,
                Operation::Related,
                &lookup.key(),
                &format!("limit={}", limit),
                || source.get_related(&lookup, limit),
            )
            .await?;
        Ok(papers)
    }

    /// Resolve an identifier to an S2 paper by searching its title
    async fn related_fallback(
        &self,
        source: &Arc<dyn Source>,
        id: &PaperIdentifier,
    ) -> Result<PaperIdentifier, AggregatorError> {
        let title = match id {
            PaperIdentifier::RawQuery { value } => value.clone(),
            _ => self.get_details(id).await?.title,
        };
        if title.trim().is_empty() {
            return Err(AggregatorError::InvalidInput("empty identifier".to_string()));
        }

        tracing::debug!("Resolving {} on Semantic Scholar by title search", id);
        let query = SearchQuery::new(title).limit(1);
        let hits = self
            .call_source(
                source,
                Operation::Search,
                &query.query,
                &query.params_fingerprint(),
                || source.search(&query),
            )
            .await?;

        hits.into_iter()
            .find_map(|paper| {
                paper
                    .source_id(SourceKind::SemanticScholar)
                    .map(|value| PaperIdentifier::SemanticScholar {
                        value: value.to_string(),
                    })
            })
            .ok_or_else(|| SourceError::NotFound(format!("{} on Semantic Scholar", id)).into())
    }
}
