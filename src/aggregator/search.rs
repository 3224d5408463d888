//! Concurrent fan-out with failure isolation, deduplication and ranking.

use futures_util::future::join_all;
use serde::Serialize;
use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use super::{Aggregator, AggregatorError, SourceFailure};
use crate::models::{PaperRecord, SearchQuery, SortBy, SourceKind};
use crate::sources::{Operation, Source, SourceError};
use crate::utils::{deduplicate_by, merge_records};

/// Merged answer of a multi-source operation
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResults {
    pub papers: Vec<PaperRecord>,
    /// Sources that answered, in priority order
    pub succeeded: Vec<SourceKind>,
    /// Sources that failed or timed out
    pub failures: Vec<SourceFailure>,
}

impl AggregatedResults {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// A record plus the ranking facts gathered before merging
#[derive(Debug)]
struct Ranked {
    paper: PaperRecord,
    /// Best position across the source lists it appeared in
    position: usize,
    /// Source score scaled to 0..=1 within its own result list
    score: Option<f64>,
}

impl Aggregator {
    /// Search every capable source (or the caller's subset) and merge the results
    pub async fn search(&self, query: &SearchQuery) -> Result<AggregatedResults, AggregatorError> {
        if query.query.trim().is_empty() {
            return Err(AggregatorError::InvalidInput("search query is empty".to_string()));
        }
        let mut query = query.clone();
        query.limit = query.limit.clamp(1, crate::models::MAX_LIMIT);

        let candidates = self.candidates(Operation::Search, query.sources.as_deref())?;
        let params = query.params_fingerprint();

        let outcome = self
            .fan_out(Operation::Search, candidates, |source| {
                let query = &query;
                let params = &params;
                async move {
                    self.call_source(&source, Operation::Search, &query.query, params, || {
                        source.search(query)
                    })
                    .await
                }
            })
            .await?;

        Ok(self.merge(outcome, query.sort, query.limit))
    }

    /// Papers by an author from every capable source, merged like a search
    pub async fn search_author(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<AggregatedResults, AggregatorError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AggregatorError::InvalidInput("author name is empty".to_string()));
        }
        let limit = limit.clamp(1, crate::models::MAX_LIMIT);
        let candidates = self.candidates(Operation::AuthorSearch, None)?;
        let params = format!("limit={}", limit);

        let outcome = self
            .fan_out(Operation::AuthorSearch, candidates, |source| {
                let params = &params;
                async move {
                    self.call_source(&source, Operation::AuthorSearch, name, params, || {
                        source.search_author(name, limit)
                    })
                    .await
                }
            })
            .await?;

        Ok(self.merge(outcome, SortBy::Relevance, limit))
    }

    /// Registered sources that declare `operation`, optionally restricted to `subset`
    fn candidates(
        &self,
        operation: Operation,
        subset: Option<&[SourceKind]>,
    ) -> Result<Vec<Arc<dyn Source>>, AggregatorError> {
        let mut sources: Vec<Arc<dyn Source>> = self
            .registry
            .supporting(operation)
            .into_iter()
            .filter(|s| subset.map_or(true, |kinds| kinds.contains(&s.kind())))
            .collect();
        sources.sort_by_key(|s| self.priority_rank(s.kind()));

        if sources.is_empty() {
            return Err(AggregatorError::InvalidInput(match subset {
                Some(kinds) => format!(
                    "none of the requested sources ({}) supports {}",
                    kinds.iter().map(|k| k.id()).collect::<Vec<_>>().join(", "),
                    operation
                ),
                None => format!("no configured source supports {}", operation),
            }));
        }
        Ok(sources)
    }

    /// Call every source concurrently; keep what answers within the overall bound
    ///
    /// Fails only when every candidate fails.
    async fn fan_out<F, Fut>(
        &self,
        operation: Operation,
        sources: Vec<Arc<dyn Source>>,
        call: F,
    ) -> Result<FanOut, AggregatorError>
    where
        F: Fn(Arc<dyn Source>) -> Fut,
        Fut: Future<Output = Result<Vec<PaperRecord>, SourceError>>,
    {
        let deadline = tokio::time::Instant::now() + self.overall_timeout;
        let overall = self.overall_timeout;

        let calls = sources.into_iter().map(|source| {
            let kind = source.kind();
            let pending = call(source);
            async move {
                let result = match tokio::time::timeout_at(deadline, pending).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Transient(format!(
                        "{} did not answer within the overall {:.1}s bound",
                        kind,
                        overall.as_secs_f64()
                    ))),
                };
                (kind, result)
            }
        });

        let mut outcome = FanOut::default();
        for (kind, result) in join_all(calls).await {
            match result {
                Ok(papers) => {
                    tracing::debug!("{} returned {} results for {}", kind, papers.len(), operation);
                    outcome.answered.push((kind, papers));
                }
                Err(e) => {
                    tracing::warn!("{} failed on {}: {}", operation, kind, e);
                    outcome.failures.push(SourceFailure::new(kind, e));
                }
            }
        }

        if outcome.answered.is_empty() {
            return Err(AggregatorError::AllSourcesFailed {
                operation,
                failures: outcome.failures,
            });
        }
        Ok(outcome)
    }

    /// Deduplicate across sources, sort by `sort` and keep the first `limit`
    fn merge(&self, outcome: FanOut, sort: SortBy, limit: usize) -> AggregatedResults {
        let FanOut {
            mut answered,
            failures,
        } = outcome;
        answered.sort_by_key(|(kind, _)| self.priority_rank(*kind));
        let succeeded = answered.iter().map(|(kind, _)| *kind).collect();

        let mut items = Vec::new();
        for (_, papers) in answered {
            let best = papers
                .iter()
                .filter_map(|p| p.relevance)
                .fold(None, |max: Option<f64>, s| Some(max.map_or(s, |m| m.max(s))));
            for (position, paper) in papers.into_iter().enumerate() {
                let score = match (paper.relevance, best) {
                    (Some(s), Some(b)) if b > 0.0 => Some(s / b),
                    (Some(_), _) => Some(0.0),
                    (None, _) => None,
                };
                items.push(Ranked {
                    paper,
                    position,
                    score,
                });
            }
        }

        let mut merged = deduplicate_by(
            items,
            |item| &item.paper,
            |kept, dup| {
                merge_records(&mut kept.paper, dup.paper);
                kept.position = kept.position.min(dup.position);
                kept.score = match (kept.score, dup.score) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            },
        );

        merged.sort_by(|a, b| self.compare(a, b, sort));

        AggregatedResults {
            papers: merged.into_iter().take(limit).map(|r| r.paper).collect(),
            succeeded,
            failures,
        }
    }

    fn compare(&self, a: &Ranked, b: &Ranked, sort: SortBy) -> Ordering {
        let primary = match sort {
            SortBy::Relevance => a
                .position
                .cmp(&b.position)
                .then_with(|| descending_option(a.score, b.score)),
            SortBy::Date => {
                let key = |r: &Ranked| (r.paper.year, r.paper.published_date);
                match (key(a), key(b)) {
                    ((None, _), (None, _)) => Ordering::Equal,
                    ((None, _), _) => Ordering::Greater,
                    (_, (None, _)) => Ordering::Less,
                    (ka, kb) => kb.cmp(&ka),
                }
            }
            SortBy::Citations => descending_option(
                a.paper.citation_count.map(f64::from),
                b.paper.citation_count.map(f64::from),
            ),
        };

        primary
            .then_with(|| self.source_rank(&a.paper).cmp(&self.source_rank(&b.paper)))
            .then_with(|| a.paper.title.to_lowercase().cmp(&b.paper.title.to_lowercase()))
    }

    fn source_rank(&self, paper: &PaperRecord) -> usize {
        paper
            .primary_source(&self.priority)
            .map_or(usize::MAX, |kind| self.priority_rank(kind))
    }
}

/// Larger values first, missing values last
fn descending_option(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Default)]
struct FanOut {
    answered: Vec<(SourceKind, Vec<PaperRecord>)>,
    failures: Vec<SourceFailure>,
}
