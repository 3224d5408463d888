//! Configurable in-memory source for tests.
//!
//! [`MockSource`] answers every operation from canned data keyed by the
//! normalized identifier, counts calls per operation and can be told to fail
//! or to stall. It lets aggregator behavior be tested without a network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::models::{BibtexEntry, PaperBuilder, PaperIdentifier, PaperRecord, SearchQuery, SourceKind};
use crate::resolver;
use crate::sources::{Operation, Source, SourceCapabilities, SourceError};

/// A fake catalog that returns predefined responses
#[derive(Debug)]
pub struct MockSource {
    kind: SourceKind,
    capabilities: SourceCapabilities,
    delay: Option<Duration>,
    search_results: Vec<PaperRecord>,
    author_results: Vec<PaperRecord>,
    papers: HashMap<String, PaperRecord>,
    bibtex: HashMap<String, BibtexEntry>,
    citations: HashMap<String, Vec<PaperRecord>>,
    references: HashMap<String, Vec<PaperRecord>>,
    related: HashMap<String, Vec<PaperRecord>>,
    failures: HashMap<Operation, SourceError>,
    calls: Mutex<HashMap<Operation, usize>>,
}

impl MockSource {
    /// A mock that declares search, details and author search
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            capabilities: SourceCapabilities::SEARCH
                | SourceCapabilities::DETAILS
                | SourceCapabilities::AUTHOR_SEARCH,
            delay: None,
            search_results: Vec::new(),
            author_results: Vec::new(),
            papers: HashMap::new(),
            bibtex: HashMap::new(),
            citations: HashMap::new(),
            references: HashMap::new(),
            related: HashMap::new(),
            failures: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: SourceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sleep this long before answering any call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_search_results(mut self, papers: Vec<PaperRecord>) -> Self {
        self.search_results = papers;
        self
    }

    pub fn with_author_results(mut self, papers: Vec<PaperRecord>) -> Self {
        self.author_results = papers;
        self
    }

    /// Answer details lookups for `id` (any form [`resolver::classify`] accepts)
    pub fn with_paper(mut self, id: &str, paper: PaperRecord) -> Self {
        self.papers.insert(lookup_key(id), paper);
        self
    }

    pub fn with_bibtex(mut self, id: &str, entry: BibtexEntry) -> Self {
        self.bibtex.insert(lookup_key(id), entry);
        self
    }

    pub fn with_citations(mut self, id: &str, citing: Vec<PaperRecord>) -> Self {
        self.citations.insert(lookup_key(id), citing);
        self
    }

    pub fn with_references(mut self, id: &str, cited: Vec<PaperRecord>) -> Self {
        self.references.insert(lookup_key(id), cited);
        self
    }

    pub fn with_related(mut self, id: &str, related: Vec<PaperRecord>) -> Self {
        self.related.insert(lookup_key(id), related);
        self
    }

    /// Fail every call of `operation` with `error`
    pub fn failing(mut self, operation: Operation, error: SourceError) -> Self {
        self.failures.insert(operation, error);
        self
    }

    /// How many times `operation` has been called
    pub fn calls(&self, operation: Operation) -> usize {
        self.counters().get(&operation).copied().unwrap_or(0)
    }

    /// Total calls across all operations
    pub fn total_calls(&self) -> usize {
        self.counters().values().sum()
    }

    fn counters(&self) -> MutexGuard<'_, HashMap<Operation, usize>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count the call, wait out the delay and apply any configured failure
    async fn enter(&self, operation: Operation) -> Result<(), SourceError> {
        *self.counters().entry(operation).or_insert(0) += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.get(&operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn lookup<'a, T>(
        &self,
        table: &'a HashMap<String, T>,
        id: &PaperIdentifier,
    ) -> Result<&'a T, SourceError> {
        table
            .get(&resolver::normalize(id).key())
            .ok_or_else(|| SourceError::NotFound(format!("{} on {}", id, self.kind)))
    }
}

fn lookup_key(id: &str) -> String {
    resolver::classify(id).key()
}

/// A minimal record whose only metadata is a title, a year and the native id
pub fn make_paper(kind: SourceKind, native_id: &str, title: &str, year: i32) -> PaperRecord {
    PaperBuilder::new(title, kind, native_id)
        .year(Some(year))
        .build()
}

#[async_trait]
impl Source for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PaperRecord>, SourceError> {
        self.enter(Operation::Search).await?;
        Ok(self
            .search_results
            .iter()
            .filter(|p| query.matches(p))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn get_details(&self, id: &PaperIdentifier) -> Result<PaperRecord, SourceError> {
        self.enter(Operation::Details).await?;
        self.lookup(&self.papers, id).cloned()
    }

    async fn get_bibtex(&self, id: &PaperIdentifier) -> Result<BibtexEntry, SourceError> {
        self.enter(Operation::Bibtex).await?;
        self.lookup(&self.bibtex, id).cloned()
    }

    async fn get_citations(
        &self,
        id: &PaperIdentifier,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        self.enter(Operation::Citations).await?;
        Ok(self
            .lookup(&self.citations, id)
            .map(|papers| papers.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_references(
        &self,
        id: &PaperIdentifier,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        self.enter(Operation::References).await?;
        Ok(self
            .lookup(&self.references, id)
            .map(|papers| papers.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn search_author(
        &self,
        _name: &str,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        self.enter(Operation::AuthorSearch).await?;
        Ok(self.author_results.iter().take(limit).cloned().collect())
    }

    async fn get_related(
        &self,
        id: &PaperIdentifier,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        self.enter(Operation::Related).await?;
        self.lookup(&self.related, id)
            .map(|papers| papers.iter().take(limit).cloned().collect())
    }
}
