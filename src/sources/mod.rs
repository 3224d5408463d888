//! Catalog clients behind a capability-checked trait.
//!
//! Each catalog (OpenAlex, DBLP, CrossRef, Semantic Scholar, arXiv) implements
//! [`Source`] and declares a static [`SourceCapabilities`] set. The aggregator
//! checks capabilities before dispatch; calling an operation a source does not
//! declare returns [`SourceError::Unsupported`] from the default trait method.
//!
//! Capability matrix:
//!
//! | source   | search | details | bibtex | citations | references | author | related |
//! |----------|--------|---------|--------|-----------|------------|--------|---------|
//! | OpenAlex | yes    | yes     |        | yes       | yes        | yes    |         |
//! | DBLP     | yes    | yes     | yes    |           |            | yes    |         |
//! | CrossRef | yes    | yes     | yes    |           |            | yes    |         |
//! | S2       | yes    | yes     | yes    |           |            | yes    | yes     |
//! | arXiv    | yes    | yes     | yes    |           |            | yes    |         |
//!
//! Every HTTP-backed client owns a [`crate::utils::HttpClient`], which applies the
//! source's rate limiter and retry policy to each request.

mod arxiv;
mod crossref;
mod dblp;
mod openalex;
mod registry;
mod semantic;

pub mod mock;

pub use arxiv::ArxivSource;
pub use crossref::CrossRefSource;
pub use dblp::DblpSource;
pub use mock::MockSource;
pub use openalex::OpenAlexSource;
pub use registry::{Operation, SourceCapabilities, SourceRegistry};
pub use semantic::SemanticScholarSource;

use async_trait::async_trait;
use std::time::Duration;

use crate::models::{BibtexEntry, PaperIdentifier, PaperRecord, SearchQuery, SourceKind};

/// A bibliographic catalog client
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Which catalog this client talks to
    fn kind(&self) -> SourceKind;

    /// Human-readable name of this source
    fn name(&self) -> &str {
        self.kind().name()
    }

    /// Static capability declaration
    fn capabilities(&self) -> SourceCapabilities;

    fn supports(&self, operation: Operation) -> bool {
        self.capabilities().contains(operation.capability())
    }

    /// The error every undeclared operation returns
    fn unsupported(&self, operation: Operation) -> SourceError {
        SourceError::Unsupported {
            operation,
            source_kind: self.kind(),
        }
    }

    /// Free-text search, bounded by `query.limit` and honoring `query.offset`
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<PaperRecord>, SourceError> {
        Err(self.unsupported(Operation::Search))
    }

    /// Look up a single paper
    async fn get_details(&self, _id: &PaperIdentifier) -> Result<PaperRecord, SourceError> {
        Err(self.unsupported(Operation::Details))
    }

    /// Native BibTeX for a paper
    async fn get_bibtex(&self, _id: &PaperIdentifier) -> Result<BibtexEntry, SourceError> {
        Err(self.unsupported(Operation::Bibtex))
    }

    /// Papers that cite the given paper
    async fn get_citations(
        &self,
        _id: &PaperIdentifier,
        _limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        Err(self.unsupported(Operation::Citations))
    }

    /// Papers the given paper cites
    async fn get_references(
        &self,
        _id: &PaperIdentifier,
        _limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        Err(self.unsupported(Operation::References))
    }

    /// Papers by an author
    async fn search_author(
        &self,
        _name: &str,
        _limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        Err(self.unsupported(Operation::AuthorSearch))
    }

    /// Recommendations for a paper
    async fn get_related(
        &self,
        _id: &PaperIdentifier,
        _limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        Err(self.unsupported(Operation::Related))
    }
}

/// Errors that can occur when interacting with a source
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Paper not found
    #[error("Paper not found: {0}")]
    NotFound(String),

    /// The source does not offer this operation
    #[error("{operation} is not supported by {source_kind}")]
    Unsupported {
        operation: Operation,
        source_kind: SourceKind,
    },

    /// Rate limit exceeded, locally or by the server
    #[error("Rate limit exceeded{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure, timeout or 5xx response
    #[error("Transient error: {0}")]
    Transient(String),

    /// Response could not be parsed
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Permanent 4xx, or input the source cannot address
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (retry after {:.1}s)", wait.as_secs_f64()),
        None => String::new(),
    }
}

impl SourceError {
    /// Whether the retry loop should try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::RateLimited { .. } | SourceError::Transient(_)
        )
    }

    /// Stable snake_case name of the variant, used in tool output
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::NotFound(_) => "not_found",
            SourceError::Unsupported { .. } => "unsupported",
            SourceError::RateLimited { .. } => "rate_limited",
            SourceError::Transient(_) => "transient",
            SourceError::Malformed(_) => "malformed",
            SourceError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Malformed(err.to_string())
        } else {
            SourceError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Malformed(format!("JSON: {}", err))
    }
}

impl From<quick_xml::DeError> for SourceError {
    fn from(err: quick_xml::DeError) -> Self {
        SourceError::Malformed(format!("XML: {}", err))
    }
}
