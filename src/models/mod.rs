//! Core data models for papers, identifiers, BibTeX entries and citation graphs.

mod bibtex;
mod citation;
mod identifier;
mod paper;
mod search;

pub use bibtex::{BibtexEntry, BibtexField, BibtexProvenance};
pub use citation::{CitationEdge, CitationGraph, EdgeRejection, GraphNode, NetworkDirection};
pub use identifier::PaperIdentifier;
pub use paper::{Author, PaperBuilder, PaperRecord, SourceKind};
pub(crate) use paper::{collapse_whitespace, parse_date};
pub use search::{SearchQuery, SortBy, DEFAULT_LIMIT, MAX_LIMIT};
