//! # Research Aggregator
//!
//! A library and Model Context Protocol (MCP) server that searches, resolves
//! and cites academic papers across OpenAlex, DBLP, CrossRef, Semantic Scholar
//! and arXiv.
//!
//! ## Architecture
//!
//! - [`models`]: Paper records, identifiers, BibTeX entries and citation graphs
//! - [`resolver`]: Identifier classification and normalization
//! - [`sources`]: One client per catalog behind the [`Source`] trait
//! - [`aggregator`]: Fan-out search, merging, BibTeX cascade and citation traversal
//! - [`mcp`]: MCP tools and server
//! - [`utils`]: HTTP client, response cache, rate limiting, deduplication and BibTeX helpers
//! - [`config`]: Configuration management
//! - [`ui`]: Terminal output for the CLI

pub mod aggregator;
pub mod config;
pub mod mcp;
pub mod models;
pub mod resolver;
pub mod sources;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use aggregator::{Aggregator, AggregatorError};
pub use models::{PaperIdentifier, PaperRecord, SourceKind};
pub use sources::{Source, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
