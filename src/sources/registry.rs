//! Registry of configured catalog clients.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{
    arxiv::ArxivSource, crossref::CrossRefSource, dblp::DblpSource, openalex::OpenAlexSource,
    semantic::SemanticScholarSource, Source, SourceError,
};
use crate::config::Config;
use crate::models::SourceKind;
use crate::utils::HttpClient;

bitflags::bitflags! {
    /// Capabilities that a source can support
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceCapabilities: u32 {
        const SEARCH = 1 << 0;
        const DETAILS = 1 << 1;
        const BIBTEX = 1 << 2;
        const CITATIONS = 1 << 3;
        const REFERENCES = 1 << 4;
        const AUTHOR_SEARCH = 1 << 5;
        const RELATED = 1 << 6;
    }
}

/// A logical operation a source may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Search,
    Details,
    Bibtex,
    Citations,
    References,
    AuthorSearch,
    Related,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Search,
        Operation::Details,
        Operation::Bibtex,
        Operation::Citations,
        Operation::References,
        Operation::AuthorSearch,
        Operation::Related,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Search => "search",
            Operation::Details => "details",
            Operation::Bibtex => "bibtex",
            Operation::Citations => "citations",
            Operation::References => "references",
            Operation::AuthorSearch => "author_search",
            Operation::Related => "related",
        }
    }

    /// The capability flag a source must declare for this operation
    pub fn capability(&self) -> SourceCapabilities {
        match self {
            Operation::Search => SourceCapabilities::SEARCH,
            Operation::Details => SourceCapabilities::DETAILS,
            Operation::Bibtex => SourceCapabilities::BIBTEX,
            Operation::Citations => SourceCapabilities::CITATIONS,
            Operation::References => SourceCapabilities::REFERENCES,
            Operation::AuthorSearch => SourceCapabilities::AUTHOR_SEARCH,
            Operation::Related => SourceCapabilities::RELATED,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry for all configured sources, at most one client per catalog
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<SourceKind, Arc<dyn Source>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled source from configuration
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        let mut registry = Self::new();

        for kind in SourceKind::ALL {
            if !config.is_source_enabled(kind) {
                tracing::info!("Source {} disabled by configuration", kind);
                continue;
            }

            let http = HttpClient::from_config(kind, config)?;
            let base_url = config.source(kind).and_then(|s| s.base_url.clone());
            let email = config.contact.email.clone();

            let source: Arc<dyn Source> = match kind {
                SourceKind::OpenAlex => {
                    let mut source = OpenAlexSource::new(http, email);
                    if let Some(url) = base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
                SourceKind::Dblp => {
                    let mut source = DblpSource::new(http);
                    if let Some(url) = base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
                SourceKind::CrossRef => {
                    let mut source = CrossRefSource::new(http, email);
                    if let Some(url) = base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
                SourceKind::SemanticScholar => {
                    let mut source =
                        SemanticScholarSource::new(http, config.api_keys.semantic_scholar.clone());
                    if let Some(url) = base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
                SourceKind::Arxiv => {
                    let mut source = ArxivSource::new(http);
                    if let Some(url) = base_url {
                        source = source.with_base_url(url);
                    }
                    Arc::new(source)
                }
            };

            registry.register(source);
        }

        Ok(registry)
    }

    /// Register a source, replacing any existing client for the same catalog
    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.sources.insert(source.kind(), source);
    }

    /// Get a source by kind
    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn Source>> {
        self.sources.get(&kind)
    }

    /// Get a source by kind, failing with `Unsupported` when it is not configured
    pub fn get_required(
        &self,
        kind: SourceKind,
        operation: Operation,
    ) -> Result<&Arc<dyn Source>, SourceError> {
        self.get(kind).ok_or(SourceError::Unsupported {
            operation,
            source_kind: kind,
        })
    }

    /// Get all registered sources
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.values()
    }

    /// Get all registered kinds
    pub fn kinds(&self) -> impl Iterator<Item = SourceKind> + '_ {
        self.sources.keys().copied()
    }

    /// Get sources that support a specific operation
    pub fn supporting(&self, operation: Operation) -> Vec<Arc<dyn Source>> {
        self.all()
            .filter(|s| s.supports(operation))
            .cloned()
            .collect()
    }

    /// Check if a source is registered
    pub fn has(&self, kind: SourceKind) -> bool {
        self.sources.contains_key(&kind)
    }

    /// Get the number of registered sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceSettings;

    #[test]
    fn test_registry_from_default_config() {
        let registry = SourceRegistry::from_config(&Config::default()).unwrap();

        assert_eq!(registry.len(), 5);
        for kind in SourceKind::ALL {
            assert!(registry.has(kind), "{} should be registered", kind);
        }
    }

    #[test]
    fn test_disabled_source_is_skipped() {
        let mut config = Config::default();
        config.sources.push(SourceSettings::disabled(SourceKind::Arxiv));

        let registry = SourceRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(!registry.has(SourceKind::Arxiv));
        assert!(matches!(
            registry.get_required(SourceKind::Arxiv, Operation::Details),
            Err(SourceError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_capability_matrix() {
        let registry = SourceRegistry::from_config(&Config::default()).unwrap();

        let related: Vec<_> = registry
            .supporting(Operation::Related)
            .iter()
            .map(|s| s.kind())
            .collect();
        assert_eq!(related, vec![SourceKind::SemanticScholar]);

        let citations: Vec<_> = registry
            .supporting(Operation::Citations)
            .iter()
            .map(|s| s.kind())
            .collect();
        assert_eq!(citations, vec![SourceKind::OpenAlex]);

        let bibtex: Vec<_> = registry
            .supporting(Operation::Bibtex)
            .iter()
            .map(|s| s.kind())
            .collect();
        assert_eq!(
            bibtex,
            vec![
                SourceKind::Dblp,
                SourceKind::CrossRef,
                SourceKind::SemanticScholar,
                SourceKind::Arxiv
            ]
        );

        for operation in [Operation::Search, Operation::Details, Operation::AuthorSearch] {
            assert_eq!(registry.supporting(operation).len(), 5, "{}", operation);
        }
    }
}
