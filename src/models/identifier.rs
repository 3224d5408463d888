//! Typed paper identifiers.

use serde::{Deserialize, Serialize};

use super::SourceKind;

/// A classified and normalized paper identifier
///
/// Built by [`crate::resolver::classify`]; each variant carries its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaperIdentifier {
    /// DOI, lower-cased with no resolver prefix
    Doi { value: String },
    /// arXiv id without version; the version suffix (e.g. `v2`) is kept aside
    Arxiv {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// OpenAlex work id (`W...`)
    OpenAlex { value: String },
    /// Semantic Scholar 40-hex paper id
    SemanticScholar { value: String },
    /// DBLP record key (`conf/venue/Author00`)
    Dblp { value: String },
    /// Anything else, passed through as free text
    RawQuery { value: String },
}

impl PaperIdentifier {
    /// Canonical value without a type prefix
    pub fn value(&self) -> &str {
        match self {
            PaperIdentifier::Doi { value }
            | PaperIdentifier::Arxiv { value, .. }
            | PaperIdentifier::OpenAlex { value }
            | PaperIdentifier::SemanticScholar { value }
            | PaperIdentifier::Dblp { value }
            | PaperIdentifier::RawQuery { value } => value,
        }
    }

    /// Short lower-case name of the identifier type
    pub fn type_name(&self) -> &'static str {
        match self {
            PaperIdentifier::Doi { .. } => "doi",
            PaperIdentifier::Arxiv { .. } => "arxiv",
            PaperIdentifier::OpenAlex { .. } => "openalex",
            PaperIdentifier::SemanticScholar { .. } => "s2",
            PaperIdentifier::Dblp { .. } => "dblp",
            PaperIdentifier::RawQuery { .. } => "query",
        }
    }

    /// Type-prefixed canonical key, unique across identifier types
    ///
    /// Used for cache keys and the citation network's visited set.
    pub fn key(&self) -> String {
        format!("{}:{}", self.type_name(), self.value())
    }

    /// The catalog whose native id scheme this is, if any
    pub fn owning_source(&self) -> Option<SourceKind> {
        match self {
            PaperIdentifier::Arxiv { .. } => Some(SourceKind::Arxiv),
            PaperIdentifier::OpenAlex { .. } => Some(SourceKind::OpenAlex),
            PaperIdentifier::SemanticScholar { .. } => Some(SourceKind::SemanticScholar),
            PaperIdentifier::Dblp { .. } => Some(SourceKind::Dblp),
            PaperIdentifier::Doi { .. } | PaperIdentifier::RawQuery { .. } => None,
        }
    }

    pub fn doi(&self) -> Option<&str> {
        match self {
            PaperIdentifier::Doi { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_raw_query(&self) -> bool {
        matches!(self, PaperIdentifier::RawQuery { .. })
    }

    pub(crate) fn doi_of(value: impl Into<String>) -> Self {
        PaperIdentifier::Doi {
            value: value.into(),
        }
    }
}

impl std::fmt::Display for PaperIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaperIdentifier::Arxiv {
                value,
                version: Some(version),
            } => write!(f, "arXiv:{}{}", value, version),
            PaperIdentifier::Arxiv { value, .. } => write!(f, "arXiv:{}", value),
            PaperIdentifier::RawQuery { value } => write!(f, "\"{}\"", value),
            other => write!(f, "{}", other.key()),
        }
    }
}
