//! Canonical paper record that every source response is translated into.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// The catalog a record (or part of a record) came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "openalex")]
    OpenAlex,
    #[serde(rename = "dblp")]
    Dblp,
    #[serde(rename = "crossref")]
    CrossRef,
    #[serde(rename = "semantic")]
    SemanticScholar,
    #[serde(rename = "arxiv")]
    Arxiv,
}

impl SourceKind {
    /// All supported catalogs, in default priority order
    pub const ALL: [SourceKind; 5] = [
        SourceKind::OpenAlex,
        SourceKind::Dblp,
        SourceKind::CrossRef,
        SourceKind::SemanticScholar,
        SourceKind::Arxiv,
    ];

    /// Returns the display name of the source
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::OpenAlex => "OpenAlex",
            SourceKind::Dblp => "DBLP",
            SourceKind::CrossRef => "CrossRef",
            SourceKind::SemanticScholar => "Semantic Scholar",
            SourceKind::Arxiv => "arXiv",
        }
    }

    /// Returns the source identifier (used in config, tool arguments and cache keys)
    pub fn id(&self) -> &'static str {
        match self {
            SourceKind::OpenAlex => "openalex",
            SourceKind::Dblp => "dblp",
            SourceKind::CrossRef => "crossref",
            SourceKind::SemanticScholar => "semantic",
            SourceKind::Arxiv => "arxiv",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "openalex" | "open_alex" => Ok(SourceKind::OpenAlex),
            "dblp" => Ok(SourceKind::Dblp),
            "crossref" | "cross_ref" => Ok(SourceKind::CrossRef),
            "semantic" | "semantic_scholar" | "s2" => Ok(SourceKind::SemanticScholar),
            "arxiv" => Ok(SourceKind::Arxiv),
            other => Err(format!("Unknown source '{}'", other)),
        }
    }
}

/// A paper author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affiliation: None,
            orcid: None,
        }
    }

    pub fn with_affiliation(mut self, affiliation: impl Into<String>) -> Self {
        let affiliation = affiliation.into();
        if !affiliation.trim().is_empty() {
            self.affiliation = Some(affiliation);
        }
        self
    }

    /// Last name, handling both "First Last" and "Last, First" spellings
    pub fn last_name(&self) -> &str {
        if let Some((last, _)) = self.name.split_once(',') {
            return last.trim();
        }
        self.name.split_whitespace().last().unwrap_or("")
    }

    /// Given names, handling both "First Last" and "Last, First" spellings
    pub fn given_names(&self) -> String {
        if let Some((_, first)) = self.name.split_once(',') {
            return first.trim().to_string();
        }
        let words: Vec<&str> = self.name.split_whitespace().collect();
        match words.split_last() {
            Some((_, rest)) => rest.join(" "),
            None => String::new(),
        }
    }
}

/// A research paper in canonical form
///
/// `source_ids` always holds at least one entry: the catalog that produced the
/// record. Records merged across catalogs carry every contributing native id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Paper title
    pub title: String,

    /// Authors in byline order
    #[serde(default)]
    pub authors: Vec<Author>,

    /// Publication year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    /// Full publication date when the source reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<NaiveDate>,

    /// Journal, proceedings or repository name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,

    /// Digital Object Identifier (lower-cased, no resolver prefix)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,

    /// arXiv identifier without version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,

    /// Native identifier of this paper in every catalog that returned it
    pub source_ids: BTreeMap<SourceKind, String>,

    /// Abstract text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#abstract: Option<String>,

    /// Citation count as reported by the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u32>,

    /// Landing page URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Direct PDF URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,

    /// Native BibTeX text, only when the source produced one itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_bibtex: Option<String>,

    /// Source-provided relevance score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

impl PaperRecord {
    /// Create a record with the required fields
    pub fn new(title: impl Into<String>, source: SourceKind, native_id: impl Into<String>) -> Self {
        let mut source_ids = BTreeMap::new();
        source_ids.insert(source, native_id.into());
        Self {
            title: title.into(),
            authors: Vec::new(),
            year: None,
            published_date: None,
            venue: None,
            volume: None,
            issue: None,
            pages: None,
            doi: None,
            arxiv_id: None,
            source_ids,
            r#abstract: None,
            citation_count: None,
            url: None,
            pdf_url: None,
            raw_bibtex: None,
            relevance: None,
        }
    }

    /// The catalog with the highest priority among those that returned this record
    pub fn primary_source(&self, priority: &[SourceKind]) -> Option<SourceKind> {
        priority
            .iter()
            .copied()
            .find(|kind| self.source_ids.contains_key(kind))
            .or_else(|| self.source_ids.keys().next().copied())
    }

    /// Native id of this paper in the given catalog
    pub fn source_id(&self, source: SourceKind) -> Option<&str> {
        self.source_ids.get(&source).map(String::as_str)
    }

    /// Returns the author names as a vector
    pub fn author_names(&self) -> Vec<&str> {
        self.authors.iter().map(|a| a.name.as_str()).collect()
    }

    /// Number of populated optional fields, used to rank completeness
    pub fn completeness(&self) -> usize {
        [
            !self.authors.is_empty(),
            self.year.is_some(),
            self.published_date.is_some(),
            self.venue.is_some(),
            self.volume.is_some(),
            self.issue.is_some(),
            self.pages.is_some(),
            self.doi.is_some(),
            self.arxiv_id.is_some(),
            self.r#abstract.is_some(),
            self.citation_count.is_some(),
            self.url.is_some(),
            self.pdf_url.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// Builder for constructing PaperRecord values inside source adapters
#[derive(Debug, Clone)]
pub struct PaperBuilder {
    paper: PaperRecord,
}

/// Empty strings from upstream JSON count as missing
fn non_empty<S: Into<String>>(value: S) -> Option<String> {
    let value = value.into();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

impl PaperBuilder {
    /// Create a new builder with required fields
    pub fn new(title: impl Into<String>, source: SourceKind, native_id: impl Into<String>) -> Self {
        let title: String = title.into();
        Self {
            paper: PaperRecord::new(collapse_whitespace(&title), source, native_id),
        }
    }

    pub fn authors(mut self, authors: Vec<Author>) -> Self {
        self.paper.authors = authors
            .into_iter()
            .filter(|a| !a.name.trim().is_empty())
            .collect();
        self
    }

    pub fn author_names<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let authors = names.into_iter().map(|n| Author::new(n)).collect();
        self.authors(authors)
    }

    pub fn year(mut self, year: Option<i32>) -> Self {
        self.paper.year = year.filter(|y| *y > 0);
        self
    }

    /// Set the publication date from an ISO `YYYY-MM-DD` string (ignored when unparsable)
    pub fn published_date(mut self, date: Option<&str>) -> Self {
        if let Some(parsed) = date.and_then(parse_date) {
            self.paper.published_date = Some(parsed);
            if self.paper.year.is_none() {
                self.paper.year = Some(chrono::Datelike::year(&parsed));
            }
        }
        self
    }

    pub fn venue(mut self, venue: Option<impl Into<String>>) -> Self {
        self.paper.venue = venue.and_then(non_empty);
        self
    }

    pub fn volume(mut self, volume: Option<impl Into<String>>) -> Self {
        self.paper.volume = volume.and_then(non_empty);
        self
    }

    pub fn issue(mut self, issue: Option<impl Into<String>>) -> Self {
        self.paper.issue = issue.and_then(non_empty);
        self
    }

    pub fn pages(mut self, pages: Option<impl Into<String>>) -> Self {
        self.paper.pages = pages.and_then(non_empty);
        self
    }

    /// Set DOI, stripping resolver prefixes
    pub fn doi(mut self, doi: Option<impl Into<String>>) -> Self {
        self.paper.doi = doi
            .and_then(non_empty)
            .map(|d| crate::resolver::normalize_doi(&d));
        self
    }

    pub fn arxiv_id(mut self, arxiv_id: Option<impl Into<String>>) -> Self {
        self.paper.arxiv_id = arxiv_id
            .and_then(non_empty)
            .map(|id| crate::resolver::strip_arxiv_version(&id).0);
        self
    }

    /// Record the native id of this paper in another catalog
    pub fn source_id(mut self, source: SourceKind, id: impl Into<String>) -> Self {
        if let Some(id) = non_empty(id) {
            self.paper.source_ids.insert(source, id);
        }
        self
    }

    pub fn abstract_text(mut self, text: Option<impl Into<String>>) -> Self {
        self.paper.r#abstract = text
            .and_then(non_empty)
            .map(|t| collapse_whitespace(&t));
        self
    }

    pub fn citations(mut self, count: Option<u32>) -> Self {
        self.paper.citation_count = count;
        self
    }

    pub fn url(mut self, url: Option<impl Into<String>>) -> Self {
        self.paper.url = url.and_then(non_empty);
        self
    }

    pub fn pdf_url(mut self, url: Option<impl Into<String>>) -> Self {
        self.paper.pdf_url = url.and_then(non_empty);
        self
    }

    pub fn raw_bibtex(mut self, bibtex: Option<impl Into<String>>) -> Self {
        self.paper.raw_bibtex = bibtex.and_then(non_empty);
        self
    }

    pub fn relevance(mut self, score: Option<f64>) -> Self {
        self.paper.relevance = score.filter(|s| s.is_finite());
        self
    }

    /// Build the PaperRecord
    pub fn build(self) -> PaperRecord {
        self.paper
    }
}

/// Parse `YYYY-MM-DD`, `YYYY-MM` or RFC 3339 timestamps
pub(crate) fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(ts.date_naive());
    }
    NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d").ok()
}

/// Source titles and abstracts often contain hard line breaks
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
