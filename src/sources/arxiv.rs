//! arXiv research source implementation.

use async_trait::async_trait;
use feed_rs::model::Entry;
use feed_rs::parser;

use crate::models::{
    collapse_whitespace, BibtexEntry, BibtexProvenance, PaperBuilder, PaperIdentifier,
    PaperRecord, SearchQuery, SourceKind,
};
use crate::resolver;
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::bibtex::parse_entry;
use crate::utils::HttpClient;

const ARXIV_API_BASE: &str = "https://export.arxiv.org";
const ARXIV_SITE_BASE: &str = "https://arxiv.org";

/// Largest page the export API is asked for
const MAX_RESULTS: usize = 100;

/// arXiv research source
///
/// Search and lookups go through the Atom export API; BibTeX comes from the
/// `arxiv.org/bibtex` endpoint.
#[derive(Debug, Clone)]
pub struct ArxivSource {
    http: HttpClient,
    api_url: String,
    site_url: String,
}

impl ArxivSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            api_url: ARXIV_API_BASE.to_string(),
            site_url: ARXIV_SITE_BASE.to_string(),
        }
    }

    /// Point both the export API and the site endpoints at one host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        self.api_url = base.clone();
        self.site_url = base;
        self
    }

    /// The versionless arXiv id this identifier addresses
    fn arxiv_id(id: &PaperIdentifier) -> Result<String, SourceError> {
        match id {
            PaperIdentifier::Arxiv { value, .. } => Ok(value.clone()),
            PaperIdentifier::Doi { value } => resolver::arxiv_id_from_doi(value).ok_or_else(|| {
                SourceError::InvalidRequest(format!("{} is not an arXiv-issued DOI", value))
            }),
            other => Err(SourceError::InvalidRequest(format!(
                "arXiv cannot look up {} identifiers",
                other.type_name()
            ))),
        }
    }

    /// Build the `search_query` expression for a search
    fn build_search_query(query: &SearchQuery) -> String {
        let mut parts = vec![format!("all:{}", query.query.trim())];

        if query.year_from.is_some() || query.year_to.is_some() {
            let from = query.year_from.map_or(1991, |y| y.max(1991));
            let to = query.year_to.map_or(9999, |y| y.min(9999));
            parts.push(format!(
                "submittedDate:[{}01010000 TO {}12312359]",
                from, to
            ));
        }

        parts.join(" AND ")
    }

    async fn query_feed(&self, params: &[(&str, String)]) -> Result<Vec<PaperRecord>, SourceError> {
        let url = format!("{}/api/query", self.api_url);
        let body = self
            .http
            .get_text(&url, params, &[("Accept", "application/atom+xml".to_string())])
            .await?;

        let feed = parser::parse(body.as_bytes())
            .map_err(|e| SourceError::Malformed(format!("arXiv Atom feed: {}", e)))?;

        Ok(feed.entries.iter().filter_map(parse_feed_entry).collect())
    }
}

/// Id, version stripped, from an entry id like `http://arxiv.org/abs/1706.03762v5`
fn entry_arxiv_id(entry_id: &str) -> Option<String> {
    let raw = entry_id
        .split_once("/abs/")
        .map_or(entry_id, |(_, rest)| rest)
        .trim();
    if raw.is_empty() {
        return None;
    }
    Some(resolver::strip_arxiv_version(raw).0)
}

fn parse_feed_entry(entry: &Entry) -> Option<PaperRecord> {
    let arxiv_id = entry_arxiv_id(&entry.id)?;
    let title = entry
        .title
        .as_ref()
        .map(|t| collapse_whitespace(&t.content))
        .filter(|t| !t.is_empty())?;

    // The export API reports failures as an entry titled "Error"
    if title == "Error" && entry.authors.is_empty() {
        return None;
    }

    let pdf_url = entry
        .links
        .iter()
        .find(|l| l.media_type.as_deref() == Some("application/pdf"))
        .map(|l| l.href.clone())
        .unwrap_or_else(|| format!("https://arxiv.org/pdf/{}", arxiv_id));
    let doi = entry
        .links
        .iter()
        .find(|l| l.title.as_deref() == Some("doi"))
        .map(|l| l.href.clone());
    let published = entry
        .published
        .map(|date| date.format("%Y-%m-%d").to_string());

    Some(
        PaperBuilder::new(title, SourceKind::Arxiv, arxiv_id.clone())
            .author_names(entry.authors.iter().map(|a| collapse_whitespace(&a.name)))
            .published_date(published.as_deref())
            .arxiv_id(Some(arxiv_id.clone()))
            .doi(doi)
            .abstract_text(entry.summary.as_ref().map(|s| collapse_whitespace(&s.content)))
            .url(Some(format!("https://arxiv.org/abs/{}", arxiv_id)))
            .pdf_url(Some(pdf_url))
            .build(),
    )
}

#[async_trait]
impl Source for ArxivSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Arxiv
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
            | SourceCapabilities::DETAILS
            | SourceCapabilities::BIBTEX
            | SourceCapabilities::AUTHOR_SEARCH
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PaperRecord>, SourceError> {
        let params = [
            ("search_query", Self::build_search_query(query)),
            ("start", query.offset.to_string()),
            ("max_results", query.limit.clamp(1, MAX_RESULTS).to_string()),
            ("sortBy", "relevance".to_string()),
        ];
        let mut papers = self.query_feed(&params).await?;
        if query.has_filters() {
            papers.retain(|p| query.matches(p));
        }
        Ok(papers)
    }

    async fn get_details(&self, id: &PaperIdentifier) -> Result<PaperRecord, SourceError> {
        let arxiv_id = Self::arxiv_id(id)?;
        let params = [("id_list", arxiv_id.clone()), ("max_results", "1".to_string())];
        self.query_feed(&params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::NotFound(format!("arXiv:{}", arxiv_id)))
    }

    async fn get_bibtex(&self, id: &PaperIdentifier) -> Result<BibtexEntry, SourceError> {
        let arxiv_id = Self::arxiv_id(id)?;
        let url = format!("{}/bibtex/{}", self.site_url, arxiv_id);
        let body = self.http.get_text(&url, &[], &[]).await?;
        if body.trim().is_empty() {
            return Err(SourceError::NotFound(format!("BibTeX for arXiv:{}", arxiv_id)));
        }
        parse_entry(&body, BibtexProvenance::Arxiv)
    }

    async fn search_author(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        let params = [
            ("search_query", format!("au:\"{}\"", name.trim())),
            ("max_results", limit.clamp(1, MAX_RESULTS).to_string()),
            ("sortBy", "submittedDate".to_string()),
            ("sortOrder", "descending".to_string()),
        ];
        self.query_feed(&params).await
    }
}
