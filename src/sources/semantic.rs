//! Semantic Scholar research source implementation.

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{
    BibtexEntry, BibtexProvenance, PaperBuilder, PaperIdentifier, PaperRecord, SearchQuery,
    SourceKind,
};
use crate::resolver;
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::bibtex::parse_entry;
use crate::utils::HttpClient;

const SEMANTIC_API_BASE: &str = "https://api.semanticscholar.org";

/// Fields requested for every paper object
const PAPER_FIELDS: &str = "paperId,title,abstract,year,venue,authors,citationCount,externalIds,url,publicationDate,journal,openAccessPdf";

/// Largest page the graph and recommendations APIs return
const MAX_LIMIT: usize = 100;

/// Semantic Scholar research source
///
/// Uses the Graph API for search and lookups and the Recommendations API for
/// related papers. An API key raises the rate limit.
#[derive(Debug, Clone)]
pub struct SemanticScholarSource {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarSource {
    pub fn new(http: HttpClient, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: SEMANTIC_API_BASE.to_string(),
            api_key,
        }
    }

    /// Point the client at a different host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn graph_url(&self, endpoint: &str) -> String {
        format!("{}/graph/v1{}", self.base_url, endpoint)
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        match self.api_key {
            Some(ref key) => vec![("x-api-key", key.clone())],
            None => Vec::new(),
        }
    }

    /// Path segment the Graph API accepts for this identifier
    fn lookup_id(id: &PaperIdentifier) -> Result<String, SourceError> {
        match id {
            PaperIdentifier::SemanticScholar { value } => Ok(value.clone()),
            PaperIdentifier::Arxiv { value, .. } => Ok(format!("ARXIV:{}", value)),
            PaperIdentifier::Doi { value } => Ok(match resolver::arxiv_id_from_doi(value) {
                Some(arxiv) => format!("ARXIV:{}", arxiv),
                None => format!("DOI:{}", value),
            }),
            other => Err(SourceError::InvalidRequest(format!(
                "Semantic Scholar cannot look up {} identifiers",
                other.type_name()
            ))),
        }
    }

    async fn fetch_paper(&self, id: &PaperIdentifier, fields: &str) -> Result<S2Paper, SourceError> {
        let url = self.graph_url(&format!("/paper/{}", Self::lookup_id(id)?));
        self.http
            .get_json(&url, &[("fields", fields.to_string())], &self.headers())
            .await
    }

    /// The 40-hex paper id, looking it up when the identifier is not one
    async fn paper_id(&self, id: &PaperIdentifier) -> Result<String, SourceError> {
        if let PaperIdentifier::SemanticScholar { value } = id {
            return Ok(value.clone());
        }
        self.fetch_paper(id, "paperId")
            .await?
            .paper_id
            .ok_or_else(|| SourceError::NotFound(format!("{} on Semantic Scholar", id)))
    }
}

/// Semantic Scholar writes publication types as a list (`@['JournalArticle', 'Conference']{`)
fn plain_entry_type(bibtex: &str) -> String {
    let trimmed = bibtex.trim_start();
    let Some(list) = trimmed.strip_prefix("@[") else {
        return bibtex.to_string();
    };
    let Some((types, rest)) = list.split_once(']') else {
        return bibtex.to_string();
    };
    let entry_type = if types.contains("Conference") {
        "inproceedings"
    } else if types.contains("JournalArticle") || types.contains("Review") {
        "article"
    } else {
        "misc"
    };
    format!("@{}{}", entry_type, rest)
}

fn parse_paper(data: S2Paper) -> Option<PaperRecord> {
    let paper_id = data.paper_id?;
    let title = data.title?;

    let external = data.external_ids.unwrap_or_default();
    let journal = data.journal.unwrap_or_default();
    let venue = data.venue.filter(|v| !v.trim().is_empty()).or(journal.name);

    Some(
        PaperBuilder::new(title, SourceKind::SemanticScholar, paper_id)
            .author_names(data.authors.into_iter().filter_map(|a| a.name))
            .year(data.year)
            .published_date(data.publication_date.as_deref())
            .venue(venue)
            .volume(journal.volume)
            .pages(journal.pages.map(|p| p.trim().to_string()))
            .doi(external.doi)
            .arxiv_id(external.arxiv)
            .abstract_text(data.r#abstract)
            .citations(data.citation_count)
            .url(data.url)
            .pdf_url(data.open_access_pdf.and_then(|p| p.url))
            .build(),
    )
}

#[async_trait]
impl Source for SemanticScholarSource {
    fn kind(&self) -> SourceKind {
        SourceKind::SemanticScholar
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
            | SourceCapabilities::DETAILS
            | SourceCapabilities::BIBTEX
            | SourceCapabilities::AUTHOR_SEARCH
            | SourceCapabilities::RELATED
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PaperRecord>, SourceError> {
        let mut params = vec![
            ("query", query.query.clone()),
            ("limit", query.limit.clamp(1, MAX_LIMIT).to_string()),
            ("offset", query.offset.to_string()),
            ("fields", PAPER_FIELDS.to_string()),
        ];
        if let Some(years) = query.year_range() {
            params.push(("year", years));
        }

        let url = self.graph_url("/paper/search");
        let response: S2List = self.http.get_json(&url, &params, &self.headers()).await?;

        let mut papers: Vec<PaperRecord> =
            response.data.into_iter().filter_map(parse_paper).collect();
        if query.venue.is_some() {
            papers.retain(|p| query.matches(p));
        }
        Ok(papers)
    }

    async fn get_details(&self, id: &PaperIdentifier) -> Result<PaperRecord, SourceError> {
        let data = self.fetch_paper(id, PAPER_FIELDS).await?;
        parse_paper(data).ok_or_else(|| {
            SourceError::Malformed(format!("Semantic Scholar paper {} has no title", id))
        })
    }

    async fn get_bibtex(&self, id: &PaperIdentifier) -> Result<BibtexEntry, SourceError> {
        let data = self.fetch_paper(id, "citationStyles").await?;
        let bibtex = data
            .citation_styles
            .and_then(|s| s.bibtex)
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| SourceError::NotFound(format!("BibTeX for {} on Semantic Scholar", id)))?;
        parse_entry(&plain_entry_type(&bibtex), BibtexProvenance::SemanticScholar)
    }

    async fn search_author(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        let url = self.graph_url("/author/search");
        let params = [
            ("query", name.trim().to_string()),
            ("limit", "1".to_string()),
            ("fields", "authorId,name".to_string()),
        ];
        let authors: S2AuthorList = self.http.get_json(&url, &params, &self.headers()).await?;

        let Some(author_id) = authors.data.into_iter().find_map(|a| a.author_id) else {
            tracing::debug!("No Semantic Scholar author matches '{}'", name);
            return Ok(Vec::new());
        };

        let url = self.graph_url(&format!("/author/{}/papers", author_id));
        let params = [
            ("limit", limit.clamp(1, MAX_LIMIT).to_string()),
            ("fields", PAPER_FIELDS.to_string()),
        ];
        let papers: S2List = self.http.get_json(&url, &params, &self.headers()).await?;
        Ok(papers.data.into_iter().filter_map(parse_paper).collect())
    }

    async fn get_related(
        &self,
        id: &PaperIdentifier,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        let paper_id = self.paper_id(id).await?;
        let url = format!(
            "{}/recommendations/v1/papers/forpaper/{}",
            self.base_url, paper_id
        );
        let params = [
            ("limit", limit.clamp(1, MAX_LIMIT).to_string()),
            ("fields", PAPER_FIELDS.to_string()),
        ];
        let response: S2Recommendations =
            self.http.get_json(&url, &params, &self.headers()).await?;

        Ok(response
            .recommended_papers
            .into_iter()
            .filter_map(parse_paper)
            .take(limit)
            .collect())
    }
}

// ===== Semantic Scholar API Types =====

#[derive(Debug, Deserialize)]
struct S2List {
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Recommendations {
    #[serde(default)]
    recommended_papers: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    r#abstract: Option<String>,
    year: Option<i32>,
    venue: Option<String>,
    #[serde(default)]
    authors: Vec<S2Author>,
    citation_count: Option<u32>,
    external_ids: Option<S2ExternalIds>,
    url: Option<String>,
    publication_date: Option<String>,
    journal: Option<S2Journal>,
    open_access_pdf: Option<S2Pdf>,
    citation_styles: Option<S2CitationStyles>,
}

#[derive(Debug, Deserialize)]
struct S2Author {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct S2ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct S2Journal {
    name: Option<String>,
    volume: Option<String>,
    pages: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Pdf {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2CitationStyles {
    bibtex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2AuthorList {
    #[serde(default)]
    data: Vec<S2AuthorHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2AuthorHit {
    author_id: Option<String>,
}
