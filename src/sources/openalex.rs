//! OpenAlex research source implementation.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::models::{Author, PaperBuilder, PaperIdentifier, PaperRecord, SearchQuery, SourceKind};
use crate::resolver;
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::HttpClient;

const OPENALEX_API_BASE: &str = "https://api.openalex.org";

/// Largest `per-page` the works endpoint accepts
const MAX_PER_PAGE: usize = 200;

/// OpenAlex research source
///
/// Uses the OpenAlex REST API. Citation and reference lookups only exist here,
/// so other identifiers are bridged to a work id first.
#[derive(Debug, Clone)]
pub struct OpenAlexSource {
    http: HttpClient,
    base_url: String,
    email: Option<String>,
}

impl OpenAlexSource {
    /// Create a new OpenAlex source; the email joins the polite pool
    pub fn new(http: HttpClient, email: Option<String>) -> Self {
        Self {
            http,
            base_url: OPENALEX_API_BASE.to_string(),
            email,
        }
    }

    /// Point the client at a different host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Request parameters plus `mailto` when an email is configured
    fn params(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let Some(ref email) = self.email {
            params.push(("mailto", email.clone()));
        }
        params
    }

    /// Path of a single work for the identifier types OpenAlex can resolve
    fn work_path(id: &PaperIdentifier) -> Result<String, SourceError> {
        match id {
            PaperIdentifier::OpenAlex { value } => Ok(format!("/works/{}", value)),
            PaperIdentifier::Doi { value } => Ok(format!("/works/doi:{}", value)),
            PaperIdentifier::Arxiv { value, .. } => {
                Ok(format!("/works/doi:{}", resolver::arxiv_doi(value)))
            }
            other => Err(SourceError::InvalidRequest(format!(
                "OpenAlex cannot look up {} identifiers",
                other.type_name()
            ))),
        }
    }

    async fn fetch_work(&self, id: &PaperIdentifier) -> Result<OAWork, SourceError> {
        let url = self.build_url(&Self::work_path(id)?);
        self.http.get_json(&url, &self.params(Vec::new()), &[]).await
    }

    /// The `W...` id of a paper, looking it up when the identifier is not one
    async fn work_id(&self, id: &PaperIdentifier) -> Result<String, SourceError> {
        if let PaperIdentifier::OpenAlex { value } = id {
            return Ok(value.clone());
        }
        let work = self.fetch_work(id).await?;
        work.id
            .as_deref()
            .map(short_id)
            .ok_or_else(|| SourceError::Malformed("OpenAlex work without id".to_string()))
    }

    async fn list_works(
        &self,
        params: Vec<(&'static str, String)>,
    ) -> Result<Vec<OAWork>, SourceError> {
        let url = self.build_url("/works");
        let response: WorksResponse = self.http.get_json(&url, &self.params(params), &[]).await?;
        Ok(response.results)
    }

    /// Convert an OpenAlex work to a paper record
    fn parse_work(work: OAWork) -> Option<PaperRecord> {
        let id = short_id(work.id.as_deref()?);
        let title = work.display_name.or(work.title)?;

        let authors = work
            .authorships
            .into_iter()
            .filter_map(|a| {
                let name = a.author.display_name?;
                let author = Author::new(name);
                Some(match a.institutions.into_iter().find_map(|i| i.display_name) {
                    Some(affiliation) => author.with_affiliation(affiliation),
                    None => author,
                })
            })
            .collect();

        let arxiv_id = work.doi.as_deref().and_then(resolver::arxiv_id_from_doi);
        let venue = work
            .primary_location
            .as_ref()
            .and_then(|l| l.source.as_ref())
            .and_then(|s| s.display_name.clone());
        let pdf_url = work
            .primary_location
            .iter()
            .chain(work.best_oa_location.iter())
            .find(|l| l.is_oa.unwrap_or(false))
            .and_then(|l| l.pdf_url.clone());
        let pages = work.biblio.as_ref().and_then(|b| match (&b.first_page, &b.last_page) {
            (Some(first), Some(last)) if first != last => Some(format!("{}-{}", first, last)),
            (Some(first), _) => Some(first.clone()),
            _ => None,
        });

        let builder = PaperBuilder::new(title, SourceKind::OpenAlex, id.clone())
            .authors(authors)
            .year(work.publication_year)
            .published_date(work.publication_date.as_deref())
            .venue(venue)
            .volume(work.biblio.as_ref().and_then(|b| b.volume.clone()))
            .issue(work.biblio.as_ref().and_then(|b| b.issue.clone()))
            .pages(pages)
            .doi(work.doi)
            .arxiv_id(arxiv_id)
            .abstract_text(work.abstract_inverted_index.as_ref().map(reconstruct_abstract))
            .citations(work.cited_by_count)
            .url(Some(format!("https://openalex.org/{}", id)))
            .pdf_url(pdf_url)
            .relevance(work.relevance_score);

        Some(builder.build())
    }

    fn parse_works(works: Vec<OAWork>) -> Vec<PaperRecord> {
        works.into_iter().filter_map(Self::parse_work).collect()
    }
}

/// `https://openalex.org/W123` -> `W123`
fn short_id(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_string()
}

/// Rebuild abstract text from OpenAlex's `word -> [positions]` index
fn reconstruct_abstract(index: &HashMap<String, Vec<usize>>) -> String {
    let mut words: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |p| (*p, word.as_str())))
        .collect();
    words.sort_unstable_by_key(|(position, _)| *position);
    words
        .into_iter()
        .map(|(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `(page, per_page, skip)` covering `offset..offset + limit` with page-based paging
fn page_window(offset: usize, limit: usize) -> (usize, usize, usize) {
    let limit = limit.clamp(1, MAX_PER_PAGE);
    if offset % limit == 0 {
        (offset / limit + 1, limit, 0)
    } else if offset + limit <= MAX_PER_PAGE {
        (1, offset + limit, offset)
    } else {
        (offset / MAX_PER_PAGE + 1, MAX_PER_PAGE, offset % MAX_PER_PAGE)
    }
}

/// `publication_year` filter value for a query's year range
fn year_filter(query: &SearchQuery) -> Option<String> {
    match (query.year_from, query.year_to) {
        (Some(from), Some(to)) => Some(format!("publication_year:{}-{}", from, to)),
        (Some(from), None) => Some(format!("publication_year:>{}", from - 1)),
        (None, Some(to)) => Some(format!("publication_year:<{}", to + 1)),
        (None, None) => None,
    }
}

#[async_trait]
impl Source for OpenAlexSource {
    fn kind(&self) -> SourceKind {
        SourceKind::OpenAlex
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
            | SourceCapabilities::DETAILS
            | SourceCapabilities::CITATIONS
            | SourceCapabilities::REFERENCES
            | SourceCapabilities::AUTHOR_SEARCH
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PaperRecord>, SourceError> {
        let (page, per_page, skip) = page_window(query.offset, query.limit);

        let mut filters = Vec::new();
        if let Some(years) = year_filter(query) {
            filters.push(years);
        }
        if let Some(ref venue) = query.venue {
            filters.push(format!("primary_location.source.display_name.search:{}", venue));
        }

        let mut params = vec![
            ("search", query.query.clone()),
            ("per-page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        if !filters.is_empty() {
            params.push(("filter", filters.join(",")));
        }

        let works = self.list_works(params).await?;
        Ok(Self::parse_works(works)
            .into_iter()
            .skip(skip)
            .take(query.limit)
            .collect())
    }

    async fn get_details(&self, id: &PaperIdentifier) -> Result<PaperRecord, SourceError> {
        let work = self.fetch_work(id).await?;
        Self::parse_work(work)
            .ok_or_else(|| SourceError::Malformed(format!("OpenAlex work {} has no title", id)))
    }

    async fn get_citations(
        &self,
        id: &PaperIdentifier,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        let work_id = self.work_id(id).await?;
        let works = self
            .list_works(vec![
                ("filter", format!("cites:{}", work_id)),
                ("per-page", limit.clamp(1, MAX_PER_PAGE).to_string()),
            ])
            .await?;
        Ok(Self::parse_works(works).into_iter().take(limit).collect())
    }

    async fn get_references(
        &self,
        id: &PaperIdentifier,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        let work = self.fetch_work(id).await?;
        let referenced: Vec<String> = work
            .referenced_works
            .iter()
            .map(|w| short_id(w))
            .take(limit.min(MAX_PER_PAGE))
            .collect();
        if referenced.is_empty() {
            return Ok(Vec::new());
        }

        let works = self
            .list_works(vec![
                ("filter", format!("openalex:{}", referenced.join("|"))),
                ("per-page", referenced.len().to_string()),
            ])
            .await?;

        // Keep the order the citing paper lists its references in
        let mut by_id: HashMap<String, PaperRecord> = Self::parse_works(works)
            .into_iter()
            .filter_map(|p| Some((p.source_id(SourceKind::OpenAlex)?.to_string(), p)))
            .collect();
        Ok(referenced.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn search_author(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        let works = self
            .list_works(vec![
                ("filter", format!("raw_author_name.search:{}", name)),
                ("sort", "publication_year:desc".to_string()),
                ("per-page", limit.clamp(1, MAX_PER_PAGE).to_string()),
            ])
            .await?;
        Ok(Self::parse_works(works).into_iter().take(limit).collect())
    }
}

// ===== OpenAlex API Types =====

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    results: Vec<OAWork>,
}

#[derive(Debug, Deserialize)]
struct OAWork {
    id: Option<String>,
    display_name: Option<String>,
    title: Option<String>,
    publication_year: Option<i32>,
    publication_date: Option<String>,
    cited_by_count: Option<u32>,
    doi: Option<String>,
    relevance_score: Option<f64>,
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
    primary_location: Option<OALocation>,
    best_oa_location: Option<OALocation>,
    biblio: Option<OABiblio>,
    #[serde(default)]
    authorships: Vec<OAAuthorship>,
    #[serde(default)]
    referenced_works: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OALocation {
    is_oa: Option<bool>,
    pdf_url: Option<String>,
    source: Option<OALocationSource>,
}

#[derive(Debug, Deserialize)]
struct OALocationSource {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OABiblio {
    volume: Option<String>,
    issue: Option<String>,
    first_page: Option<String>,
    last_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAAuthorship {
    author: OAAuthor,
    #[serde(default)]
    institutions: Vec<OAInstitution>,
}

#[derive(Debug, Deserialize)]
struct OAAuthor {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAInstitution {
    display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const WORK_JSON: &str = r#"{
        "id": "https://openalex.org/W2741809807",
        "display_name": "Attention Is All You Need",
        "publication_year": 2017,
        "publication_date": "2017-06-12",
        "cited_by_count": 90000,
        "doi": "https://doi.org/10.48550/arXiv.1706.03762",
        "relevance_score": 812.5,
        "abstract_inverted_index": {"The": [0], "dominant": [1], "models": [3], "sequence": [2]},
        "primary_location": {"is_oa": true, "pdf_url": "https://arxiv.org/pdf/1706.03762", "source": {"display_name": "arXiv (Cornell University)"}},
        "biblio": {"volume": "30", "issue": null, "first_page": "5998", "last_page": "6008"},
        "authorships": [
            {"author": {"display_name": "Ashish Vaswani"}, "institutions": [{"display_name": "Google"}]},
            {"author": {"display_name": "Noam Shazeer"}, "institutions": []}
        ],
        "referenced_works": ["https://openalex.org/W1", "https://openalex.org/W2"]
    }"#;

    fn source(server: &Server) -> OpenAlexSource {
        OpenAlexSource::new(HttpClient::unthrottled(SourceKind::OpenAlex).unwrap(), None)
            .with_base_url(server.url())
    }

    #[test]
    fn test_reconstruct_abstract() {
        let mut index = HashMap::new();
        index.insert("world".to_string(), vec![1]);
        index.insert("hello".to_string(), vec![0, 2]);
        assert_eq!(reconstruct_abstract(&index), "hello world hello");
    }

    #[test]
    fn test_page_window() {
        assert_eq!(page_window(0, 10), (1, 10, 0));
        assert_eq!(page_window(20, 10), (3, 10, 0));
        assert_eq!(page_window(5, 10), (1, 15, 5));
        assert_eq!(page_window(195, 10), (1, 200, 195));
    }

    #[test]
    fn test_parse_work() {
        let work: OAWork = serde_json::from_str(WORK_JSON).unwrap();
        let paper = OpenAlexSource::parse_work(work).unwrap();

        assert_eq!(paper.source_id(SourceKind::OpenAlex), Some("W2741809807"));
        assert_eq!(paper.arxiv_id.as_deref(), Some("1706.03762"));
        assert_eq!(paper.doi.as_deref(), Some("10.48550/arxiv.1706.03762"));
        assert_eq!(paper.r#abstract.as_deref(), Some("The dominant sequence models"));
        assert_eq!(paper.authors[0].affiliation.as_deref(), Some("Google"));
        assert_eq!(paper.pages.as_deref(), Some("5998-6008"));
        assert_eq!(paper.citation_count, Some(90000));
        assert_eq!(paper.relevance, Some(812.5));
        assert_eq!(paper.pdf_url.as_deref(), Some("https://arxiv.org/pdf/1706.03762"));
    }

    #[tokio::test]
    async fn test_search_maps_filters() {
        let mut server = Server::new_async().await;
        let body = format!(r#"{{"meta": {{"count": 1}}, "results": [{}]}}"#, WORK_JSON);
        let mock = server
            .mock("GET", "/works")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("search".into(), "attention".into()),
                Matcher::UrlEncoded("filter".into(), "publication_year:2015-2020".into()),
                Matcher::UrlEncoded("per-page".into(), "5".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let query = SearchQuery::new("attention").limit(5).years(Some(2015), Some(2020));
        let papers = source(&server).search(&query).await.unwrap();

        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].title, "Attention Is All You Need");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_details_by_doi() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/works/doi:10.48550/arxiv.1706.03762")
            .with_status(200)
            .with_body(WORK_JSON)
            .create_async()
            .await;

        let id = resolver::classify("arXiv:1706.03762");
        let paper = source(&server).get_details(&id).await.unwrap();

        assert_eq!(paper.year, Some(2017));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_citations_bridge_doi_to_work_id() {
        let mut server = Server::new_async().await;
        let lookup = server
            .mock("GET", "/works/doi:10.1000/xyz")
            .with_status(200)
            .with_body(WORK_JSON)
            .expect(1)
            .create_async()
            .await;
        let citing = server
            .mock("GET", "/works")
            .match_query(Matcher::UrlEncoded("filter".into(), "cites:W2741809807".into()))
            .with_status(200)
            .with_body(r#"{"results": [{"id": "https://openalex.org/W9", "display_name": "A Follow-up"}]}"#)
            .create_async()
            .await;

        let id = resolver::classify("10.1000/XYZ");
        let papers = source(&server).get_citations(&id, 10).await.unwrap();

        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].source_id(SourceKind::OpenAlex), Some("W9"));
        lookup.assert_async().await;
        citing.assert_async().await;
    }

    #[tokio::test]
    async fn test_references_keep_listed_order() {
        let mut server = Server::new_async().await;
        let _work = server
            .mock("GET", "/works/W2741809807")
            .with_status(200)
            .with_body(WORK_JSON)
            .create_async()
            .await;
        let _refs = server
            .mock("GET", "/works")
            .match_query(Matcher::UrlEncoded("filter".into(), "openalex:W1|W2".into()))
            .with_status(200)
            .with_body(
                r#"{"results": [
                    {"id": "https://openalex.org/W2", "display_name": "Second"},
                    {"id": "https://openalex.org/W1", "display_name": "First"}
                ]}"#,
            )
            .create_async()
            .await;

        let id = resolver::classify("W2741809807");
        let papers = source(&server).get_references(&id, 10).await.unwrap();

        let titles: Vec<&str> = papers.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
    }

    #[tokio::test]
    async fn test_unaddressable_identifier() {
        let server = Server::new_async().await;
        let id = resolver::classify("conf/nips/VaswaniSPUJGKP17");
        let result = source(&server).get_details(&id).await;
        assert!(matches!(result, Err(SourceError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_unsupported_bibtex() {
        let server = Server::new_async().await;
        let id = resolver::classify("W2741809807");
        let result = source(&server).get_bibtex(&id).await;
        assert!(matches!(result, Err(SourceError::Unsupported { .. })));
    }
}
