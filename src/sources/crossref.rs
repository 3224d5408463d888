//! CrossRef research source implementation.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::models::{
    Author, BibtexEntry, BibtexProvenance, PaperBuilder, PaperIdentifier, PaperRecord,
    SearchQuery, SourceKind,
};
use crate::resolver;
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::bibtex::parse_entry;
use crate::utils::HttpClient;

const CROSSREF_API_BASE: &str = "https://api.crossref.org";

/// Largest `rows` value the works endpoint accepts
const MAX_ROWS: usize = 1000;

/// CrossRef research source
///
/// Uses the CrossRef REST API for DOI metadata, search and the publisher's
/// BibTeX transform.
#[derive(Debug, Clone)]
pub struct CrossRefSource {
    http: HttpClient,
    base_url: String,
    email: Option<String>,
}

impl CrossRefSource {
    /// Create a new CrossRef source; the email joins the polite pool
    pub fn new(http: HttpClient, email: Option<String>) -> Self {
        Self {
            http,
            base_url: CROSSREF_API_BASE.to_string(),
            email,
        }
    }

    /// Point the client at a different host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn params(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let Some(ref email) = self.email {
            params.push(("mailto", email.clone()));
        }
        params
    }

    /// CrossRef only resolves DOIs
    fn doi_of(id: &PaperIdentifier) -> Result<&str, SourceError> {
        id.doi().ok_or_else(|| {
            SourceError::InvalidRequest(format!(
                "CrossRef cannot look up {} identifiers",
                id.type_name()
            ))
        })
    }

    async fn list_works(
        &self,
        params: Vec<(&'static str, String)>,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        let url = format!("{}/works", self.base_url);
        let response: ListResponse = self.http.get_json(&url, &self.params(params), &[]).await?;
        Ok(response
            .message
            .items
            .into_iter()
            .filter_map(parse_item)
            .collect())
    }
}

/// CrossRef abstracts are JATS XML fragments
fn strip_markup(text: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]+>").expect("static tag pattern"));
    tags.replace_all(text, " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_item(item: CRItem) -> Option<PaperRecord> {
    let doi = item.doi?;
    let title = item.title.into_iter().next()?;

    let authors = item
        .author
        .into_iter()
        .filter_map(|a| {
            let name = match (a.given, a.family, a.name) {
                (Some(given), Some(family), _) => format!("{} {}", given, family),
                (None, Some(family), _) => family,
                (_, None, Some(name)) => name,
                _ => return None,
            };
            let author = Author::new(name);
            Some(match a.affiliation.into_iter().find_map(|f| f.name) {
                Some(affiliation) => author.with_affiliation(affiliation),
                None => author,
            })
        })
        .collect();

    let date = [item.published_print, item.published_online, item.issued]
        .into_iter()
        .flatten()
        .find_map(|d| d.first_parts());
    let year = date.as_ref().and_then(|parts| parts.first().copied());
    let published = date.as_ref().and_then(|parts| match parts.as_slice() {
        [y, m, d, ..] => Some(format!("{:04}-{:02}-{:02}", y, m, d)),
        _ => None,
    });
    let arxiv_id = resolver::arxiv_id_from_doi(&doi);

    Some(
        PaperBuilder::new(title, SourceKind::CrossRef, resolver::normalize_doi(&doi))
            .authors(authors)
            .year(year)
            .published_date(published.as_deref())
            .venue(item.container_title.into_iter().next())
            .volume(item.volume)
            .issue(item.issue)
            .pages(item.page)
            .doi(Some(doi))
            .arxiv_id(arxiv_id)
            .abstract_text(item.r#abstract.as_deref().map(strip_markup))
            .citations(item.is_referenced_by_count)
            .url(item.url)
            .relevance(item.score)
            .build(),
    )
}

#[async_trait]
impl Source for CrossRefSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CrossRef
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
            | SourceCapabilities::DETAILS
            | SourceCapabilities::BIBTEX
            | SourceCapabilities::AUTHOR_SEARCH
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PaperRecord>, SourceError> {
        let mut filters = Vec::new();
        if let Some(from) = query.year_from {
            filters.push(format!("from-pub-date:{}", from));
        }
        if let Some(to) = query.year_to {
            filters.push(format!("until-pub-date:{}", to));
        }

        let mut params = vec![
            ("query", query.query.clone()),
            ("rows", query.limit.clamp(1, MAX_ROWS).to_string()),
            ("offset", query.offset.to_string()),
        ];
        if !filters.is_empty() {
            params.push(("filter", filters.join(",")));
        }
        if let Some(ref venue) = query.venue {
            params.push(("query.container-title", venue.clone()));
        }

        // Field queries only rank, so the venue is also enforced here
        let mut papers = self.list_works(params).await?;
        if query.venue.is_some() {
            papers.retain(|p| query.matches(p));
        }
        Ok(papers)
    }

    async fn get_details(&self, id: &PaperIdentifier) -> Result<PaperRecord, SourceError> {
        let doi = Self::doi_of(id)?;
        let url = format!("{}/works/{}", self.base_url, doi);
        let response: WorkResponse = self.http.get_json(&url, &self.params(Vec::new()), &[]).await?;

        parse_item(response.message)
            .ok_or_else(|| SourceError::Malformed(format!("CrossRef work {} has no title", doi)))
    }

    async fn get_bibtex(&self, id: &PaperIdentifier) -> Result<BibtexEntry, SourceError> {
        let doi = Self::doi_of(id)?;
        let url = format!(
            "{}/works/{}/transform/application/x-bibtex",
            self.base_url, doi
        );
        let text = self
            .http
            .get_text(&url, &self.params(Vec::new()), &[])
            .await?;
        parse_entry(text.trim(), BibtexProvenance::CrossRef)
    }

    async fn search_author(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        self.list_works(vec![
            ("query.author", name.trim().to_string()),
            ("rows", limit.clamp(1, MAX_ROWS).to_string()),
        ])
        .await
    }
}

// ===== CrossRef API Types =====

#[derive(Debug, Deserialize)]
struct ListResponse {
    message: ListMessage,
}

#[derive(Debug, Deserialize)]
struct ListMessage {
    #[serde(default)]
    items: Vec<CRItem>,
}

#[derive(Debug, Deserialize)]
struct WorkResponse {
    message: CRItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CRItem {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<CRAuthor>,
    #[serde(default)]
    container_title: Vec<String>,
    volume: Option<String>,
    issue: Option<String>,
    page: Option<String>,
    r#abstract: Option<String>,
    is_referenced_by_count: Option<u32>,
    #[serde(rename = "URL")]
    url: Option<String>,
    score: Option<f64>,
    published_print: Option<CRDate>,
    published_online: Option<CRDate>,
    issued: Option<CRDate>,
}

#[derive(Debug, Deserialize)]
struct CRAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
    #[serde(default)]
    affiliation: Vec<CRAffiliation>,
}

#[derive(Debug, Deserialize)]
struct CRAffiliation {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CRDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl CRDate {
    /// Leading non-null `[year, month, day]` components
    fn first_parts(self) -> Option<Vec<i32>> {
        let parts: Vec<i32> = self
            .date_parts
            .into_iter()
            .next()?
            .into_iter()
            .map_while(|p| p)
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const WORK_JSON: &str = r#"{
        "DOI": "10.1145/3292500.3330701",
        "title": ["Graph Neural Networks at Scale"],
        "author": [
            {"given": "Ada", "family": "Lovelace", "affiliation": [{"name": "Analytical Engines Ltd"}]},
            {"name": "The GNN Consortium", "affiliation": []}
        ],
        "container-title": ["Proceedings of the 25th ACM SIGKDD Conference"],
        "volume": "1",
        "page": "10-20",
        "abstract": "<jats:p>We study <jats:italic>graphs</jats:italic>.</jats:p>",
        "is-referenced-by-count": 12,
        "URL": "https://doi.org/10.1145/3292500.3330701",
        "score": 33.5,
        "published-print": {"date-parts": [[2019, 7, 25]]},
        "issued": {"date-parts": [[2019, null]]}
    }"#;

    fn source(server: &Server) -> CrossRefSource {
        CrossRefSource::new(
            HttpClient::unthrottled(SourceKind::CrossRef).unwrap(),
            Some("dev@example.org".to_string()),
        )
        .with_base_url(server.url())
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(
            strip_markup("<jats:p>We study <jats:italic>graphs</jats:italic>.</jats:p>"),
            "We study graphs ."
        );
    }

    #[test]
    fn test_parse_item() {
        let item: CRItem = serde_json::from_str(WORK_JSON).unwrap();
        let paper = parse_item(item).unwrap();

        assert_eq!(paper.source_id(SourceKind::CrossRef), Some("10.1145/3292500.3330701"));
        assert_eq!(paper.author_names(), vec!["Ada Lovelace", "The GNN Consortium"]);
        assert_eq!(paper.authors[0].affiliation.as_deref(), Some("Analytical Engines Ltd"));
        assert_eq!(paper.year, Some(2019));
        assert_eq!(paper.published_date.map(|d| d.to_string()).as_deref(), Some("2019-07-25"));
        assert_eq!(paper.citation_count, Some(12));
        assert_eq!(paper.relevance, Some(33.5));
    }

    #[tokio::test]
    async fn test_search_sends_date_filters_and_mailto() {
        let mut server = Server::new_async().await;
        let body = format!(r#"{{"status": "ok", "message": {{"items": [{}]}}}}"#, WORK_JSON);
        let mock = server
            .mock("GET", "/works")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), "graph networks".into()),
                Matcher::UrlEncoded(
                    "filter".into(),
                    "from-pub-date:2018,until-pub-date:2020".into(),
                ),
                Matcher::UrlEncoded("mailto".into(), "dev@example.org".into()),
            ]))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let query = SearchQuery::new("graph networks").years(Some(2018), Some(2020));
        let papers = source(&server).search(&query).await.unwrap();

        assert_eq!(papers.len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_venue_is_post_filtered() {
        let mut server = Server::new_async().await;
        let body = format!(r#"{{"message": {{"items": [{}]}}}}"#, WORK_JSON);
        let _mock = server
            .mock("GET", "/works")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let kdd = SearchQuery::new("graphs").venue("sigkdd");
        let icml = SearchQuery::new("graphs").venue("ICML");

        assert_eq!(source(&server).search(&kdd).await.unwrap().len(), 1);
        assert!(source(&server).search(&icml).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_native_bibtex_transform() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/works/10.1145/3292500.3330701/transform/application/x-bibtex",
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(" @inproceedings{Lovelace_2019, title={Graph Neural Networks at Scale}, DOI={10.1145/3292500.3330701}, year={2019} }")
            .create_async()
            .await;

        let id = resolver::classify("https://doi.org/10.1145/3292500.3330701");
        let entry = source(&server).get_bibtex(&id).await.unwrap();

        assert_eq!(entry.provenance, BibtexProvenance::CrossRef);
        assert_eq!(entry.key, "Lovelace_2019");
        assert_eq!(entry.field("doi"), Some("10.1145/3292500.3330701"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_doi_identifier_is_rejected() {
        let server = Server::new_async().await;
        let id = resolver::classify("2301.12345");
        let result = source(&server).get_details(&id).await;
        assert!(matches!(result, Err(SourceError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_unknown_doi_is_not_found() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/works/10.9999/missing")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let id = resolver::classify("10.9999/missing");
        let result = source(&server).get_details(&id).await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }
}
