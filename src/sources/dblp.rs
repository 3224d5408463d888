//! DBLP research source implementation.
//!
//! Search goes through the JSON publication API; single records and native
//! BibTeX come from the `/rec/{key}.xml` and `/rec/{key}.bib` exports.

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::Deserialize;

use crate::models::{
    BibtexEntry, BibtexProvenance, PaperBuilder, PaperIdentifier, PaperRecord, SearchQuery,
    SourceKind,
};
use crate::resolver;
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::bibtex::parse_entry;
use crate::utils::{same_title, HttpClient};

const DBLP_BASE_URL: &str = "https://dblp.org";

/// Largest page the search API returns
const MAX_HITS: usize = 1000;

/// DBLP research source
///
/// Computer science bibliography with native BibTeX export.
#[derive(Debug, Clone)]
pub struct DblpSource {
    http: HttpClient,
    base_url: String,
}

impl DblpSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: DBLP_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn search_hits(
        &self,
        q: String,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        let url = format!("{}/search/publ/api", self.base_url);
        let params = vec![
            ("q", q),
            ("format", "json".to_string()),
            ("h", limit.clamp(1, MAX_HITS).to_string()),
            ("f", offset.to_string()),
        ];
        let response: SearchResponse = self.http.get_json(&url, &params, &[]).await?;

        Ok(response
            .result
            .hits
            .hit
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .filter_map(parse_hit)
            .take(limit)
            .collect())
    }

    /// DBLP key of the record carrying this DOI
    async fn key_for_doi(&self, doi: &str) -> Result<String, SourceError> {
        let hits = self.search_hits(doi.to_string(), 5, 0).await?;
        hits.into_iter()
            .find(|p| p.doi.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(doi)))
            .and_then(|p| p.source_id(SourceKind::Dblp).map(str::to_string))
            .ok_or_else(|| SourceError::NotFound(format!("DOI {} on DBLP", doi)))
    }

    /// DBLP key of the hit whose title matches
    async fn key_for_title(&self, title: &str) -> Result<String, SourceError> {
        let hits = self.search_hits(title.trim().to_string(), 5, 0).await?;
        hits.into_iter()
            .find(|p| same_title(&p.title, title))
            .and_then(|p| p.source_id(SourceKind::Dblp).map(str::to_string))
            .ok_or_else(|| SourceError::NotFound(format!("title \"{}\" on DBLP", title.trim())))
    }

    /// DBLP indexes arXiv preprints under their DataCite DOI; titles go through search
    async fn record_key(&self, id: &PaperIdentifier) -> Result<String, SourceError> {
        match id {
            PaperIdentifier::Dblp { value } => Ok(value.clone()),
            PaperIdentifier::Doi { value } => self.key_for_doi(value).await,
            PaperIdentifier::Arxiv { value, .. } => self.key_for_doi(&resolver::arxiv_doi(value)).await,
            PaperIdentifier::RawQuery { value } if !value.trim().is_empty() => {
                self.key_for_title(value).await
            }
            other => Err(SourceError::InvalidRequest(format!(
                "DBLP cannot look up {} identifiers",
                other.type_name()
            ))),
        }
    }
}

/// Build the search expression with DBLP's inline `year:` and `venue:` filters
fn search_expression(query: &SearchQuery) -> String {
    let mut q = query.query.trim().to_string();
    if query.year_from.is_some() || query.year_to.is_some() {
        let bound = |y: Option<i32>| y.map(|y| y.to_string()).unwrap_or_else(|| "*".to_string());
        q.push_str(&format!(" year:{}:{}", bound(query.year_from), bound(query.year_to)));
    }
    if let Some(ref venue) = query.venue {
        q.push_str(&format!(" venue:{}", venue));
    }
    q
}

/// DBLP titles end with a period
fn clean_title(title: &str) -> String {
    title.trim().trim_end_matches('.').to_string()
}

/// Strip DBLP's homonym disambiguation suffix (`Wei Wang 0001`)
fn clean_author(name: &str) -> String {
    let name = name.trim();
    match name.rsplit_once(' ') {
        Some((head, tail)) if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) => {
            head.to_string()
        }
        _ => name.to_string(),
    }
}

/// Identifiers hidden in electronic-edition links
fn ids_from_ee<'a>(links: impl IntoIterator<Item = &'a String>) -> (Option<String>, Option<String>) {
    let mut doi = None;
    let mut arxiv = None;
    for link in links {
        if doi.is_none() && link.contains("doi.org/") {
            doi = Some(resolver::normalize_doi(link));
        }
        if arxiv.is_none() {
            if let PaperIdentifier::Arxiv { value, .. } = resolver::classify(link) {
                arxiv = Some(value);
            }
        }
    }
    if arxiv.is_none() {
        arxiv = doi.as_deref().and_then(resolver::arxiv_id_from_doi);
    }
    (doi, arxiv)
}

fn parse_hit(hit: Hit) -> Option<PaperRecord> {
    let info = hit.info;
    let key = info.key?;
    let title = clean_title(&info.title?);

    let authors: Vec<String> = info
        .authors
        .map(|a| a.author.into_vec())
        .unwrap_or_default()
        .into_iter()
        .map(|a| clean_author(a.name()))
        .collect();

    let ee = info.ee.map(OneOrMany::into_vec).unwrap_or_default();
    let (ee_doi, arxiv_id) = ids_from_ee(&ee);
    let doi = info.doi.or(ee_doi);

    let builder = PaperBuilder::new(title, SourceKind::Dblp, key.clone())
        .author_names(authors)
        .year(info.year.and_then(|y| y.trim().parse().ok()))
        .venue(info.venue.and_then(|v| v.into_vec().into_iter().next()))
        .volume(info.volume)
        .issue(info.number)
        .pages(info.pages)
        .doi(doi)
        .arxiv_id(arxiv_id)
        .url(Some(format!("{}/rec/{}", DBLP_BASE_URL, key)))
        .relevance(hit.score.and_then(|s| s.parse().ok()));
    Some(builder.build())
}

/// Fields of one record in a `/rec/{key}.xml` export
#[derive(Debug, Default)]
struct XmlRecord {
    key: String,
    authors: Vec<String>,
    title: Option<String>,
    year: Option<String>,
    venue: Option<String>,
    volume: Option<String>,
    number: Option<String>,
    pages: Option<String>,
    ee: Vec<String>,
}

impl XmlRecord {
    fn set(&mut self, field: &str, text: String) {
        match field {
            "author" | "editor" => self.authors.push(text),
            "title" => self.title = Some(text),
            "year" => self.year = Some(text),
            "journal" | "booktitle" => {
                if self.venue.is_none() {
                    self.venue = Some(text)
                }
            }
            "volume" => self.volume = Some(text),
            "number" => self.number = Some(text),
            "pages" => self.pages = Some(text),
            "ee" => self.ee.push(text),
            _ => {}
        }
    }

    fn into_paper(self) -> Option<PaperRecord> {
        let title = clean_title(self.title.as_deref()?);
        let (doi, arxiv_id) = ids_from_ee(&self.ee);

        let builder = PaperBuilder::new(title, SourceKind::Dblp, self.key.clone())
            .author_names(self.authors.iter().map(|a| clean_author(a)))
            .year(self.year.and_then(|y| y.trim().parse().ok()))
            .venue(self.venue)
            .volume(self.volume)
            .issue(self.number)
            .pages(self.pages)
            .doi(doi)
            .arxiv_id(arxiv_id)
            .url(Some(format!("{}/rec/{}", DBLP_BASE_URL, self.key)));
        Some(builder.build())
    }
}

/// Get attribute value from a BytesStart element
fn get_attr(e: &BytesStart<'_>, attr_name: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == attr_name.as_bytes())
        .and_then(|a| std::str::from_utf8(a.value.as_ref()).ok().map(str::to_string))
}

/// Parse the first record of a `<dblp>` export document
fn parse_record_xml(xml: &str) -> Result<Option<XmlRecord>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut record: Option<XmlRecord> = None;
    let mut field: Option<(String, String)> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    2 if record.is_none() => {
                        record = Some(XmlRecord {
                            key: get_attr(e, "key").unwrap_or_default(),
                            ..Default::default()
                        });
                    }
                    3 if record.is_some() => field = Some((name, String::new())),
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if let Some((_, ref mut text)) = field {
                    let chunk = e
                        .unescape()
                        .map_err(|e| SourceError::Malformed(format!("DBLP XML: {}", e)))?;
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(chunk.trim());
                }
            }
            Ok(Event::End(_)) => {
                if depth == 3 {
                    if let (Some((name, text)), Some(rec)) = (field.take(), record.as_mut()) {
                        rec.set(&name, text);
                    }
                }
                if depth == 2 && record.is_some() {
                    break;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(SourceError::Malformed(format!("DBLP XML: {}", e))),
        }
    }

    Ok(record)
}

#[async_trait]
impl Source for DblpSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Dblp
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
            | SourceCapabilities::DETAILS
            | SourceCapabilities::BIBTEX
            | SourceCapabilities::AUTHOR_SEARCH
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PaperRecord>, SourceError> {
        self.search_hits(search_expression(query), query.limit, query.offset)
            .await
    }

    async fn get_details(&self, id: &PaperIdentifier) -> Result<PaperRecord, SourceError> {
        let key = self.record_key(id).await?;
        let url = format!("{}/rec/{}.xml", self.base_url, key);
        let xml = self.http.get_text(&url, &[], &[]).await?;

        parse_record_xml(&xml)?
            .and_then(XmlRecord::into_paper)
            .ok_or_else(|| SourceError::Malformed(format!("DBLP record {} has no title", key)))
    }

    async fn get_bibtex(&self, id: &PaperIdentifier) -> Result<BibtexEntry, SourceError> {
        let key = self.record_key(id).await?;
        let url = format!("{}/rec/{}.bib", self.base_url, key);
        let text = self.http.get_text(&url, &[], &[]).await?;

        let mut entry = parse_entry(&text, BibtexProvenance::Dblp)?;
        let expected = format!("DBLP:{}", key);
        if entry.key != expected {
            entry.rekey(expected);
        }
        Ok(entry)
    }

    async fn search_author(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        self.search_hits(format!("author:{}", name.trim()), limit, 0)
            .await
    }
}

// ===== DBLP API Types =====

/// DBLP's JSON collapses single-element arrays into the element itself
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hit: Option<OneOrMany<Hit>>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "@score")]
    score: Option<String>,
    info: HitInfo,
}

#[derive(Debug, Deserialize)]
struct HitInfo {
    key: Option<String>,
    title: Option<String>,
    authors: Option<HitAuthors>,
    venue: Option<OneOrMany<String>>,
    volume: Option<String>,
    number: Option<String>,
    pages: Option<String>,
    year: Option<String>,
    doi: Option<String>,
    ee: Option<OneOrMany<String>>,
}

#[derive(Debug, Deserialize)]
struct HitAuthors {
    author: OneOrMany<HitAuthor>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HitAuthor {
    Named { text: String },
    Plain(String),
}

impl HitAuthor {
    fn name(&self) -> &str {
        match self {
            HitAuthor::Named { text } | HitAuthor::Plain(text) => text,
        }
    }
}
