//! Cross-source deduplication and record merging.
//!
//! Two records describe the same paper when:
//!
//! 1. both carry a DOI and the DOIs are equal (case-insensitive), or
//! 2. a DOI is missing on either side and the arXiv ids match, or
//! 3. a DOI is missing on either side, the normalized titles match and the years
//!    agree (or one is unknown).
//!
//! Records with two different DOIs are never merged.

use std::collections::HashMap;
use strsim::jaro_winkler;

use crate::models::PaperRecord;

/// Titles at least this long may match by similarity rather than equality
const FUZZY_MIN_TITLE_LEN: usize = 30;

/// Similarity threshold for fuzzy title matches
const FUZZY_THRESHOLD: f64 = 0.97;

/// Normalize a title for comparison
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn years_agree(a: &PaperRecord, b: &PaperRecord) -> bool {
    match (a.year, b.year) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

fn titles_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    a.len() >= FUZZY_MIN_TITLE_LEN
        && b.len() >= FUZZY_MIN_TITLE_LEN
        && jaro_winkler(a, b) >= FUZZY_THRESHOLD
}

/// Whether two raw titles name the same paper
pub fn same_title(a: &str, b: &str) -> bool {
    titles_match(&normalize_title(a), &normalize_title(b))
}

/// Check if two records describe the same paper
pub fn is_duplicate(a: &PaperRecord, b: &PaperRecord) -> bool {
    if let (Some(doi_a), Some(doi_b)) = (&a.doi, &b.doi) {
        return doi_a.eq_ignore_ascii_case(doi_b);
    }

    if let (Some(arxiv_a), Some(arxiv_b)) = (&a.arxiv_id, &b.arxiv_id) {
        if arxiv_a.eq_ignore_ascii_case(arxiv_b) {
            return true;
        }
    }

    years_agree(a, b) && titles_match(&normalize_title(&a.title), &normalize_title(&b.title))
}

fn fill<T>(slot: &mut Option<T>, other: Option<T>) {
    if slot.is_none() {
        *slot = other;
    }
}

fn prefer_longer(slot: &mut Option<String>, other: Option<String>) {
    match (slot.as_ref(), other) {
        (None, other) => *slot = other,
        (Some(current), Some(other)) if other.len() > current.len() => *slot = Some(other),
        _ => {}
    }
}

/// Merge `other` into `primary`, keeping the more complete value per field
///
/// `source_ids` becomes the union of both maps; `primary` wins on conflicts.
pub fn merge_records(primary: &mut PaperRecord, other: PaperRecord) {
    for (source, id) in other.source_ids {
        primary.source_ids.entry(source).or_insert(id);
    }

    let other_affiliated = other.authors.iter().filter(|a| a.affiliation.is_some()).count();
    let primary_affiliated = primary
        .authors
        .iter()
        .filter(|a| a.affiliation.is_some())
        .count();
    if other.authors.len() > primary.authors.len()
        || (other.authors.len() == primary.authors.len() && other_affiliated > primary_affiliated)
    {
        primary.authors = other.authors;
    }

    fill(&mut primary.year, other.year);
    fill(&mut primary.published_date, other.published_date);
    prefer_longer(&mut primary.venue, other.venue);
    fill(&mut primary.volume, other.volume);
    fill(&mut primary.issue, other.issue);
    fill(&mut primary.pages, other.pages);
    fill(&mut primary.doi, other.doi);
    fill(&mut primary.arxiv_id, other.arxiv_id);
    prefer_longer(&mut primary.r#abstract, other.r#abstract);
    fill(&mut primary.url, other.url);
    fill(&mut primary.pdf_url, other.pdf_url);
    fill(&mut primary.raw_bibtex, other.raw_bibtex);

    primary.citation_count = match (primary.citation_count, other.citation_count) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    primary.relevance = match (primary.relevance, other.relevance) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
}

/// Exact-match indexes over the merged list
#[derive(Default)]
struct DedupIndex {
    doi: HashMap<String, usize>,
    arxiv: HashMap<String, usize>,
    title: HashMap<String, Vec<usize>>,
}

impl DedupIndex {
    fn add(&mut self, idx: usize, paper: &PaperRecord) {
        if let Some(ref doi) = paper.doi {
            self.doi.entry(doi.to_lowercase()).or_insert(idx);
        }
        if let Some(ref arxiv) = paper.arxiv_id {
            self.arxiv.entry(arxiv.to_lowercase()).or_insert(idx);
        }
        let title = normalize_title(&paper.title);
        let slots = self.title.entry(title).or_default();
        if !slots.contains(&idx) {
            slots.push(idx);
        }
    }

    fn candidates(&self, paper: &PaperRecord) -> Vec<usize> {
        let mut out = Vec::new();
        if let Some(idx) = paper.doi.as_ref().and_then(|d| self.doi.get(&d.to_lowercase())) {
            out.push(*idx);
        }
        if let Some(idx) = paper
            .arxiv_id
            .as_ref()
            .and_then(|a| self.arxiv.get(&a.to_lowercase()))
        {
            out.push(*idx);
        }
        if let Some(slots) = self.title.get(&normalize_title(&paper.title)) {
            out.extend(slots.iter().copied());
        }
        out
    }
}

/// Deduplicate an ordered list, merging later duplicates into the first occurrence
///
/// The output keeps first-occurrence order.
pub fn deduplicate(papers: Vec<PaperRecord>) -> Vec<PaperRecord> {
    fn record(paper: &PaperRecord) -> &PaperRecord {
        paper
    }
    deduplicate_by(papers, record, merge_records)
}

/// [`deduplicate`] over any item that wraps a record
///
/// `merge` receives the surviving item and the duplicate folded into it.
pub fn deduplicate_by<T, P, M>(items: Vec<T>, paper_of: P, mut merge: M) -> Vec<T>
where
    P: Fn(&T) -> &PaperRecord,
    M: FnMut(&mut T, T),
{
    let mut merged: Vec<T> = Vec::with_capacity(items.len());
    let mut index = DedupIndex::default();

    for item in items {
        let paper = paper_of(&item);
        let exact = index
            .candidates(paper)
            .into_iter()
            .find(|idx| is_duplicate(paper_of(&merged[*idx]), paper));
        let target = exact.or_else(|| {
            if normalize_title(&paper.title).len() < FUZZY_MIN_TITLE_LEN {
                return None;
            }
            merged.iter().position(|m| is_duplicate(paper_of(m), paper))
        });

        match target {
            Some(idx) => {
                merge(&mut merged[idx], item);
                index.add(idx, paper_of(&merged[idx]));
            }
            None => {
                index.add(merged.len(), paper);
                merged.push(item);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Author, PaperBuilder, SourceKind};

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("  Attention Is All\nYou Need! "),
            "attention is all you need"
        );
        assert_eq!(normalize_title("BERT: Pre-training"), "bert pre training");
    }

    #[test]
    fn test_doi_dedup_merges_and_unions_ids() {
        let openalex = PaperBuilder::new("Deep Residual Learning", SourceKind::OpenAlex, "W2194775991")
            .doi(Some("10.1109/CVPR.2016.90"))
            .year(Some(2016))
            .citations(Some(150000))
            .build();
        let crossref = PaperBuilder::new("Deep Residual Learning for Image Recognition", SourceKind::CrossRef, "10.1109/cvpr.2016.90")
            .doi(Some("10.1109/cvpr.2016.90"))
            .author_names(["Kaiming He", "Xiangyu Zhang", "Shaoqing Ren", "Jian Sun"])
            .venue(Some("2016 IEEE Conference on Computer Vision and Pattern Recognition (CVPR)"))
            .pages(Some("770-778"))
            .citations(Some(120000))
            .build();

        let merged = deduplicate(vec![openalex, crossref]);
        assert_eq!(merged.len(), 1);

        let paper = &merged[0];
        assert_eq!(paper.title, "Deep Residual Learning");
        assert_eq!(paper.authors.len(), 4);
        assert_eq!(paper.pages.as_deref(), Some("770-778"));
        assert_eq!(paper.citation_count, Some(150000));
        assert_eq!(paper.source_id(SourceKind::OpenAlex), Some("W2194775991"));
        assert_eq!(paper.source_id(SourceKind::CrossRef), Some("10.1109/cvpr.2016.90"));
    }

    #[test]
    fn test_different_dois_are_not_merged() {
        let a = PaperBuilder::new("Same Title", SourceKind::OpenAlex, "W1")
            .doi(Some("10.1/a"))
            .build();
        let b = PaperBuilder::new("Same Title", SourceKind::CrossRef, "10.1/b")
            .doi(Some("10.1/b"))
            .build();
        assert_eq!(deduplicate(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_title_year_dedup_when_doi_missing() {
        let dblp = PaperBuilder::new("Attention is All you Need", SourceKind::Dblp, "conf/nips/VaswaniSPUJGKP17")
            .year(Some(2017))
            .venue(Some("NIPS"))
            .build();
        let arxiv = PaperBuilder::new("Attention Is All You Need.", SourceKind::Arxiv, "1706.03762")
            .year(Some(2017))
            .arxiv_id(Some("1706.03762"))
            .doi(Some("10.48550/arXiv.1706.03762"))
            .abstract_text(Some("The dominant sequence transduction models..."))
            .build();
        let other_year = PaperBuilder::new("Attention is all you need", SourceKind::SemanticScholar, "abc")
            .year(Some(2019))
            .build();

        let merged = deduplicate(vec![dblp, arxiv, other_year]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source_ids.len(), 2);
        assert!(merged[0].r#abstract.is_some());
        assert_eq!(merged[0].venue.as_deref(), Some("NIPS"));
        assert_eq!(merged[1].year, Some(2019));
    }

    #[test]
    fn test_arxiv_id_dedup() {
        let a = PaperBuilder::new("A short title", SourceKind::Arxiv, "2101.00001")
            .arxiv_id(Some("2101.00001v2"))
            .build();
        let b = PaperBuilder::new("A Short Title (extended)", SourceKind::SemanticScholar, "ff")
            .arxiv_id(Some("2101.00001"))
            .build();
        assert_eq!(deduplicate(vec![a, b]).len(), 1);
    }

    #[test]
    fn test_fuzzy_title_match_for_long_titles() {
        let a = PaperBuilder::new(
            "Language Models are Few-Shot Learners",
            SourceKind::Dblp,
            "conf/nips/BrownMRSKDNSSAA20",
        )
        .year(Some(2020))
        .build();
        let b = PaperBuilder::new(
            "Language Models are Few Shot Learner",
            SourceKind::SemanticScholar,
            "6b85b63579a916f705a8e10a49bd8d849d91b1fc",
        )
        .year(Some(2020))
        .build();
        assert_eq!(deduplicate(vec![a, b]).len(), 1);

        let short_a = PaperBuilder::new("On Graphs", SourceKind::Dblp, "x/y/z").build();
        let short_b = PaperBuilder::new("On Graph", SourceKind::Arxiv, "1").build();
        assert_eq!(deduplicate(vec![short_a, short_b]).len(), 2);
    }

    #[test]
    fn test_merge_prefers_affiliated_authors() {
        let mut primary = PaperBuilder::new("T", SourceKind::Dblp, "k")
            .author_names(["Ada Lovelace"])
            .build();
        let other = PaperBuilder::new("T", SourceKind::OpenAlex, "W1")
            .authors(vec![Author::new("Ada Lovelace").with_affiliation("Analytical Engine Co.")])
            .build();

        merge_records(&mut primary, other);
        assert_eq!(
            primary.authors[0].affiliation.as_deref(),
            Some("Analytical Engine Co.")
        );
    }
}
