//! Search request models.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{PaperRecord, SourceKind};

/// Largest page size any source is asked for
pub const MAX_LIMIT: usize = 100;

/// Default page size
pub const DEFAULT_LIMIT: usize = 10;

/// Sort key for merged search results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Source-provided relevance score, falling back to source order
    #[default]
    Relevance,
    /// Newest first
    Date,
    /// Most cited first
    Citations,
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "relevance" => Ok(SortBy::Relevance),
            "date" | "year" | "newest" => Ok(SortBy::Date),
            "citations" | "citation_count" | "citationcount" | "cited" => Ok(SortBy::Citations),
            other => Err(format!(
                "Unknown sort '{}', expected relevance, date or citations",
                other
            )),
        }
    }
}

/// Search query parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free-text query
    pub query: String,

    /// Maximum number of results to return (1..=100)
    pub limit: usize,

    /// Number of results to skip
    #[serde(default)]
    pub offset: usize,

    /// Earliest publication year (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_from: Option<i32>,

    /// Latest publication year (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_to: Option<i32>,

    /// Venue substring filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,

    #[serde(default)]
    pub sort: SortBy,

    /// Restrict the fan-out to these sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceKind>>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            year_from: None,
            year_to: None,
            venue: None,
            sort: SortBy::Relevance,
            sources: None,
        }
    }
}

impl SearchQuery {
    /// Create a new search query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Set the page size, clamped to 1..=100
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, MAX_LIMIT);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Restrict results to an inclusive year range
    pub fn years(mut self, from: Option<i32>, to: Option<i32>) -> Self {
        self.year_from = from;
        self.year_to = to;
        self
    }

    pub fn venue(mut self, venue: impl Into<String>) -> Self {
        let venue = venue.into();
        self.venue = if venue.trim().is_empty() {
            None
        } else {
            Some(venue.trim().to_string())
        };
        self
    }

    pub fn sort(mut self, sort: SortBy) -> Self {
        self.sort = sort;
        self
    }

    pub fn sources(mut self, sources: Vec<SourceKind>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Whether any filter beyond the query text is set
    pub fn has_filters(&self) -> bool {
        self.year_from.is_some() || self.year_to.is_some() || self.venue.is_some()
    }

    /// `(from, to)` year range as a string such as `2018-2022`, `2018-` or `-2022`
    pub fn year_range(&self) -> Option<String> {
        match (self.year_from, self.year_to) {
            (None, None) => None,
            (Some(from), Some(to)) => Some(format!("{}-{}", from, to)),
            (Some(from), None) => Some(format!("{}-", from)),
            (None, Some(to)) => Some(format!("-{}", to)),
        }
    }

    /// Post-filter for sources that cannot apply the filters natively
    ///
    /// Records without a year are dropped once a year range is set.
    pub fn matches(&self, paper: &PaperRecord) -> bool {
        if self.year_from.is_some() || self.year_to.is_some() {
            let Some(year) = paper.year else {
                return false;
            };
            if self.year_from.is_some_and(|from| year < from) {
                return false;
            }
            if self.year_to.is_some_and(|to| year > to) {
                return false;
            }
        }

        if let Some(ref venue) = self.venue {
            let wanted = venue.to_lowercase();
            match paper.venue {
                Some(ref actual) if actual.to_lowercase().contains(&wanted) => {}
                _ => return false,
            }
        }

        true
    }

    /// Fingerprint of every parameter except the query text, for cache keys
    pub fn params_fingerprint(&self) -> String {
        format!(
            "limit={};offset={};from={:?};to={:?};venue={:?}",
            self.limit,
            self.offset,
            self.year_from,
            self.year_to,
            self.venue.as_deref().map(str::to_lowercase)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaperBuilder;

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(SearchQuery::new("q").limit(0).limit, 1);
        assert_eq!(SearchQuery::new("q").limit(500).limit, MAX_LIMIT);
        assert_eq!(SearchQuery::new("q").limit(25).limit, 25);
    }

    #[test]
    fn test_sort_parse() {
        assert_eq!("Citations".parse::<SortBy>().unwrap(), SortBy::Citations);
        assert_eq!("date".parse::<SortBy>().unwrap(), SortBy::Date);
        assert!("popularity".parse::<SortBy>().is_err());
    }

    #[test]
    fn test_post_filter() {
        let query = SearchQuery::new("q")
            .years(Some(2018), Some(2020))
            .venue("neurips");

        let inside = PaperBuilder::new("A", SourceKind::Dblp, "k1")
            .year(Some(2019))
            .venue(Some("NeurIPS 2019"))
            .build();
        let too_old = PaperBuilder::new("B", SourceKind::Dblp, "k2")
            .year(Some(2015))
            .venue(Some("NeurIPS"))
            .build();
        let no_year = PaperBuilder::new("C", SourceKind::Dblp, "k3")
            .venue(Some("NeurIPS"))
            .build();
        let wrong_venue = PaperBuilder::new("D", SourceKind::Dblp, "k4")
            .year(Some(2019))
            .venue(Some("ICML"))
            .build();

        assert!(query.matches(&inside));
        assert!(!query.matches(&too_old));
        assert!(!query.matches(&no_year));
        assert!(!query.matches(&wrong_venue));
        assert!(SearchQuery::new("q").matches(&no_year));
    }

    #[test]
    fn test_year_range_text() {
        assert_eq!(SearchQuery::new("q").year_range(), None);
        assert_eq!(
            SearchQuery::new("q").years(Some(2010), None).year_range().as_deref(),
            Some("2010-")
        );
        assert_eq!(
            SearchQuery::new("q").years(Some(2010), Some(2012)).year_range().as_deref(),
            Some("2010-2012")
        );
    }
}
