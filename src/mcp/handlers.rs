//! Tool handlers: argument parsing and JSON shaping around the aggregator.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::tools::ToolHandler;
use crate::aggregator::{AggregatedResults, Aggregator, AggregatorError, BibtexSlot, NetworkOptions};
use crate::models::{
    BibtexEntry, CitationGraph, NetworkDirection, PaperRecord, SearchQuery, SortBy, SourceKind,
    DEFAULT_LIMIT,
};
use crate::resolver;

/// Message returned to the client for a failed operation
pub(crate) fn describe_error(err: &AggregatorError) -> String {
    match err {
        AggregatorError::AllSourcesFailed { failures, .. } => {
            let details = failures
                .iter()
                .map(|f| format!("{} ({}): {}", f.source, f.error.kind(), f.error))
                .collect::<Vec<_>>()
                .join("; ");
            format!("[all_sources_failed] {}", details)
        }
        other => format!("[{}] {}", other.kind(), other),
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T, String> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn results_json(results: &AggregatedResults) -> Result<Value, String> {
    Ok(json!({
        "total": results.papers.len(),
        "papers": to_json(&results.papers)?,
        "sources": results.succeeded.iter().map(|k| k.id()).collect::<Vec<_>>(),
        "failures": to_json(&results.failures)?,
    }))
}

fn entry_json(entry: &BibtexEntry) -> Value {
    json!({
        "key": entry.key,
        "entry_type": entry.entry_type,
        "provenance": entry.provenance,
        "bibtex": entry.render(),
    })
}

fn slot_json(slot: &BibtexSlot) -> Value {
    match &slot.result {
        Ok(entry) => {
            let mut value = entry_json(entry);
            value["input"] = json!(slot.input);
            value
        }
        Err(e) => json!({
            "input": slot.input,
            "error": { "kind": e.kind(), "message": describe_error(e) },
        }),
    }
}

fn graph_json(graph: &CitationGraph) -> Result<Value, String> {
    Ok(json!({
        "seed": graph.seed,
        "depth": graph.depth,
        "node_count": graph.node_count(),
        "edge_count": graph.edge_count(),
        "nodes": to_json(&graph.nodes.values().collect::<Vec<_>>())?,
        "edges": to_json(&graph.edges)?,
    }))
}

fn paper_list_json(paper_id: &str, papers: &[PaperRecord]) -> Result<Value, String> {
    Ok(json!({
        "paper_id": paper_id,
        "total": papers.len(),
        "papers": to_json(&papers)?,
    }))
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_list_limit() -> usize {
    20
}

fn default_depth() -> u8 {
    1
}

fn default_max_nodes() -> usize {
    crate::aggregator::network::DEFAULT_MAX_NODES
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    year_from: Option<i32>,
    year_to: Option<i32>,
    venue: Option<String>,
    sort: Option<String>,
    sources: Option<Vec<String>>,
}

impl SearchArgs {
    fn into_query(self) -> Result<SearchQuery, String> {
        let mut query = SearchQuery::new(self.query)
            .limit(self.limit)
            .offset(self.offset)
            .years(self.year_from, self.year_to);
        if let Some(venue) = self.venue {
            query = query.venue(venue);
        }
        if let Some(sort) = self.sort {
            query = query.sort(sort.parse::<SortBy>()?);
        }
        if let Some(sources) = self.sources.filter(|s| !s.is_empty()) {
            let kinds = sources
                .iter()
                .map(|s| s.parse::<SourceKind>())
                .collect::<Result<Vec<_>, _>>()?;
            query = query.sources(kinds);
        }
        Ok(query)
    }
}

/// `search_papers`
#[derive(Debug)]
pub struct SearchPapersHandler {
    pub aggregator: Arc<Aggregator>,
}

#[async_trait::async_trait]
impl ToolHandler for SearchPapersHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let query = parse_args::<SearchArgs>(args)?.into_query()?;
        let results = self
            .aggregator
            .search(&query)
            .await
            .map_err(|e| describe_error(&e))?;
        results_json(&results)
    }
}

#[derive(Debug, Deserialize)]
struct PaperIdArgs {
    paper_id: String,
}

/// `get_paper_details`
#[derive(Debug)]
pub struct GetPaperDetailsHandler {
    pub aggregator: Arc<Aggregator>,
}

#[async_trait::async_trait]
impl ToolHandler for GetPaperDetailsHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: PaperIdArgs = parse_args(args)?;
        let id = resolver::classify(&args.paper_id);
        let paper = self
            .aggregator
            .get_details(&id)
            .await
            .map_err(|e| describe_error(&e))?;
        Ok(json!({
            "identifier": to_json(&id)?,
            "paper": to_json(&paper)?,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct BibtexArgs {
    paper_id: Option<String>,
    paper_ids: Option<Vec<String>>,
}

/// `get_bibtex`, single or batch
#[derive(Debug)]
pub struct GetBibtexHandler {
    pub aggregator: Arc<Aggregator>,
}

#[async_trait::async_trait]
impl ToolHandler for GetBibtexHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: BibtexArgs = parse_args(args)?;
        match (args.paper_id, args.paper_ids) {
            (_, Some(ids)) => {
                let slots = self
                    .aggregator
                    .get_bibtex_batch(&ids)
                    .await
                    .map_err(|e| describe_error(&e))?;
                let combined = slots
                    .iter()
                    .filter_map(|s| s.result.as_ref().ok())
                    .map(BibtexEntry::render)
                    .collect::<Vec<_>>()
                    .join("\n\n");
                Ok(json!({
                    "total": slots.len(),
                    "succeeded": slots.iter().filter(|s| s.result.is_ok()).count(),
                    "entries": slots.iter().map(slot_json).collect::<Vec<_>>(),
                    "bibtex": combined,
                }))
            }
            (Some(id), None) => {
                let entry = self
                    .aggregator
                    .get_bibtex(&resolver::classify(&id))
                    .await
                    .map_err(|e| describe_error(&e))?;
                Ok(entry_json(&entry))
            }
            (None, None) => Err("Missing 'paper_id' or 'paper_ids' parameter".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CitationsArgs {
    paper_id: String,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

/// `get_citations`
#[derive(Debug)]
pub struct GetCitationsHandler {
    pub aggregator: Arc<Aggregator>,
}

#[async_trait::async_trait]
impl ToolHandler for GetCitationsHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: CitationsArgs = parse_args(args)?;
        let citing = self
            .aggregator
            .get_citations(&resolver::classify(&args.paper_id), args.limit)
            .await
            .map_err(|e| describe_error(&e))?;
        paper_list_json(&args.paper_id, &citing)
    }
}

#[derive(Debug, Deserialize)]
struct AuthorArgs {
    author: String,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

/// `search_author`
#[derive(Debug)]
pub struct SearchAuthorHandler {
    pub aggregator: Arc<Aggregator>,
}

#[async_trait::async_trait]
impl ToolHandler for SearchAuthorHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: AuthorArgs = parse_args(args)?;
        let results = self
            .aggregator
            .search_author(&args.author, args.limit)
            .await
            .map_err(|e| describe_error(&e))?;
        results_json(&results)
    }
}

#[derive(Debug, Deserialize)]
struct RelatedArgs {
    paper_id: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    fallback_to_search: bool,
}

/// `get_related_papers`
#[derive(Debug)]
pub struct GetRelatedHandler {
    pub aggregator: Arc<Aggregator>,
}

#[async_trait::async_trait]
impl ToolHandler for GetRelatedHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: RelatedArgs = parse_args(args)?;
        let related = self
            .aggregator
            .get_related(
                &resolver::classify(&args.paper_id),
                args.limit,
                args.fallback_to_search,
            )
            .await
            .map_err(|e| describe_error(&e))?;
        paper_list_json(&args.paper_id, &related)
    }
}

#[derive(Debug, Deserialize)]
struct NetworkArgs {
    paper_id: String,
    #[serde(default = "default_depth")]
    depth: u8,
    #[serde(default = "default_max_nodes")]
    max_nodes: usize,
    direction: Option<String>,
}

/// `get_citation_network`
#[derive(Debug)]
pub struct GetCitationNetworkHandler {
    pub aggregator: Arc<Aggregator>,
}

#[async_trait::async_trait]
impl ToolHandler for GetCitationNetworkHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: NetworkArgs = parse_args(args)?;
        let direction = match args.direction {
            Some(d) => d.parse::<NetworkDirection>()?,
            None => NetworkDirection::default(),
        };
        let options = NetworkOptions {
            depth: args.depth,
            max_nodes: args.max_nodes,
            direction,
        };
        let graph = self
            .aggregator
            .build_citation_network(&resolver::classify(&args.paper_id), options)
            .await
            .map_err(|e| describe_error(&e))?;
        graph_json(&graph)
    }
}

/// `cache_stats`
#[derive(Debug)]
pub struct CacheStatsHandler {
    pub aggregator: Arc<Aggregator>,
}

#[async_trait::async_trait]
impl ToolHandler for CacheStatsHandler {
    async fn execute(&self, _args: Value) -> Result<Value, String> {
        to_json(&self.aggregator.cache_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BibtexProvenance;
    use crate::sources::{Operation, SourceError};

    #[test]
    fn test_search_args_defaults_and_parsing() {
        let args: SearchArgs = parse_args(json!({
            "query": "graph neural networks",
            "sort": "citations",
            "sources": ["openalex", "s2"],
            "year_from": 2020
        }))
        .unwrap();
        let query = args.into_query().unwrap();

        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(query.sort, SortBy::Citations);
        assert_eq!(
            query.sources,
            Some(vec![SourceKind::OpenAlex, SourceKind::SemanticScholar])
        );
        assert_eq!(query.year_from, Some(2020));
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let args: SearchArgs = parse_args(json!({"query": "q", "sources": ["scopus"]})).unwrap();
        assert!(args.into_query().unwrap_err().contains("scopus"));
    }

    #[test]
    fn test_describe_unsupported_names_operation_and_source() {
        let err = AggregatorError::Source(SourceError::Unsupported {
            operation: Operation::Related,
            source_kind: SourceKind::Dblp,
        });
        assert_eq!(
            describe_error(&err),
            "[unsupported] related is not supported by DBLP"
        );
    }

    #[test]
    fn test_slot_json_shapes() {
        let ok = BibtexSlot {
            input: "10.1/a".to_string(),
            result: Ok(BibtexEntry::new("misc", "k", BibtexProvenance::Generated)),
        };
        let value = slot_json(&ok);
        assert_eq!(value["input"], "10.1/a");
        assert_eq!(value["provenance"], "generated");

        let failed = BibtexSlot {
            input: "???".to_string(),
            result: Err(AggregatorError::InvalidInput("empty identifier".to_string())),
        };
        assert_eq!(slot_json(&failed)["error"]["kind"], "invalid_input");
    }
}
