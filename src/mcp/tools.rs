//! Tool registry for MCP tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::handlers::{
    CacheStatsHandler, GetBibtexHandler, GetCitationNetworkHandler, GetCitationsHandler,
    GetPaperDetailsHandler, GetRelatedHandler, SearchAuthorHandler, SearchPapersHandler,
};
use crate::aggregator::Aggregator;

/// An MCP tool that can be called by the client
#[derive(Clone)]
pub struct Tool {
    /// Tool name (e.g., "search_papers")
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for input parameters
    pub input_schema: Value,

    /// Handler function to execute the tool
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Handler for executing a tool
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + std::fmt::Debug {
    /// Execute the tool with the given arguments
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

const PAPER_ID_DESCRIPTION: &str =
    "Paper identifier: DOI, arXiv id, OpenAlex work id (W...), DBLP key, Semantic Scholar id, \
     a URL for any of these, or a free-text title";

fn paper_id_schema() -> Value {
    json!({
        "type": "string",
        "description": PAPER_ID_DESCRIPTION
    })
}

/// Registry for all MCP tools, ordered by name
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    /// Create a registry exposing every aggregator operation as a tool
    pub fn from_aggregator(aggregator: Arc<Aggregator>) -> Self {
        let mut registry = Self::default();
        let sources = aggregator
            .registry()
            .kinds()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join(", ");

        registry.register(Tool {
            name: "search_papers".to_string(),
            description: format!(
                "Search for papers across all configured catalogs ({}). Results are deduplicated \
                 and merged; partial results are returned when some catalogs fail.",
                sources
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query string"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of merged results (1-100)",
                        "default": 10,
                        "minimum": 1,
                        "maximum": 100
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Number of results to skip in each catalog",
                        "default": 0
                    },
                    "year_from": {
                        "type": "integer",
                        "description": "Earliest publication year (inclusive)"
                    },
                    "year_to": {
                        "type": "integer",
                        "description": "Latest publication year (inclusive)"
                    },
                    "venue": {
                        "type": "string",
                        "description": "Venue substring filter"
                    },
                    "sort": {
                        "type": "string",
                        "enum": ["relevance", "date", "citations"],
                        "default": "relevance"
                    },
                    "sources": {
                        "type": "array",
                        "description": "Restrict the search to these catalogs",
                        "items": {
                            "type": "string",
                            "enum": ["openalex", "dblp", "crossref", "semantic", "arxiv"]
                        }
                    }
                },
                "required": ["query"]
            }),
            handler: Arc::new(SearchPapersHandler {
                aggregator: aggregator.clone(),
            }),
        });

        registry.register(Tool {
            name: "get_paper_details".to_string(),
            description: "Get full metadata for a paper. The identifier type is detected \
                          automatically and catalogs are tried in fallback order."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "paper_id": paper_id_schema()
                },
                "required": ["paper_id"]
            }),
            handler: Arc::new(GetPaperDetailsHandler {
                aggregator: aggregator.clone(),
            }),
        });

        registry.register(Tool {
            name: "get_bibtex".to_string(),
            description: format!(
                "Get a BibTeX entry for one paper or a batch of up to {} papers. DBLP entries \
                 are preferred, then CrossRef, then the owning catalog, then a generated entry.",
                crate::aggregator::MAX_BATCH
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "paper_id": paper_id_schema(),
                    "paper_ids": {
                        "type": "array",
                        "description": "Batch of paper identifiers; keys are disambiguated across the batch",
                        "items": { "type": "string" },
                        "maxItems": crate::aggregator::MAX_BATCH
                    }
                }
            }),
            handler: Arc::new(GetBibtexHandler {
                aggregator: aggregator.clone(),
            }),
        });

        registry.register(Tool {
            name: "get_citations".to_string(),
            description: "List papers that cite the given paper (via OpenAlex).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "paper_id": paper_id_schema(),
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of citing papers",
                        "default": 20
                    }
                },
                "required": ["paper_id"]
            }),
            handler: Arc::new(GetCitationsHandler {
                aggregator: aggregator.clone(),
            }),
        });

        registry.register(Tool {
            name: "search_author".to_string(),
            description: "Search for papers by author name across catalogs with author search."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "author": {
                        "type": "string",
                        "description": "Author name"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of merged results",
                        "default": 20
                    }
                },
                "required": ["author"]
            }),
            handler: Arc::new(SearchAuthorHandler {
                aggregator: aggregator.clone(),
            }),
        });

        registry.register(Tool {
            name: "get_related_papers".to_string(),
            description: "Get papers related to the given paper using Semantic Scholar \
                          recommendations."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "paper_id": paper_id_schema(),
                    "limit": {
                        "type": "integer",
                        "default": 10
                    },
                    "fallback_to_search": {
                        "type": "boolean",
                        "description": "Resolve other identifier types through a Semantic Scholar title search",
                        "default": false
                    }
                },
                "required": ["paper_id"]
            }),
            handler: Arc::new(GetRelatedHandler {
                aggregator: aggregator.clone(),
            }),
        });

        registry.register(Tool {
            name: "get_citation_network".to_string(),
            description: "Build a bounded citation graph around a paper by breadth-first \
                          expansion over OpenAlex."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "paper_id": paper_id_schema(),
                    "depth": {
                        "type": "integer",
                        "default": 1,
                        "minimum": 1,
                        "maximum": 3
                    },
                    "max_nodes": {
                        "type": "integer",
                        "default": 50,
                        "minimum": 10,
                        "maximum": 200
                    },
                    "direction": {
                        "type": "string",
                        "description": "'citing' follows papers citing each node, 'cited' follows its references",
                        "enum": ["citing", "cited", "both"],
                        "default": "citing"
                    }
                },
                "required": ["paper_id"]
            }),
            handler: Arc::new(GetCitationNetworkHandler {
                aggregator: aggregator.clone(),
            }),
        });

        registry.register(Tool {
            name: "cache_stats".to_string(),
            description: "Report response cache hit/miss statistics per source and operation."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
            handler: Arc::new(CacheStatsHandler { aggregator }),
        });

        registry
    }

    /// Register a tool
    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Get all tools
    pub fn all(&self) -> Vec<&Tool> {
        self.tools.values().collect()
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, String> {
        let tool = self
            .get(name)
            .ok_or_else(|| format!("Tool '{}' not found", name))?;

        tool.handler.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BibtexEntry, BibtexProvenance, SourceKind};
    use crate::sources::{
        mock::make_paper, MockSource, Operation, SourceCapabilities, SourceError, SourceRegistry,
    };
    use crate::utils::ResponseCache;

    fn registry_with(sources: Vec<MockSource>) -> ToolRegistry {
        let mut registry = SourceRegistry::new();
        for source in sources {
            registry.register(Arc::new(source));
        }
        let aggregator = Aggregator::new(
            registry,
            ResponseCache::new(1000),
            crate::config::Config::default(),
        );
        ToolRegistry::from_aggregator(Arc::new(aggregator))
    }

    #[test]
    fn test_all_tools_registered() {
        let tools = registry_with(vec![]);
        let names: Vec<_> = tools.all().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "cache_stats",
                "get_bibtex",
                "get_citation_network",
                "get_citations",
                "get_paper_details",
                "get_related_papers",
                "search_author",
                "search_papers",
            ]
        );
        for tool in tools.all() {
            assert_eq!(tool.input_schema["type"], "object");
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let tools = registry_with(vec![]);
        let err = tools.execute("summarize_paper", json!({})).await.unwrap_err();
        assert!(err.contains("not found"));
    }

    #[tokio::test]
    async fn test_search_papers_reports_partial_failures() {
        let tools = registry_with(vec![
            MockSource::new(SourceKind::OpenAlex).with_search_results(vec![make_paper(
                SourceKind::OpenAlex,
                "W1",
                "Attention Is All You Need",
                2017,
            )]),
            MockSource::new(SourceKind::Dblp).failing(
                Operation::Search,
                SourceError::Transient("connection reset".to_string()),
            ),
        ]);

        let result = tools
            .execute("search_papers", json!({"query": "attention"}))
            .await
            .unwrap();

        assert_eq!(result["total"], 1);
        assert_eq!(result["papers"][0]["title"], "Attention Is All You Need");
        assert_eq!(result["sources"], json!(["openalex"]));
        assert_eq!(result["failures"][0]["source"], "dblp");
        assert_eq!(result["failures"][0]["kind"], "transient");
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let tools = registry_with(vec![]);
        let err = tools
            .execute("get_paper_details", json!({}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Invalid arguments"));
    }

    #[tokio::test]
    async fn test_get_bibtex_requires_an_identifier() {
        let tools = registry_with(vec![]);
        let err = tools.execute("get_bibtex", json!({})).await.unwrap_err();
        assert!(err.contains("paper_id"));
    }

    #[tokio::test]
    async fn test_get_bibtex_batch_reports_failed_slots() {
        let entry = BibtexEntry::new("inproceedings", "DBLP:conf/x/A20", BibtexProvenance::Dblp)
            .with_field("title", Some("A"));
        let tools = registry_with(vec![MockSource::new(SourceKind::Dblp)
            .with_capabilities(SourceCapabilities::BIBTEX)
            .with_bibtex("10.1000/a", entry)]);

        let result = tools
            .execute("get_bibtex", json!({"paper_ids": ["10.1000/a", "   "]}))
            .await
            .unwrap();

        assert_eq!(result["total"], 2);
        assert_eq!(result["succeeded"], 1);
        assert_eq!(result["entries"][0]["provenance"], "dblp");
        assert!(result["entries"][1]["error"]["kind"].is_string());
        assert!(result["bibtex"]
            .as_str()
            .unwrap()
            .starts_with("@inproceedings{DBLP:conf/x/A20,"));
    }

    #[tokio::test]
    async fn test_related_unsupported_error_is_descriptive() {
        let tools = registry_with(vec![]);
        let err = tools
            .execute("get_related_papers", json!({"paper_id": "W2741809807"}))
            .await
            .unwrap_err();
        assert!(err.starts_with("[unsupported]"), "{}", err);
        assert!(err.contains("related"));
    }

    #[tokio::test]
    async fn test_cache_stats_tool() {
        let tools = registry_with(vec![]);
        let result = tools.execute("cache_stats", Value::Null).await.unwrap();
        assert!(result.is_object());
    }
}
