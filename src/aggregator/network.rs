//! Citations and citation networks, served by OpenAlex.
//!
//! Identifiers from other catalogs are bridged to an OpenAlex work through
//! their DOI (an arXiv id bridges through its arXiv DOI). Graph nodes are keyed
//! by OpenAlex work id; the walk is breadth-first with a visited set, so no
//! work is expanded twice.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{Aggregator, AggregatorError};
use crate::models::{
    CitationGraph, EdgeRejection, GraphNode, NetworkDirection, PaperIdentifier, PaperRecord,
    SourceKind,
};
use crate::resolver;
use crate::sources::{Operation, SourceError};

pub const MAX_DEPTH: u8 = 3;
pub const MIN_NODES: usize = 10;
pub const MAX_NODES: usize = 200;
pub const DEFAULT_MAX_NODES: usize = 50;

/// Most neighbours fetched per expanded node and direction
const PER_NODE_LIMIT: usize = 20;

/// Shape of a citation network walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOptions {
    /// Hops from the seed, clamped to 1..=3
    pub depth: u8,
    /// Node budget, clamped to 10..=200
    pub max_nodes: usize,
    pub direction: NetworkDirection,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            depth: 1,
            max_nodes: DEFAULT_MAX_NODES,
            direction: NetworkDirection::Citing,
        }
    }
}

impl NetworkOptions {
    pub fn clamped(self) -> Self {
        Self {
            depth: self.depth.clamp(1, MAX_DEPTH),
            max_nodes: self.max_nodes.clamp(MIN_NODES, MAX_NODES),
            direction: self.direction,
        }
    }
}

/// The OpenAlex work an identifier was bridged to
#[derive(Debug)]
struct Bridged {
    work_id: String,
    record: Option<PaperRecord>,
}

impl Aggregator {
    /// Papers citing the given paper, newest OpenAlex data first
    ///
    /// Fails with `Unsupported` when the identifier cannot be bridged to OpenAlex.
    pub async fn get_citations(
        &self,
        id: &PaperIdentifier,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, AggregatorError> {
        let limit = limit.clamp(1, crate::models::MAX_LIMIT);
        let bridged = self.bridge_to_openalex(id, Operation::Citations).await?;
        let work = PaperIdentifier::OpenAlex {
            value: bridged.work_id,
        };
        Ok(self.neighbours(Operation::Citations, &work, limit).await?)
    }

    /// Breadth-first citation graph around a seed paper
    ///
    /// A node whose neighbours cannot be fetched stays in the graph as a leaf.
    pub async fn build_citation_network(
        &self,
        id: &PaperIdentifier,
        options: NetworkOptions,
    ) -> Result<CitationGraph, AggregatorError> {
        let options = options.clamped();
        let bridged = self.bridge_to_openalex(id, Operation::Citations).await?;
        let seed = bridged.work_id.clone();

        let seed_record = match bridged.record {
            Some(record) => Some(record),
            None => self.openalex_details(&seed).await.ok(),
        };
        let seed_node = match seed_record {
            Some(ref record) => GraphNode::from_record(seed.clone(), record),
            None => GraphNode {
                id: seed.clone(),
                title: seed.clone(),
                year: None,
                citation_count: None,
            },
        };

        let mut walk = Walk {
            graph: CitationGraph::new(seed.clone(), options.depth),
            visited: HashSet::from([seed.clone()]),
            next: Vec::new(),
            max_nodes: options.max_nodes,
        };
        walk.graph.add_node(seed_node);

        let mut frontier = vec![seed];
        for level in 1..=options.depth {
            for anchor in &frontier {
                if walk.full() {
                    break;
                }
                let work = PaperIdentifier::OpenAlex {
                    value: anchor.clone(),
                };

                if options.direction.follows_citing() {
                    let limit = PER_NODE_LIMIT.min(walk.remaining());
                    match self.neighbours(Operation::Citations, &work, limit).await {
                        Ok(citing) => {
                            for paper in citing {
                                walk.attach(anchor, &paper, true);
                            }
                        }
                        Err(e) => tracing::warn!("Citations of {} unavailable, leaf node: {}", anchor, e),
                    }
                }

                if options.direction.follows_cited() && !walk.full() {
                    let limit = PER_NODE_LIMIT.min(walk.remaining());
                    match self.neighbours(Operation::References, &work, limit).await {
                        Ok(cited) => {
                            for paper in cited {
                                walk.attach(anchor, &paper, false);
                            }
                        }
                        Err(e) => tracing::warn!("References of {} unavailable, leaf node: {}", anchor, e),
                    }
                }
            }

            frontier = std::mem::take(&mut walk.next);
            tracing::debug!(
                "Network level {} done: {} nodes, {} edges, {} to expand",
                level,
                walk.graph.node_count(),
                walk.graph.edge_count(),
                frontier.len()
            );
            if frontier.is_empty() || walk.full() {
                break;
            }
        }

        Ok(walk.graph)
    }

    /// Citations or references of an OpenAlex work, through the cache
    async fn neighbours(
        &self,
        operation: Operation,
        work: &PaperIdentifier,
        limit: usize,
    ) -> Result<Vec<PaperRecord>, SourceError> {
        let source = self.registry.get_required(SourceKind::OpenAlex, operation)?;
        let params = format!("limit={}", limit);
        self.call_source(source, operation, &work.key(), &params, || async move {
            match operation {
                Operation::References => source.get_references(work, limit).await,
                _ => source.get_citations(work, limit).await,
            }
        })
        .await
    }

    async fn openalex_details(&self, work_id: &str) -> Result<PaperRecord, SourceError> {
        let source = self
            .registry
            .get_required(SourceKind::OpenAlex, Operation::Details)?;
        let work = PaperIdentifier::OpenAlex {
            value: work_id.to_string(),
        };
        self.source_details(source, &work).await
    }

    /// Map any identifier onto an OpenAlex work id, using the DOI as the bridge
    async fn bridge_to_openalex(
        &self,
        id: &PaperIdentifier,
        operation: Operation,
    ) -> Result<Bridged, AggregatorError> {
        let id = resolver::normalize(id);
        let openalex = self
            .registry
            .get_required(SourceKind::OpenAlex, operation)?
            .clone();

        let unsupported = || -> AggregatorError {
            SourceError::Unsupported {
                operation,
                source_kind: id.owning_source().unwrap_or(SourceKind::OpenAlex),
            }
            .into()
        };

        let doi = match &id {
            PaperIdentifier::OpenAlex { value } => {
                return Ok(Bridged {
                    work_id: value.clone(),
                    record: None,
                })
            }
            PaperIdentifier::Doi { value } => value.clone(),
            PaperIdentifier::Arxiv { value, .. } => resolver::arxiv_doi(value),
            PaperIdentifier::RawQuery { value } if value.is_empty() => {
                return Err(AggregatorError::InvalidInput("empty identifier".to_string()));
            }
            _ => match self.get_details(&id).await {
                Ok(record) => {
                    if let Some(work_id) = record.source_id(SourceKind::OpenAlex) {
                        return Ok(Bridged {
                            work_id: work_id.to_string(),
                            record: Some(record),
                        });
                    }
                    match record.doi.or_else(|| record.arxiv_id.as_deref().map(resolver::arxiv_doi)) {
                        Some(doi) => doi,
                        None => return Err(unsupported()),
                    }
                }
                Err(e) => {
                    tracing::debug!("Cannot bridge {} to OpenAlex: {}", id, e);
                    return Err(unsupported());
                }
            },
        };

        let bridge = PaperIdentifier::doi_of(doi);
        match self.source_details(&openalex, &bridge).await {
            Ok(record) => match record.source_id(SourceKind::OpenAlex) {
                Some(work_id) => Ok(Bridged {
                    work_id: work_id.to_string(),
                    record: Some(record),
                }),
                None => Err(unsupported()),
            },
            Err(SourceError::NotFound(_)) | Err(SourceError::InvalidRequest(_)) => {
                tracing::debug!("{} has no OpenAlex work", bridge);
                Err(unsupported())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Mutable state of one breadth-first walk
struct Walk {
    graph: CitationGraph,
    visited: HashSet<String>,
    next: Vec<String>,
    max_nodes: usize,
}

impl Walk {
    fn full(&self) -> bool {
        self.graph.node_count() >= self.max_nodes
    }

    fn remaining(&self) -> usize {
        self.max_nodes.saturating_sub(self.graph.node_count()).max(1)
    }

    /// Add `paper` as a neighbour of `anchor`; `cites_anchor` orients the edge
    fn attach(&mut self, anchor: &str, paper: &PaperRecord, cites_anchor: bool) {
        let Some(other) = paper.source_id(SourceKind::OpenAlex) else {
            return;
        };
        let other = other.to_string();

        if !self.graph.contains(&other) {
            if self.full() {
                return;
            }
            self.graph.add_node(GraphNode::from_record(other.clone(), paper));
        }
        if self.visited.insert(other.clone()) {
            self.next.push(other.clone());
        }

        let (citing, cited) = if cites_anchor {
            (other.as_str(), anchor)
        } else {
            (anchor, other.as_str())
        };
        match self.graph.add_edge(citing, cited) {
            Ok(_) => {}
            Err(EdgeRejection::SelfEdge) => tracing::debug!("Dropped self-citation of {}", anchor),
            Err(EdgeRejection::UnknownEndpoint(id)) => {
                tracing::debug!("Dropped edge to unknown node {}", id)
            }
        }
    }
}
