//! Citation graph model.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use super::PaperRecord;

/// Which edges the network walk follows from each node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkDirection {
    /// Papers that cite the node
    #[default]
    Citing,
    /// Papers the node cites
    Cited,
    Both,
}

impl NetworkDirection {
    pub fn follows_citing(&self) -> bool {
        matches!(self, NetworkDirection::Citing | NetworkDirection::Both)
    }

    pub fn follows_cited(&self) -> bool {
        matches!(self, NetworkDirection::Cited | NetworkDirection::Both)
    }
}

impl FromStr for NetworkDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "citing" | "citations" => Ok(NetworkDirection::Citing),
            "cited" | "references" => Ok(NetworkDirection::Cited),
            "both" => Ok(NetworkDirection::Both),
            other => Err(format!(
                "Unknown direction '{}', expected citing, cited or both",
                other
            )),
        }
    }
}

/// Minimal display record for a graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u32>,
}

impl GraphNode {
    pub fn from_record(id: impl Into<String>, paper: &PaperRecord) -> Self {
        Self {
            id: id.into(),
            title: paper.title.clone(),
            year: paper.year,
            citation_count: paper.citation_count,
        }
    }
}

/// Directed edge from the citing paper to the cited paper
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CitationEdge {
    pub source: String,
    pub target: String,
}

/// Why an edge was not added
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeRejection {
    SelfEdge,
    UnknownEndpoint(String),
}

/// Citation graph around a seed paper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationGraph {
    pub seed: String,
    pub depth: u8,
    pub nodes: BTreeMap<String, GraphNode>,
    pub edges: BTreeSet<CitationEdge>,
}

impl CitationGraph {
    pub fn new(seed: impl Into<String>, depth: u8) -> Self {
        Self {
            seed: seed.into(),
            depth,
            nodes: BTreeMap::new(),
            edges: BTreeSet::new(),
        }
    }

    /// Insert a node; returns false when the id is already present
    pub fn add_node(&mut self, node: GraphNode) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        self.nodes.insert(node.id.clone(), node);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Add a `citing -> cited` edge between two existing nodes
    pub fn add_edge(&mut self, citing: &str, cited: &str) -> Result<bool, EdgeRejection> {
        if citing == cited {
            return Err(EdgeRejection::SelfEdge);
        }
        for endpoint in [citing, cited] {
            if !self.nodes.contains_key(endpoint) {
                return Err(EdgeRejection::UnknownEndpoint(endpoint.to_string()));
            }
        }
        Ok(self.edges.insert(CitationEdge {
            source: citing.to_string(),
            target: cited.to_string(),
        }))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            title: format!("Paper {}", id),
            year: None,
            citation_count: None,
        }
    }

    #[test]
    fn test_edges_need_known_endpoints() {
        let mut graph = CitationGraph::new("W1", 1);
        assert!(graph.add_node(node("W1")));
        assert!(!graph.add_node(node("W1")));
        assert!(graph.add_node(node("W2")));

        assert_eq!(graph.add_edge("W2", "W1"), Ok(true));
        assert_eq!(graph.add_edge("W2", "W1"), Ok(false));
        assert_eq!(graph.add_edge("W1", "W1"), Err(EdgeRejection::SelfEdge));
        assert_eq!(
            graph.add_edge("W1", "W9"),
            Err(EdgeRejection::UnknownEndpoint("W9".to_string()))
        );
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("Both".parse::<NetworkDirection>().unwrap(), NetworkDirection::Both);
        assert!(NetworkDirection::Citing.follows_citing());
        assert!(!NetworkDirection::Citing.follows_cited());
        assert!("sideways".parse::<NetworkDirection>().is_err());
    }
}
