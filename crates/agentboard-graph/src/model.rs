use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Agent,
    Session,
    Message,
    Context,
    Memory,
    Document,
}

impl NodeType {
    pub const ALL: [NodeType; 6] = [
        NodeType::Agent,
        NodeType::Session,
        NodeType::Message,
        NodeType::Context,
        NodeType::Memory,
        NodeType::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Agent => "agent",
            NodeType::Session => "session",
            NodeType::Message => "message",
            NodeType::Context => "context",
            NodeType::Memory => "memory",
            NodeType::Document => "document",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            NodeType::Agent => "#3b82f6",
            NodeType::Session => "#10b981",
            NodeType::Message => "#f59e0b",
            NodeType::Context => "#8b5cf6",
            NodeType::Memory => "#ef4444",
            NodeType::Document => "#6b7280",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown node type '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Participates,
    SendsTo,
    HasContext,
    Remembers,
}

impl EdgeType {
    pub const ALL: [EdgeType; 4] = [
        EdgeType::Participates,
        EdgeType::SendsTo,
        EdgeType::HasContext,
        EdgeType::Remembers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Participates => "participates",
            EdgeType::SendsTo => "sends_to",
            EdgeType::HasContext => "has_context",
            EdgeType::Remembers => "remembers",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EdgeType::Participates => "participates in",
            EdgeType::SendsTo => "sends message to",
            EdgeType::HasContext => "has context",
            EdgeType::Remembers => "remembers",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown edge type '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub properties: Map<String, Value>,
    pub size: f64,
    pub color: String,
}

/// Dedup identity of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
}

impl EdgeKey {
    pub fn new(source: &str, target: &str, edge_type: EdgeType) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            edge_type,
        }
    }

    /// Stable id: `edge_` plus 16 hex chars of SHA-256 over the key fields,
    /// each prefixed with its byte length.
    pub fn edge_id(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [
            self.source.as_str(),
            self.target.as_str(),
            self.edge_type.as_str(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("edge_{hex}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub properties: Map<String, Value>,
    pub weight: f64,
}

impl GraphEdge {
    pub fn new(source: &str, target: &str, edge_type: EdgeType) -> Self {
        let key = EdgeKey::new(source, target, edge_type);
        Self {
            id: key.edge_id(),
            source: key.source,
            target: key.target,
            label: edge_type.label().to_string(),
            edge_type,
            properties: Map::new(),
            weight: 1.0,
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(&self.source, &self.target, self.edge_type)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphMetadata {
    pub node_count: usize,
    pub edge_count: usize,
    pub node_types: BTreeMap<String, usize>,
    pub edge_types: BTreeMap<String, usize>,
    pub center_node: Option<String>,
    pub max_depth: usize,
    pub generated_at: String,
    pub most_connected_nodes: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: GraphMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchCounts {
    pub search_results: usize,
    pub connected_nodes: usize,
    pub total_nodes: usize,
    pub edges: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub search_term: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub counts: SearchCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_ids_are_stable_per_key() {
        let a = GraphEdge::new("alice", "s1", EdgeType::Participates);
        let b = GraphEdge::new("alice", "s1", EdgeType::Participates);
        let c = GraphEdge::new("alice", "s1", EdgeType::Remembers);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id.starts_with("edge_"));
        assert_eq!(a.id.len(), "edge_".len() + 16);
    }

    #[test]
    fn edge_ids_do_not_collide_across_field_boundaries() {
        let a = GraphEdge::new("a-b", "c", EdgeType::SendsTo);
        let b = GraphEdge::new("a", "b-c", EdgeType::SendsTo);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn types_round_trip_through_strings() {
        for t in NodeType::ALL {
            assert_eq!(t.as_str().parse::<NodeType>().unwrap(), t);
        }
        assert_eq!("sends_to".parse::<EdgeType>().unwrap(), EdgeType::SendsTo);
        assert!("friend".parse::<EdgeType>().is_err());
        assert_eq!(
            serde_json::to_value(GraphEdge::new("a", "b", EdgeType::HasContext)).unwrap()["type"],
            "has_context"
        );
    }
}
