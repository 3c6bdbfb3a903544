//! Adjacency index over the scanned documents.
//!
//! Every indexed document owns one node and the edges inferred from it. Edges
//! shared by several documents are reference-counted by their origins, so
//! replacing or removing a document only retracts what that document
//! contributed.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

use agentboard_core::document::{doc_ts, str_field};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::classify::node_from_document;
use crate::infer::infer_edges;
use crate::model::{
    EdgeKey, EdgeType, GraphData, GraphEdge, GraphMetadata, GraphNode, NodeType, SearchCounts,
    SearchResult,
};
use crate::stats::{
    compute_stats, connection_counts, edge_type_histogram, most_connected, node_type_histogram,
    GraphStats,
};
use crate::traverse::neighborhood;

const SEARCH_FIELDS: &[&str] = &["id", "subject", "content", "agentName", "agent_name"];
const SEARCH_EDGES_PER_DIRECTION: usize = 10;
const SEARCH_EXTRA_NODES: usize = 20;
const SEARCH_EXTRA_POOL: usize = 100;
const STATS_NODE_LIMIT: usize = 1000;
const STATS_EDGE_LIMIT: usize = 2000;

#[derive(Debug, Clone)]
struct IndexedDocument {
    container: String,
    doc: Value,
    ts: i64,
    node: GraphNode,
    edges: Vec<EdgeKey>,
}

#[derive(Debug, Clone)]
struct EdgeSlot {
    /// Contributing document ids with their version of the edge, oldest first.
    origins: Vec<(String, GraphEdge)>,
}

impl EdgeSlot {
    fn edge(&self) -> Option<&GraphEdge> {
        self.origins.first().map(|(_, edge)| edge)
    }
}

/// Outcome of [`GraphIndex::upsert_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// The id is owned by a document from a higher-priority container.
    Shadowed,
    /// The document has no id.
    Skipped,
}

#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    containers: Vec<String>,
    documents: HashMap<String, IndexedDocument>,
    edges: HashMap<EdgeKey, EdgeSlot>,
    adjacency: HashMap<String, BTreeSet<EdgeKey>>,
    built_at: Option<DateTime<Utc>>,
}

impl GraphIndex {
    /// Empty index; `containers` sets scan order and id-collision priority.
    pub fn new(containers: &[String]) -> Self {
        Self {
            containers: containers.to_vec(),
            ..Self::default()
        }
    }

    pub fn containers(&self) -> &[String] {
        &self.containers
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    pub fn mark_built(&mut self) {
        self.built_at = Some(Utc::now());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.documents.get(id).map(|d| &d.node)
    }

    /// Documents currently indexed from `container`, as scanned.
    pub fn container_documents(&self, container: &str) -> Vec<Value> {
        self.documents
            .values()
            .filter(|doc| doc.container == container)
            .map(|doc| doc.doc.clone())
            .collect()
    }

    fn rank(&self, container: &str) -> usize {
        self.containers
            .iter()
            .position(|c| c == container)
            .unwrap_or(self.containers.len())
    }

    pub fn upsert_document(&mut self, container: &str, doc: Value) -> UpsertOutcome {
        let Some(node) = node_from_document(container, &doc) else {
            return UpsertOutcome::Skipped;
        };
        let id = node.id.clone();

        let replaced = match self.documents.get(&id) {
            Some(existing) if existing.container != container => {
                if self.rank(&existing.container) <= self.rank(container) {
                    debug!(
                        "Document {} from {} shadowed by {}",
                        id, container, existing.container
                    );
                    return UpsertOutcome::Shadowed;
                }
                true
            }
            Some(_) => true,
            None => false,
        };
        if replaced {
            self.retract(&id);
        }

        let edges = infer_edges(&id, &doc);
        let keys: Vec<EdgeKey> = edges.iter().map(GraphEdge::key).collect();
        for edge in edges {
            let key = edge.key();
            self.adjacency
                .entry(key.source.clone())
                .or_default()
                .insert(key.clone());
            self.adjacency
                .entry(key.target.clone())
                .or_default()
                .insert(key.clone());
            self.edges
                .entry(key)
                .or_insert_with(|| EdgeSlot { origins: Vec::new() })
                .origins
                .push((id.clone(), edge));
        }

        if !self.containers.iter().any(|c| c == container) {
            self.containers.push(container.to_string());
        }
        self.documents.insert(
            id,
            IndexedDocument {
                container: container.to_string(),
                ts: doc_ts(&doc).unwrap_or(0),
                doc,
                node,
                edges: keys,
            },
        );

        if replaced {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        }
    }

    /// Remove a document and everything only it contributed.
    pub fn remove_document(&mut self, container: &str, id: &str) -> bool {
        match self.documents.get(id) {
            Some(existing) if existing.container == container => {
                self.retract(id);
                true
            }
            _ => false,
        }
    }

    fn retract(&mut self, id: &str) {
        let Some(previous) = self.documents.remove(id) else {
            return;
        };
        for key in previous.edges {
            let emptied = match self.edges.get_mut(&key) {
                Some(slot) => {
                    slot.origins.retain(|(origin, _)| origin != id);
                    slot.origins.is_empty()
                }
                None => false,
            };
            if !emptied {
                continue;
            }
            self.edges.remove(&key);
            for endpoint in [&key.source, &key.target] {
                if let Some(adjacent) = self.adjacency.get_mut(endpoint) {
                    adjacent.remove(&key);
                    if adjacent.is_empty() {
                        self.adjacency.remove(endpoint);
                    }
                }
            }
        }
    }

    /// Undirected neighbours of `id`.
    pub fn neighbors(&self, id: &str) -> Vec<String> {
        let mut out = BTreeSet::new();
        if let Some(keys) = self.adjacency.get(id) {
            for key in keys {
                if key.source == id {
                    out.insert(key.target.clone());
                }
                if key.target == id {
                    out.insert(key.source.clone());
                }
            }
        }
        out.into_iter().collect()
    }

    pub fn degree(&self, id: &str) -> usize {
        self.adjacency.get(id).map_or(0, BTreeSet::len)
    }

    /// Documents grouped by container in scan order, newest first.
    fn documents_by_container(&self) -> Vec<Vec<&IndexedDocument>> {
        let mut groups: Vec<Vec<&IndexedDocument>> = vec![Vec::new(); self.containers.len()];
        for doc in self.documents.values() {
            let rank = self.rank(&doc.container);
            if let Some(group) = groups.get_mut(rank) {
                group.push(doc);
            }
        }
        for group in &mut groups {
            group.sort_by(|a, b| {
                Reverse(a.ts)
                    .cmp(&Reverse(b.ts))
                    .then_with(|| a.node.id.cmp(&b.node.id))
            });
        }
        groups
    }

    /// Nodes newest first per container, with a per-container quota of
    /// `limit / containers + 10`.
    pub fn nodes(
        &self,
        node_type: Option<NodeType>,
        search: Option<&str>,
        limit: usize,
    ) -> Vec<GraphNode> {
        let quota = (limit / self.containers.len().max(1)).saturating_add(10);
        let needle = search.map(str::to_lowercase).filter(|s| !s.is_empty());
        let mut out = Vec::new();
        for group in self.documents_by_container() {
            let matching = group.into_iter().filter(|doc| match &needle {
                Some(needle) => matches_search(&doc.doc, needle),
                None => true,
            });
            for doc in matching.take(quota) {
                if node_type.is_some_and(|t| t != doc.node.node_type) {
                    continue;
                }
                out.push(doc.node.clone());
            }
        }
        out.truncate(limit);
        out
    }

    /// Edges in document scan order.
    ///
    /// `source` matches the edge source or the id of a document that produced
    /// the edge; `target` matches the edge target.
    pub fn edges(
        &self,
        source: Option<&str>,
        target: Option<&str>,
        edge_type: Option<EdgeType>,
        limit: usize,
    ) -> Vec<GraphEdge> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for doc in self.documents_by_container().into_iter().flatten() {
            for key in &doc.edges {
                if out.len() >= limit {
                    return out;
                }
                if edge_type.is_some_and(|t| t != key.edge_type) {
                    continue;
                }
                if target.is_some_and(|t| t != key.target) {
                    continue;
                }
                if let Some(source) = source {
                    let produced = doc.node.id == source;
                    if !produced && key.source != source {
                        continue;
                    }
                }
                if !seen.insert(key) {
                    continue;
                }
                if let Some(edge) = self.edges.get(key).and_then(EdgeSlot::edge) {
                    out.push(edge.clone());
                }
            }
        }
        out
    }

    /// Nodes and edges, optionally restricted to the `max_depth` neighbourhood
    /// of `center`. Node sizes reflect connections within the result.
    pub fn subgraph(
        &self,
        max_nodes: usize,
        max_depth: usize,
        center: Option<&str>,
    ) -> GraphData {
        let edge_limit = max_nodes * 2;
        let (mut nodes, edges) = match center {
            Some(center) => {
                let reachable = neighborhood(center, max_depth, |id| self.neighbors(id));
                // the whole neighbourhood, not the per-container quota
                let nodes: Vec<GraphNode> = self
                    .documents_by_container()
                    .into_iter()
                    .flatten()
                    .filter(|doc| reachable.contains(&doc.node.id))
                    .take(max_nodes)
                    .map(|doc| doc.node.clone())
                    .collect();
                let edges: Vec<GraphEdge> = self
                    .edges(None, None, None, usize::MAX)
                    .into_iter()
                    .filter(|e| reachable.contains(&e.source) && reachable.contains(&e.target))
                    .take(edge_limit)
                    .collect();
                (nodes, edges)
            }
            None => (
                self.nodes(None, None, max_nodes),
                self.edges(None, None, None, edge_limit),
            ),
        };

        let counts = connection_counts(&edges);
        for node in &mut nodes {
            let connections = counts.get(&node.id).copied().unwrap_or(0) as f64;
            node.size = (connections / 2.0 + 1.0).clamp(1.0, 10.0);
        }

        let metadata = GraphMetadata {
            node_count: nodes.len(),
            edge_count: edges.len(),
            node_types: node_type_histogram(&nodes),
            edge_types: edge_type_histogram(&edges),
            center_node: center.map(str::to_string),
            max_depth,
            generated_at: Utc::now().to_rfc3339(),
            most_connected_nodes: most_connected(&counts, 10),
        };
        GraphData {
            nodes,
            edges,
            metadata,
        }
    }

    /// Matching nodes, their incident edges and some connected non-matching nodes.
    pub fn search(&self, term: &str, max_results: usize) -> SearchResult {
        let matches = self.nodes(None, Some(term), max_results);
        let match_ids: HashSet<&str> = matches.iter().map(|n| n.id.as_str()).collect();

        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for node in &matches {
            let outgoing = self.edges(Some(&node.id), None, None, SEARCH_EDGES_PER_DIRECTION);
            let incoming = self.edges(None, Some(&node.id), None, SEARCH_EDGES_PER_DIRECTION);
            for edge in outgoing.into_iter().chain(incoming) {
                if seen.insert(edge.key()) {
                    edges.push(edge);
                }
            }
        }

        let connected: HashSet<&str> = edges
            .iter()
            .flat_map(|e| [e.source.as_str(), e.target.as_str()])
            .filter(|id| !match_ids.contains(id))
            .collect();
        let extra: Vec<GraphNode> = if connected.is_empty() {
            Vec::new()
        } else {
            self.nodes(None, None, SEARCH_EXTRA_POOL)
                .into_iter()
                .filter(|node| connected.contains(node.id.as_str()))
                .take(SEARCH_EXTRA_NODES)
                .collect()
        };

        let counts = SearchCounts {
            search_results: matches.len(),
            connected_nodes: extra.len(),
            total_nodes: matches.len() + extra.len(),
            edges: edges.len(),
        };
        let mut nodes = matches;
        nodes.extend(extra);
        SearchResult {
            search_term: term.to_string(),
            nodes,
            edges,
            counts,
        }
    }

    pub fn stats(&self) -> GraphStats {
        let nodes = self.nodes(None, None, STATS_NODE_LIMIT);
        let edges = self.edges(None, None, None, STATS_EDGE_LIMIT);
        compute_stats(&nodes, &edges)
    }
}

fn matches_search(doc: &Value, needle: &str) -> bool {
    SEARCH_FIELDS.iter().any(|field| {
        str_field(doc, &[*field]).is_some_and(|value| value.to_lowercase().contains(needle))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn containers() -> Vec<String> {
        ["agent_session_logs", "system_inbox", "working_contexts"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn sample() -> GraphIndex {
        let mut index = GraphIndex::new(&containers());
        index.upsert_document(
            "agent_session_logs",
            json!({"id": "log1", "agent_name": "alice", "session_id": "s1", "_ts": 30}),
        );
        index.upsert_document(
            "agent_session_logs",
            json!({"id": "s1", "_ts": 20}),
        );
        index.upsert_document(
            "system_inbox",
            json!({"id": "m1", "from": "alice", "to": "bob", "subject": "Hello", "_ts": 40}),
        );
        index.upsert_document(
            "working_contexts",
            json!({"id": "ctx1", "agentName": "bob", "kind": "context", "_ts": 50}),
        );
        index
    }

    #[test]
    fn builds_nodes_and_edges() {
        let index = sample();
        assert_eq!(index.document_count(), 4);
        assert_eq!(index.edge_count(), 3);
        assert_eq!(index.neighbors("alice"), vec!["bob".to_string(), "s1".to_string()]);
        assert_eq!(index.degree("bob"), 2);

        let agents = index.nodes(Some(NodeType::Agent), None, 100);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "log1");
    }

    #[test]
    fn nodes_follow_container_order_newest_first() {
        let index = sample();
        let ids: Vec<String> = index.nodes(None, None, 100).into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["log1", "s1", "m1", "ctx1"]);
        assert_eq!(index.nodes(None, None, 2).len(), 2);
    }

    #[test]
    fn search_is_case_insensitive_over_known_fields() {
        let index = sample();
        let found = index.nodes(None, Some("HELLO"), 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "m1");
        assert!(index.nodes(None, Some("context"), 10).is_empty());
    }

    #[test]
    fn replacing_a_document_retracts_its_edges() {
        let mut index = sample();
        let outcome = index.upsert_document(
            "system_inbox",
            json!({"id": "m1", "from": "alice", "to": "carol", "_ts": 45}),
        );
        assert_eq!(outcome, UpsertOutcome::Replaced);
        assert!(index.edges(None, Some("bob"), Some(EdgeType::SendsTo), 10).is_empty());
        assert_eq!(index.edges(None, Some("carol"), None, 10).len(), 1);
        assert_eq!(index.neighbors("bob"), vec!["ctx1".to_string()]);
    }

    #[test]
    fn shared_edges_survive_until_last_origin_goes() {
        let mut index = sample();
        index.upsert_document(
            "system_inbox",
            json!({"id": "m2", "from": "alice", "to": "bob", "subject": "Again", "_ts": 41}),
        );
        assert_eq!(index.edges(None, None, Some(EdgeType::SendsTo), 10).len(), 1);

        assert!(index.remove_document("system_inbox", "m1"));
        let remaining = index.edges(None, None, Some(EdgeType::SendsTo), 10);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].properties["message_id"], "m2");

        assert!(index.remove_document("system_inbox", "m2"));
        assert!(index.edges(None, None, Some(EdgeType::SendsTo), 10).is_empty());
        assert!(!index.remove_document("system_inbox", "m2"));
    }

    #[test]
    fn first_container_wins_on_id_collision() {
        let mut index = sample();
        let outcome = index.upsert_document("working_contexts", json!({"id": "m1", "_ts": 99}));
        assert_eq!(outcome, UpsertOutcome::Shadowed);
        assert_eq!(index.node("m1").unwrap().node_type, NodeType::Message);

        let mut index = GraphIndex::new(&containers());
        index.upsert_document("working_contexts", json!({"id": "x"}));
        index.upsert_document("agent_session_logs", json!({"id": "x"}));
        assert_eq!(index.node("x").unwrap().node_type, NodeType::Session);
        assert!(!index.remove_document("working_contexts", "x"));
    }

    #[test]
    fn edges_filter_by_producing_document() {
        let index = sample();
        let from_m1 = index.edges(Some("m1"), None, None, 10);
        assert_eq!(from_m1.len(), 1);
        assert_eq!(from_m1[0].source, "alice");
        let from_alice = index.edges(Some("alice"), None, None, 10);
        assert_eq!(from_alice.len(), 2);
    }

    #[test]
    fn subgraph_around_center() {
        let index = sample();
        let data = index.subgraph(50, 1, Some("alice"));
        let ids: Vec<&str> = data.nodes.iter().map(|n| n.id.as_str()).collect();
        // agent names are edge endpoints without documents
        assert_eq!(ids, vec!["s1"]);
        assert_eq!(data.metadata.edge_count, 2);
        assert_eq!(data.metadata.center_node.as_deref(), Some("alice"));
        assert_eq!(data.metadata.most_connected_nodes[0], ("alice".to_string(), 2));

        let wider = index.subgraph(50, 2, Some("alice"));
        assert_eq!(wider.metadata.edge_count, 3);
        assert!(wider.nodes.iter().any(|n| n.id == "ctx1"));
    }

    #[test]
    fn single_container_neighbourhood_with_unbounded_limits() {
        let mut index = GraphIndex::new(&["agent_session_logs".to_string()]);
        index.upsert_document(
            "agent_session_logs",
            json!({"id": "log1", "agent_name": "alice", "session_id": "s1", "_ts": 30}),
        );
        index.upsert_document("agent_session_logs", json!({"id": "s1", "_ts": 20}));

        let data = index.subgraph(50, 2, Some("alice"));
        let ids: Vec<&str> = data.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["s1"]);
        assert_eq!(data.metadata.edge_count, 1);
        assert_eq!(index.nodes(None, None, usize::MAX).len(), 2);
    }

    #[test]
    fn container_documents_returns_raw_documents() {
        let index = sample();
        let mut ids: Vec<String> = index
            .container_documents("agent_session_logs")
            .iter()
            .filter_map(|doc| doc["id"].as_str().map(str::to_string))
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["log1", "s1"]);
        assert!(index.container_documents("journal_entries").is_empty());
    }

    #[test]
    fn full_subgraph_sizes_by_degree() {
        let index = sample();
        let data = index.subgraph(10, 2, None);
        assert_eq!(data.nodes.len(), 4);
        let s1 = data.nodes.iter().find(|n| n.id == "s1").unwrap();
        assert!((s1.size - 1.5).abs() < f64::EPSILON);
        let m1 = data.nodes.iter().find(|n| n.id == "m1").unwrap();
        assert!((m1.size - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn search_collects_connected_nodes() {
        let index = sample();
        let result = index.search("ctx", 10);
        assert_eq!(result.counts.search_results, 1);
        assert_eq!(result.counts.edges, 1);
        assert_eq!(result.edges[0].source, "bob");
        assert_eq!(result.counts.connected_nodes, 0);

        let result = index.search("s1", 10);
        assert_eq!(result.nodes[0].id, "s1");
        assert_eq!(result.counts.edges, 1);
    }

    #[test]
    fn stats_over_index() {
        let stats = sample().stats();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.total_edges, 3);
        assert_eq!(stats.node_types.get("agent"), Some(&1));
        assert!(stats.isolated_nodes.contains(&"log1".to_string()));
    }
}
