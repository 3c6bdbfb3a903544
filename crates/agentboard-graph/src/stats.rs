use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::model::{GraphEdge, GraphNode};

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub node_types: BTreeMap<String, usize>,
    pub edge_types: BTreeMap<String, usize>,
    pub density: f64,
    pub average_connections: f64,
    pub most_connected_nodes: Vec<(String, usize)>,
    pub isolated_nodes_count: usize,
    pub isolated_nodes: Vec<String>,
    pub last_updated: String,
}

/// Endpoint appearance count per id.
pub fn connection_counts(edges: &[GraphEdge]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for edge in edges {
        *counts.entry(edge.source.clone()).or_insert(0) += 1;
        *counts.entry(edge.target.clone()).or_insert(0) += 1;
    }
    counts
}

/// Top `n` by count; ties by id.
pub fn most_connected(counts: &HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts.iter().map(|(id, c)| (id.clone(), *c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

pub fn node_type_histogram(nodes: &[GraphNode]) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for node in nodes {
        *histogram.entry(node.node_type.to_string()).or_insert(0) += 1;
    }
    histogram
}

pub fn edge_type_histogram(edges: &[GraphEdge]) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for edge in edges {
        *histogram.entry(edge.edge_type.to_string()).or_insert(0) += 1;
    }
    histogram
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn compute_stats(nodes: &[GraphNode], edges: &[GraphEdge]) -> GraphStats {
    let counts = connection_counts(edges);
    let n = nodes.len();
    let possible = if n > 1 { (n * (n - 1)) as f64 / 2.0 } else { 0.0 };
    let density = if possible > 0.0 {
        edges.len() as f64 / possible
    } else {
        0.0
    };
    let average_connections = if n > 0 {
        counts.values().sum::<usize>() as f64 / n as f64
    } else {
        0.0
    };

    let connected: HashSet<&str> = edges
        .iter()
        .flat_map(|e| [e.source.as_str(), e.target.as_str()])
        .collect();
    let isolated: Vec<String> = nodes
        .iter()
        .filter(|node| !connected.contains(node.id.as_str()))
        .map(|node| node.id.clone())
        .collect();

    GraphStats {
        total_nodes: n,
        total_edges: edges.len(),
        node_types: node_type_histogram(nodes),
        edge_types: edge_type_histogram(edges),
        density: round_to(density, 4),
        average_connections: round_to(average_connections, 2),
        most_connected_nodes: most_connected(&counts, 10),
        isolated_nodes_count: isolated.len(),
        isolated_nodes: isolated.into_iter().take(10).collect(),
        last_updated: chrono::Utc::now().to_rfc3339(),
    }
}
