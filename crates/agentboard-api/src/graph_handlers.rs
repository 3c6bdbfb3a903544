use crate::{ensure_range, ApiError, ApiResult, AppState};
use agentboard_graph::{EdgeType, GraphData, NodeType};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct NodeParams {
    pub node_type: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EdgeParams {
    pub source_id: Option<String>,
    pub target_id: Option<String>,
    pub edge_type: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct GraphParams {
    pub max_nodes: Option<usize>,
    pub max_depth: Option<usize>,
    pub center_node: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub max_results: Option<usize>,
}

fn parse_type<T: FromStr<Err = String>>(value: Option<&str>) -> ApiResult<Option<T>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse().map(Some).map_err(ApiError::Validation),
        None => Ok(None),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub async fn graph_nodes(
    State(state): State<AppState>,
    Query(params): Query<NodeParams>,
) -> ApiResult<Json<Value>> {
    let limit = ensure_range("limit", params.limit.unwrap_or(100), 1, 1000)?;
    let node_type = parse_type::<NodeType>(params.node_type.as_deref())?;
    let nodes = state
        .graph
        .nodes(node_type, non_empty(&params.search), limit)
        .await;
    let node_types: BTreeSet<&str> = nodes.iter().map(|n| n.node_type.as_str()).collect();
    Ok(Json(json!({
        "success": true,
        "count": nodes.len(),
        "node_types": node_types,
        "nodes": nodes,
    })))
}

pub async fn graph_edges(
    State(state): State<AppState>,
    Query(params): Query<EdgeParams>,
) -> ApiResult<Json<Value>> {
    let limit = ensure_range("limit", params.limit.unwrap_or(100), 1, 1000)?;
    let edge_type = parse_type::<EdgeType>(params.edge_type.as_deref())?;
    let edges = state
        .graph
        .edges(
            non_empty(&params.source_id),
            non_empty(&params.target_id),
            edge_type,
            limit,
        )
        .await;
    let edge_types: BTreeSet<&str> = edges.iter().map(|e| e.edge_type.as_str()).collect();
    Ok(Json(json!({
        "success": true,
        "count": edges.len(),
        "edge_types": edge_types,
        "edges": edges,
    })))
}

pub async fn graph_data(
    State(state): State<AppState>,
    Query(params): Query<GraphParams>,
) -> ApiResult<Json<GraphData>> {
    let max_nodes = ensure_range("max_nodes", params.max_nodes.unwrap_or(50), 10, 200)?;
    let max_depth = ensure_range("max_depth", params.max_depth.unwrap_or(2), 1, 5)?;
    let data = state
        .graph
        .subgraph(max_nodes, max_depth, non_empty(&params.center_node))
        .await;
    Ok(Json(data))
}

pub async fn graph_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Value>> {
    let term = non_empty(&params.q)
        .ok_or_else(|| ApiError::Validation("q must not be empty".into()))?;
    let max_results = ensure_range("max_results", params.max_results.unwrap_or(20), 1, 100)?;
    let result = state.graph.search(term, max_results).await;
    let mut body = serde_json::to_value(&result).map_err(agentboard_core::AgentboardError::from)?;
    if let Some(map) = body.as_object_mut() {
        map.insert("success".into(), Value::Bool(true));
    }
    Ok(Json(body))
}

pub async fn graph_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = state.graph.stats().await;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

pub async fn refresh_graph(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let report = state.graph.refresh().await;
    Ok(Json(json!({ "success": true, "report": report })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_parameters() {
        assert_eq!(parse_type::<NodeType>(Some("agent")).unwrap(), Some(NodeType::Agent));
        assert_eq!(parse_type::<NodeType>(Some(" ")).unwrap(), None);
        assert_eq!(parse_type::<EdgeType>(None).unwrap(), None);

        let err = parse_type::<EdgeType>(Some("friend")).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
