//! The four fixed memory layers, each backed by one container, plus
//! statistics and search over the free-form memory containers.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::handlers::create_sequenced;
use crate::{ensure_range, ApiError, ApiResult, AppState};
use agentboard_core::document::{doc_ts, now_ts, str_field, truncate, ts_to_iso};
use agentboard_store::{QueryFilter, SqlQuery};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryLayer {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub container: &'static str,
}

pub static MEMORY_LAYERS: [MemoryLayer; 4] = [
    MemoryLayer {
        id: "layer_1",
        name: "Constitutional Identity",
        description: "Immutable core identity and principles",
        container: "identity_cards",
    },
    MemoryLayer {
        id: "layer_2",
        name: "Compliance Dynamics",
        description: "Dynamic compliance and governance rules",
        container: "processes",
    },
    MemoryLayer {
        id: "layer_3",
        name: "Operational Context",
        description: "Current operational context and working memory",
        container: "memory_contexts",
    },
    MemoryLayer {
        id: "layer_4",
        name: "Log Analysis",
        description: "Historical logs and performance analysis",
        container: "logs",
    },
];

const OVERVIEW_ITEMS: usize = 10;
const DETAIL_ITEMS: usize = 50;
const PREVIEW_CHARS: usize = 200;

pub fn find_layer(layer_id: &str) -> ApiResult<&'static MemoryLayer> {
    MEMORY_LAYERS
        .iter()
        .find(|layer| layer.id == layer_id)
        .ok_or_else(|| ApiError::NotFound(format!("memory layer '{layer_id}'")))
}

/// Displayable content: `content`, else `context`, else `message`.
fn item_content(item: &Value) -> String {
    ["content", "context", "message"]
        .iter()
        .find_map(|field| match item.get(*field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
        .unwrap_or_else(|| "No content".to_string())
}

fn item_view(item: &Value, content: String) -> Map<String, Value> {
    let mut view = Map::new();
    view.insert("id".into(), item.get("id").cloned().unwrap_or(Value::Null));
    view.insert("content".into(), Value::String(content));
    view.insert(
        "timestamp".into(),
        json!(doc_ts(item).and_then(ts_to_iso)),
    );
    view.insert("agent_name".into(), json!(str_field(item, &["agent_name"])));
    view.insert(
        "type".into(),
        json!(str_field(item, &["type"]).unwrap_or("unknown")),
    );
    view
}

async fn newest(
    state: &AppState,
    container: &str,
    limit: usize,
) -> agentboard_core::Result<Vec<Value>> {
    let query = SqlQuery::new(format!(
        "SELECT * FROM c ORDER BY c._ts DESC OFFSET 0 LIMIT {limit}"
    ));
    state.store.query(container, &query).await
}

async fn layer_overview(state: &AppState, layer: &MemoryLayer) -> Value {
    let mut overview = json!({
        "name": layer.name,
        "description": layer.description,
        "container": layer.container,
        "status": "active",
        "item_count": 0,
        "last_updated": null,
        "items": [],
    });

    let loaded = async {
        let count = state.store.count(layer.container).await?;
        let items = newest(state, layer.container, OVERVIEW_ITEMS).await?;
        Ok::<_, agentboard_core::AgentboardError>((count, items))
    }
    .await;

    match loaded {
        Ok((count, items)) => {
            overview["item_count"] = json!(count);
            overview["last_updated"] = json!(items.first().and_then(doc_ts).and_then(ts_to_iso));
            overview["items"] = Value::Array(
                items
                    .iter()
                    .map(|item| {
                        let preview = truncate(&item_content(item), PREVIEW_CHARS);
                        Value::Object(item_view(item, preview))
                    })
                    .collect(),
            );
        }
        Err(e) => {
            debug!("Could not query {} for {}: {}", layer.container, layer.id, e);
            overview["status"] = json!("error");
            overview["error"] = json!(e.to_string());
        }
    }
    overview
}

pub async fn memory_layers(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let overviews = futures::future::join_all(
        MEMORY_LAYERS
            .iter()
            .map(|layer| layer_overview(&state, layer)),
    )
    .await;

    let mut layers = Map::new();
    let mut active = 0;
    let mut total_items = 0;
    for (layer, overview) in MEMORY_LAYERS.iter().zip(overviews) {
        if overview["status"] == "active" {
            active += 1;
        }
        total_items += overview["item_count"].as_u64().unwrap_or(0);
        layers.insert(layer.id.to_string(), overview);
    }

    Ok(Json(json!({
        "success": true,
        "layers": layers,
        "summary": {
            "total_layers": MEMORY_LAYERS.len(),
            "active_layers": active,
            "total_items": total_items,
            "system_status": if active == MEMORY_LAYERS.len() { "healthy" } else { "degraded" },
        },
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

pub async fn memory_layer_details(
    State(state): State<AppState>,
    Path(layer_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let layer = find_layer(&layer_id)?;
    let items = newest(&state, layer.container, DETAIL_ITEMS).await?;
    let processed: Vec<Value> = items
        .iter()
        .map(|item| {
            let mut view = item_view(item, item_content(item));
            view.insert("raw_data".into(), item.clone());
            Value::Object(view)
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "layer_id": layer.id,
        "container": layer.container,
        "total_count": processed.len(),
        "items": processed,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

pub async fn add_memory_item(
    State(state): State<AppState>,
    Path(layer_id): Path<String>,
    Json(item): Json<Value>,
) -> ApiResult<Json<Value>> {
    let layer = find_layer(&layer_id)?;
    let Value::Object(fields) = item else {
        return Err(ApiError::Validation("memory item must be a JSON object".into()));
    };

    let now = Utc::now();
    let mut doc = Map::new();
    doc.insert("timestamp".into(), json!(now.to_rfc3339()));
    doc.insert("_ts".into(), json!(now_ts()));
    // caller fields win over the generated ones
    doc.extend(fields);

    let caller_id = doc
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    let stored = if caller_id {
        state.store.create(layer.container, Value::Object(doc)).await?
    } else {
        let id_base = format!("{}_{}", layer.id, now.format("%Y%m%d_%H%M%S"));
        create_sequenced(state.store.as_ref(), layer.container, &id_base, doc).await?
    };
    state.graph.record_write(layer.container, &stored);
    state.invalidate_container(layer.container).await;

    let item_id = stored.get("id").cloned().unwrap_or(Value::Null);
    info!("Added {} to memory {}", item_id, layer.id);
    Ok(Json(json!({
        "success": true,
        "layer_id": layer.id,
        "item_id": item_id,
        "message": format!("Item added to {}", layer.id),
    })))
}

/// Containers holding free-form memory records, in search order.
const MEMORY_CONTAINERS: [&str; 4] = [
    "memory_contexts",
    "memory_layers",
    "agent_memory",
    "working_contexts",
];

/// Record `type` values and their display names.
const LAYER_TYPES: [(&str, &str); 4] = [
    ("constitutional", "Constitutional Identity"),
    ("compliance", "Compliance Dynamics"),
    ("operational", "Operational Context"),
    ("analysis", "Log Analysis"),
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryTally {
    pub count: usize,
    pub size_bytes: u64,
    pub types: BTreeMap<String, usize>,
    pub agents: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MemoryTally {
    pub fn record(&mut self, doc: &Value) {
        self.count += 1;
        self.size_bytes += doc.get("size_bytes").and_then(Value::as_u64).unwrap_or(0);
        let kind = str_field(doc, &["type"]).unwrap_or("unknown").to_string();
        *self.types.entry(kind).or_insert(0) += 1;
        let agent = str_field(doc, &["agent_name"]).unwrap_or("unknown").to_string();
        *self.agents.entry(agent).or_insert(0) += 1;
    }

    fn absorb(&mut self, other: &MemoryTally) {
        self.count += other.count;
        self.size_bytes += other.size_bytes;
        for (kind, n) in &other.types {
            *self.types.entry(kind.clone()).or_insert(0) += n;
        }
        for (agent, n) in &other.agents {
            *self.agents.entry(agent.clone()).or_insert(0) += n;
        }
    }
}

pub async fn memory_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let query = SqlQuery::new("SELECT * FROM c");
    let mut totals = MemoryTally::default();
    let mut containers = BTreeMap::new();
    for container in MEMORY_CONTAINERS {
        let mut tally = MemoryTally::default();
        match state.store.query(container, &query).await {
            Ok(docs) => docs.iter().for_each(|doc| tally.record(doc)),
            Err(e) => {
                debug!("Memory container {} not readable: {}", container, e);
                tally.error = Some(e.to_string());
            }
        }
        totals.absorb(&tally);
        containers.insert(container, tally);
    }

    let layer_types: BTreeMap<&str, &str> = LAYER_TYPES.into_iter().collect();
    Ok(Json(json!({
        "success": true,
        "stats": {
            "total_layers": totals.count,
            "layers_by_type": totals.types,
            "layers_by_agent": totals.agents,
            "total_size_bytes": totals.size_bytes,
            "containers": containers,
        },
        "layer_types_available": layer_types,
    })))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySearchRequest {
    pub layer_type: Option<String>,
    pub agent_name: Option<String>,
    pub search_term: Option<String>,
    pub limit: Option<usize>,
}

fn filled(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or_default()
}

pub fn memory_search_query(request: &MemorySearchRequest, limit: usize) -> SqlQuery {
    let order = format!("ORDER BY c._ts DESC OFFSET 0 LIMIT {limit}");
    QueryFilter::new()
        .add_type("type", filled(&request.layer_type))
        .add_agent("agent_name", filled(&request.agent_name))
        .add_text_search(&["name", "description", "data"], filled(&request.search_term))
        .build("SELECT * FROM c", Some(order.as_str()))
}

/// Fields of `record` whose text contains `term`, case-insensitively.
fn highlights(record: &Value, term: &str) -> Vec<Value> {
    let needle = term.to_lowercase();
    ["name", "description"]
        .iter()
        .filter_map(|field| {
            let value = record.get(*field)?.as_str()?;
            value
                .to_lowercase()
                .contains(&needle)
                .then(|| json!({ "field": field, "value": value }))
        })
        .collect()
}

/// Merge per-container hits: first occurrence of an id wins, newest first.
pub fn merge_hits(hits: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Value> = hits
        .into_iter()
        .filter(|hit| {
            let id = str_field(hit, &["id", "_rid"]).unwrap_or_default().to_string();
            seen.insert(id)
        })
        .collect();
    unique.sort_by_key(|hit| Reverse(doc_ts(hit).unwrap_or(0)));
    unique
}

pub async fn memory_search(
    State(state): State<AppState>,
    Json(request): Json<MemorySearchRequest>,
) -> ApiResult<Json<Value>> {
    let limit = ensure_range("limit", request.limit.unwrap_or(50), 1, 1000)?;
    let query = memory_search_query(&request, limit);
    let term = filled(&request.search_term);

    let mut hits = Vec::new();
    let mut searched = BTreeSet::new();
    for container in MEMORY_CONTAINERS {
        let records = match state.store.query(container, &query).await {
            Ok(records) => records,
            Err(e) => {
                debug!("Memory container {} not searchable: {}", container, e);
                continue;
            }
        };
        if !records.is_empty() {
            searched.insert(container);
        }
        for mut record in records {
            let marks = (!term.is_empty()).then(|| highlights(&record, term));
            if let Some(map) = record.as_object_mut() {
                map.insert("_container".into(), json!(container));
                if let Some(marks) = marks {
                    map.insert("_search_highlights".into(), Value::Array(marks));
                }
            }
            hits.push(record);
        }
    }

    let mut results = merge_hits(hits);
    let count = results.len();
    results.truncate(limit);
    Ok(Json(json!({
        "success": true,
        "results": results,
        "count": count,
        "query": request,
        "containers_searched": searched.len(),
    })))
}
