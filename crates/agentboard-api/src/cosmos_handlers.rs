//! Container browsing, document CRUD and ad-hoc queries.

use std::collections::BTreeMap;

use crate::{ensure_range, ApiError, ApiResult, AppState};
use agentboard_cache::CacheKey;
use agentboard_store::{
    container_filters, indexing_policy, limit_fields, FilterKind, QueryFilter, QueryParam,
    SqlQuery,
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Document listings above this page size are never cached.
const MAX_CACHED_PAGE: usize = 50;

/// Cache namespace of a container's document listings, kept apart from
/// fixed namespaces such as `containers`.
pub fn documents_namespace(container: &str) -> String {
    format!("docs/{container}")
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn mark_cached(mut value: Value, cached: bool) -> Value {
    if let Some(map) = value.as_object_mut() {
        map.insert("cached".into(), Value::Bool(cached));
    }
    value
}

#[derive(Debug, Deserialize)]
pub struct ContainerListParams {
    #[serde(default)]
    pub count_docs: bool,
    pub use_cache: Option<bool>,
}

pub async fn list_containers(
    State(state): State<AppState>,
    Query(params): Query<ContainerListParams>,
) -> ApiResult<Json<Value>> {
    let use_cache = params.use_cache.unwrap_or(true);
    let key = CacheKey::new("containers", "list")
        .with_params(&json!({ "count_docs": params.count_docs }));
    if use_cache {
        if let Some(cached) = state.cache.get::<Value>(&key).await {
            return Ok(Json(mark_cached(cached, true)));
        }
    }

    let mut containers = Vec::new();
    for info in state.store.list_containers().await? {
        let count = if params.count_docs {
            state.store.count(&info.id).await? as i64
        } else {
            -1
        };
        containers.push(json!({
            "id": info.id,
            "partitionKey": info.partition_key_path.clone().unwrap_or_default(),
            "count": count,
        }));
    }
    if params.count_docs {
        containers.sort_by_key(|c| std::cmp::Reverse(c["count"].as_i64().unwrap_or(0)));
    } else {
        containers.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
    }

    let result = json!({
        "success": true,
        "containers": containers,
        "timestamp": now_iso(),
    });
    if use_cache {
        state.cache.set(&key, &result).await;
    }
    Ok(Json(mark_cached(result, false)))
}

#[derive(Debug, Default, Deserialize)]
pub struct DocumentListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub filter_field: Option<String>,
    pub filter_value: Option<String>,
    pub date_range: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub agent: Option<String>,
    pub doc_type: Option<String>,
    pub search: Option<String>,
    pub partition_key: Option<String>,
    pub use_cache: Option<bool>,
}

/// Start of a named dashboard date range.
pub fn date_range_start(range: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match range {
        "today" => now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|start| start.and_utc()),
        "week" => Some(now - Duration::days(7)),
        "month" => Some(now - Duration::days(30)),
        "quarter" => Some(now - Duration::days(90)),
        _ => None,
    }
}

fn is_identifier(field: &str) -> bool {
    field
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Translate listing parameters into a filtered, ordered and paged query.
pub fn document_query(
    container: &str,
    params: &DocumentListParams,
    limit: usize,
    offset: usize,
) -> ApiResult<SqlQuery> {
    let config = container_filters(container);
    let require = |kind: FilterKind, name: &str| -> ApiResult<()> {
        if config.supports(kind) {
            Ok(())
        } else {
            Err(ApiError::BadRequest(format!(
                "filter '{name}' is not supported for container '{container}'"
            )))
        }
    };

    let mut filter = QueryFilter::new();
    if let Some(field) = non_empty(&params.filter_field) {
        if !is_identifier(field) {
            return Err(ApiError::Validation(format!("invalid filter_field '{field}'")));
        }
        if let Some(value) = non_empty(&params.filter_value) {
            filter.add_equals("filterValue", field, value);
        }
    }
    if let Some(range) = non_empty(&params.date_range) {
        require(FilterKind::Date, "date_range")?;
        let start = date_range_start(range, Utc::now()).ok_or_else(|| {
            ApiError::Validation(format!(
                "date_range must be one of today, week, month, quarter (got '{range}')"
            ))
        })?;
        filter.add_date_range("_ts", Some(start), None);
    }
    if let Some(category) = non_empty(&params.category) {
        require(FilterKind::Category, "category")?;
        filter.add_category("category", category);
    }
    if let Some(status) = non_empty(&params.status) {
        require(FilterKind::Status, "status")?;
        filter.add_status("status", status);
    }
    if let Some(agent) = non_empty(&params.agent) {
        require(FilterKind::Agent, "agent")?;
        filter.add_agent("agent_name", agent);
    }
    if let Some(doc_type) = non_empty(&params.doc_type) {
        require(FilterKind::Type, "doc_type")?;
        filter.add_type("type", doc_type);
    }
    if let Some(term) = non_empty(&params.search) {
        filter.add_text_search(&config.fields, term);
    }

    let order_field = if container == "system_inbox" { "timestamp" } else { "_ts" };
    Ok(filter.build(
        "SELECT * FROM c",
        Some(&format!(
            "ORDER BY c.{order_field} DESC OFFSET {offset} LIMIT {limit}"
        )),
    ))
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(container): Path<String>,
    Query(params): Query<DocumentListParams>,
) -> ApiResult<Json<Value>> {
    let limit = ensure_range("limit", params.limit.unwrap_or(20), 1, 100)?;
    let offset = params.offset.unwrap_or(0);
    let query = document_query(&container, &params, limit, offset)?;
    let query = match non_empty(&params.partition_key) {
        Some(partition_key) => {
            query
                .optimize(&state.registry, &container, Some(partition_key))
                .0
        }
        None => query,
    };

    let cacheable = params.use_cache.unwrap_or(true) && limit <= MAX_CACHED_PAGE;
    let namespace = documents_namespace(&container);
    let key = CacheKey::new(&namespace, "documents").with_params(&json!({
        "text": query.text,
        "parameters": query.parameters,
        "partition_key": query.partition_key,
    }));
    if cacheable {
        if let Some(cached) = state.cache.get::<Value>(&key).await {
            return Ok(Json(mark_cached(cached, true)));
        }
    }

    debug!("Listing {}: {}", container, query.text);
    let documents = state.store.query(&container, &query).await?;
    let result = json!({
        "success": true,
        "container": container,
        "count": documents.len(),
        "documents": documents,
        "offset": offset,
        "limit": limit,
        "filters": {
            "field": params.filter_field,
            "value": params.filter_value,
            "date_range": params.date_range,
            "category": params.category,
            "status": params.status,
            "agent": params.agent,
            "type": params.doc_type,
            "search": params.search,
        },
        "timestamp": now_iso(),
    });
    if cacheable {
        let ttl = state.cache.ttl_for("documents");
        state.cache.set_with_ttl(&key, &result, ttl).await;
    }
    Ok(Json(mark_cached(result, false)))
}

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub data: Value,
}

pub async fn create_document(
    State(state): State<AppState>,
    Path(container): Path<String>,
    Json(request): Json<CreateDocumentRequest>,
) -> ApiResult<Json<Value>> {
    let known = state
        .store
        .list_containers()
        .await?
        .iter()
        .any(|info| info.id == container);
    if !known {
        return Err(ApiError::NotFound(format!("container '{container}'")));
    }
    let Value::Object(mut data) = request.data else {
        return Err(ApiError::Validation("data must be a JSON object".into()));
    };

    let now = Utc::now();
    if !data.get("id").is_some_and(|id| id.as_str().is_some_and(|s| !s.is_empty())) {
        data.insert(
            "id".into(),
            json!(format!("{}_{}", container, now.format("%Y%m%d_%H%M%S_%6f"))),
        );
    }
    data.entry("timestamp").or_insert_with(|| json!(now.to_rfc3339()));

    let stored = state.store.create(&container, Value::Object(data)).await?;
    state.graph.record_write(&container, &stored);
    state.invalidate_container(&container).await;
    state.cache.invalidate_namespace("containers").await;

    let document_id = stored.get("id").cloned().unwrap_or(Value::Null);
    info!("Created document {} in {}", document_id, container);
    Ok(Json(json!({
        "success": true,
        "document_id": document_id,
        "container": container,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DocumentKeyParams {
    pub partition_key: Option<String>,
}

pub async fn get_document(
    State(state): State<AppState>,
    Path((container, document_id)): Path<(String, String)>,
    Query(params): Query<DocumentKeyParams>,
) -> ApiResult<Json<Value>> {
    let document = state
        .store
        .read(&container, &document_id, non_empty(&params.partition_key))
        .await?;
    Ok(Json(json!({ "success": true, "document": document })))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path((container, document_id)): Path<(String, String)>,
    Query(params): Query<DocumentKeyParams>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .delete(&container, &document_id, non_empty(&params.partition_key))
        .await?;
    state.graph.record_delete(&container, &document_id);
    state.invalidate_container(&container).await;
    state.cache.invalidate_namespace("containers").await;
    info!("Deleted document {} from {}", document_id, container);
    Ok(Json(json!({
        "success": true,
        "deleted": document_id,
        "container": container,
    })))
}

pub async fn get_indexing_policy(Path(container): Path<String>) -> Json<Value> {
    Json(json!({
        "success": true,
        "container": container,
        "policy": indexing_policy(&container),
    }))
}

pub async fn get_container_filters(Path(container): Path<String>) -> Json<Value> {
    Json(json!({
        "success": true,
        "filters": container_filters(&container),
        "container": container,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub use_cache: Option<bool>,
}

pub async fn database_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult<Json<Value>> {
    let use_cache = params.use_cache.unwrap_or(true);
    let key = CacheKey::new("containers", "stats");
    if use_cache {
        if let Some(cached) = state.cache.get::<Value>(&key).await {
            return Ok(Json(mark_cached(cached, true)));
        }
    }

    let mut counts = BTreeMap::new();
    let mut total = 0u64;
    for info in state.store.list_containers().await? {
        match state.store.count(&info.id).await {
            Ok(count) => {
                total += count;
                counts.insert(info.id, count);
            }
            Err(e) => warn!("Could not count {}: {}", info.id, e),
        }
    }

    let result = json!({
        "success": true,
        "stats": {
            "database": state.settings.cosmos.database,
            "backend": state.store.name(),
            "containers": counts,
            "totalDocuments": total,
            "cacheEnabled": state.cache.is_enabled(),
            "timestamp": now_iso(),
        },
    });
    if use_cache {
        state.cache.set(&key, &result).await;
    }
    Ok(Json(mark_cached(result, false)))
}

/// Fields the cross-container search matches against.
const SEARCH_FIELDS: [&str; 6] = ["content", "subject", "action", "id", "agentName", "from"];
/// Searches returning more hits than this are not cached.
const MAX_CACHED_HITS: usize = 50;
const USER_CONTENT_CONTAINER: &str = "system_inbox";

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    /// Comma-separated container ids; every container when absent.
    pub containers: Option<String>,
    pub limit: Option<usize>,
    pub use_cache: Option<bool>,
}

/// Newest `limit` documents whose searchable fields contain `term`.
pub fn search_query(term: &str, limit: usize) -> SqlQuery {
    QueryFilter::new()
        .add_text_search(&SEARCH_FIELDS, term)
        .build("SELECT TOP @limit * FROM c", Some("ORDER BY c._ts DESC"))
        .param("@limit", limit)
}

pub async fn search_documents(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Value>> {
    let term = non_empty(&params.q)
        .ok_or_else(|| ApiError::Validation("q is required".into()))?
        .to_string();
    let limit = ensure_range("limit", params.limit.unwrap_or(20), 1, 100)?;
    let requested: Vec<String> = params
        .containers
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    let use_cache = params.use_cache.unwrap_or(true);
    let key = CacheKey::new("search", "documents").with_params(&json!({
        "q": term,
        "containers": requested,
        "limit": limit,
    }));
    if use_cache {
        if let Some(cached) = state.cache.get::<Value>(&key).await {
            return Ok(Json(mark_cached(cached, true)));
        }
    }

    let mut containers: Vec<String> = state
        .store
        .list_containers()
        .await?
        .into_iter()
        .map(|info| info.id)
        .filter(|id| requested.is_empty() || requested.contains(id))
        .collect();
    containers.sort();

    let mut results = Vec::new();
    let mut searched = 0usize;
    for container in &containers {
        if results.len() >= limit {
            break;
        }
        searched += 1;
        let query = search_query(&term, limit - results.len());
        match state.store.query(container, &query).await {
            Ok(documents) => results.extend(documents.into_iter().map(|document| {
                json!({ "container": container, "document": document, "score": 1.0 })
            })),
            Err(e) => debug!("Search skipped {}: {}", container, e),
        }
    }

    let count = results.len();
    let result = json!({
        "success": true,
        "results": results,
        "count": count,
        "search_term": term,
        "containers_searched": searched,
        "timestamp": now_iso(),
    });
    if use_cache && count <= MAX_CACHED_HITS {
        let ttl = state.cache.ttl_for("documents") * 2;
        state.cache.set_with_ttl(&key, &result, ttl).await;
    }
    Ok(Json(mark_cached(result, false)))
}

fn newest_query(limit: usize) -> SqlQuery {
    SqlQuery::new(format!("SELECT * FROM c ORDER BY c._ts DESC OFFSET 0 LIMIT {limit}"))
}

/// Recent inbox messages, falling back to the first container whose name
/// mentions messages or an inbox.
pub async fn user_content(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    match state.store.query(USER_CONTENT_CONTAINER, &newest_query(10)).await {
        Ok(messages) => {
            return Ok(Json(json!({
                "success": true,
                "messages": messages,
                "container": USER_CONTENT_CONTAINER,
            })));
        }
        Err(e) => warn!("Cannot read {}: {}", USER_CONTENT_CONTAINER, e),
    }

    for info in state.store.list_containers().await? {
        let name = info.id.to_lowercase();
        let mentions = name.contains("message") || name.contains("inbox");
        if mentions && info.id != USER_CONTENT_CONTAINER {
            let messages = state.store.query(&info.id, &newest_query(5)).await?;
            return Ok(Json(json!({
                "success": true,
                "messages": messages,
                "container": info.id,
            })));
        }
    }
    Ok(Json(json!({
        "success": true,
        "messages": [],
        "container": null,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AdHocQuery {
    pub container: String,
    pub query: String,
    #[serde(default)]
    pub parameters: Vec<QueryParam>,
    pub partition_key: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

pub async fn run_query(
    State(state): State<AppState>,
    Json(request): Json<AdHocQuery>,
) -> ApiResult<Json<Value>> {
    if request.container.trim().is_empty() {
        return Err(ApiError::Validation("container is required".into()));
    }
    if request.query.trim().is_empty() {
        return Err(ApiError::Validation("query is required".into()));
    }

    let fields: Vec<&str> = request.fields.iter().map(String::as_str).collect();
    let text = limit_fields(&request.query, &fields);
    let query = SqlQuery {
        text,
        parameters: request.parameters,
        partition_key: None,
    };
    let (query, optimized) = query.optimize(
        &state.registry,
        &request.container,
        non_empty(&request.partition_key),
    );

    let documents = state.store.query(&request.container, &query).await?;
    Ok(Json(json!({
        "success": true,
        "container": request.container,
        "executed_query": query.text,
        "partition_key": optimized.partition_key,
        "partition_field": optimized.partition_field,
        "rewritten": optimized.rewritten,
        "count": documents.len(),
        "documents": documents,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn search_query_matches_text_fields_newest_first() {
        let query = search_query("Deploy", 7);
        assert!(query
            .text
            .starts_with("SELECT TOP @limit * FROM c WHERE (CONTAINS(LOWER(c.content), LOWER(@search))"));
        assert!(query
            .text
            .contains("CONTAINS(LOWER(c[\"from\"]), LOWER(@search))"));
        assert!(query.text.ends_with("ORDER BY c._ts DESC"));
        assert_eq!(query.params_map().get("@limit"), Some(&json!(7)));
        assert_eq!(query.params_map().get("@search"), Some(&json!("Deploy")));
        assert!(query.parse().is_ok());
    }

    #[test]
    fn date_ranges() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 15, 30, 0).unwrap();
        assert_eq!(
            date_range_start("today", now),
            Some(Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap())
        );
        assert_eq!(date_range_start("week", now), Some(now - Duration::days(7)));
        assert_eq!(date_range_start("quarter", now), Some(now - Duration::days(90)));
        assert_eq!(date_range_start("decade", now), None);
    }

    #[test]
    fn listing_query_orders_inbox_by_timestamp() {
        let params = DocumentListParams {
            status: Some("unread".into()),
            ..Default::default()
        };
        let query = document_query("system_inbox", &params, 20, 40).unwrap();
        assert_eq!(
            query.text,
            "SELECT * FROM c WHERE c.status = @status ORDER BY c.timestamp DESC OFFSET 40 LIMIT 20"
        );

        let query = document_query("agent_logs", &DocumentListParams::default(), 5, 0).unwrap();
        assert_eq!(query.text, "SELECT * FROM c ORDER BY c._ts DESC OFFSET 0 LIMIT 5");
    }

    #[test]
    fn unsupported_filters_are_rejected() {
        let params = DocumentListParams {
            agent: Some("alice".into()),
            ..Default::default()
        };
        assert!(document_query("system_inbox", &params, 20, 0).is_err());
        assert!(document_query("agent_logs", &params, 20, 0).is_ok());
    }

    #[test]
    fn filter_field_must_be_an_identifier() {
        let params = DocumentListParams {
            filter_field: Some("x = 1 OR 1".into()),
            filter_value: Some("y".into()),
            ..Default::default()
        };
        assert!(document_query("agent_logs", &params, 20, 0).is_err());

        let params = DocumentListParams {
            filter_field: Some("workspace".into()),
            filter_value: Some("main".into()),
            ..Default::default()
        };
        let query = document_query("documents", &params, 20, 0).unwrap();
        assert!(query.text.contains("c.workspace = @filterValue"));
    }
}
