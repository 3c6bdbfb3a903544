//! Inbox endpoints over the `system_inbox` container.

use std::collections::BTreeMap;

use crate::handlers::create_sequenced;
use crate::{ensure_range, ApiError, ApiResult, AppState};
use agentboard_core::document::{field_text, str_field};
use agentboard_store::SqlQuery;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

pub const INBOX: &str = "system_inbox";

#[derive(Debug, Deserialize)]
pub struct MessageListParams {
    pub agent: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AgentMessageParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// A single recipient or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    fn is_empty(&self) -> bool {
        match self {
            Recipients::One(to) => to.trim().is_empty(),
            Recipients::Many(to) => to.iter().all(|t| t.trim().is_empty()),
        }
    }
}

fn default_priority() -> String {
    "NORMAL".to_string()
}

fn default_message_type() -> String {
    "MESSAGE".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub from_agent: String,
    pub to: Recipients,
    pub content: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    pub subject: Option<String>,
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// Uniform view of an inbox document.
pub fn message_view(item: &Value) -> Value {
    json!({
        "id": item.get("id"),
        "from": item.get("from"),
        "to": item.get("to"),
        "content": item.get("content"),
        "timestamp": item.get("timestamp"),
        "status": str_field(item, &["status"]).unwrap_or("unknown"),
        "priority": str_field(item, &["priority"]).unwrap_or("NORMAL"),
        "type": str_field(item, &["type"]).unwrap_or("MESSAGE"),
        "subject": item.get("subject"),
        "thread_id": item.get("thread_id"),
    })
}

/// Build an inbox query from optional recipient and status filters.
pub fn inbox_query(agent: Option<&str>, status: Option<&str>, limit: usize) -> SqlQuery {
    let mut conditions = Vec::new();
    let mut query = SqlQuery::new("");
    if let Some(agent) = agent.filter(|a| !a.is_empty()) {
        conditions.push(r#"(c["to"] = @agent OR ARRAY_CONTAINS(c["to"], @agent))"#);
        query = query.param("@agent", agent);
    }
    if let Some(status) = status.filter(|s| !s.is_empty()) {
        conditions.push("c.status = @status");
        query = query.param("@status", status);
    }

    let mut text = "SELECT * FROM c".to_string();
    if !conditions.is_empty() {
        text.push_str(" WHERE ");
        text.push_str(&conditions.join(" AND "));
    }
    text.push_str(&format!(" ORDER BY c.timestamp DESC OFFSET 0 LIMIT {limit}"));
    query.text = text;
    query
}

async fn run_inbox_query(state: &AppState, query: SqlQuery) -> ApiResult<Vec<Value>> {
    let (query, optimized) = query.optimize(&state.registry, INBOX, None);
    debug!(
        "Inbox query (partition {:?}): {}",
        optimized.partition_key, query.text
    );
    Ok(state.store.query(INBOX, &query).await?)
}

pub async fn list_messages(
    State(state): State<AppState>,
    Query(params): Query<MessageListParams>,
) -> ApiResult<Json<Vec<Value>>> {
    let limit = ensure_range("limit", params.limit.unwrap_or(50), 1, 1000)?;
    let query = inbox_query(params.agent.as_deref(), params.status.as_deref(), limit);
    let items = run_inbox_query(&state, query).await?;
    Ok(Json(items.iter().map(message_view).collect()))
}

pub async fn agent_messages(
    State(state): State<AppState>,
    Path(agent_name): Path<String>,
    Query(params): Query<AgentMessageParams>,
) -> ApiResult<Json<Value>> {
    let limit = ensure_range("limit", params.limit.unwrap_or(50), 1, 1000)?;
    let query = inbox_query(Some(&agent_name), params.status.as_deref(), limit);
    let messages: Vec<Value> = run_inbox_query(&state, query)
        .await?
        .iter()
        .map(message_view)
        .collect();
    Ok(Json(json!({
        "agent": agent_name,
        "total": messages.len(),
        "messages": messages,
    })))
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Json<Value>> {
    if request.from_agent.trim().is_empty() {
        return Err(ApiError::Validation("from_agent is required".into()));
    }
    if request.to.is_empty() {
        return Err(ApiError::Validation("to is required".into()));
    }
    if request.content.trim().is_empty() {
        return Err(ApiError::Validation("content is required".into()));
    }

    let now = Utc::now();
    let id_base = format!("{}_{}", now.format("%Y%m%d_%H%M%S"), request.from_agent);
    let timestamp = now.to_rfc3339();

    let mut doc = Map::new();
    doc.insert("from".into(), json!(request.from_agent));
    doc.insert("to".into(), json!(request.to));
    doc.insert("content".into(), json!(request.content));
    doc.insert("timestamp".into(), json!(timestamp));
    doc.insert("status".into(), json!("unread"));
    doc.insert("priority".into(), json!(request.priority));
    doc.insert("type".into(), json!(request.message_type));
    doc.insert("category".into(), json!("inbox"));
    doc.insert("created_by".into(), json!("dashboard_api"));
    if let Some(subject) = request.subject.filter(|s| !s.is_empty()) {
        doc.insert("subject".into(), json!(subject));
    }
    if let Some(thread_id) = request.thread_id.filter(|t| !t.is_empty()) {
        doc.insert("thread_id".into(), json!(thread_id));
    }

    let stored = create_sequenced(state.store.as_ref(), INBOX, &id_base, doc).await?;
    let message_id = stored.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    state.graph.record_write(INBOX, &stored);
    state.invalidate_container(INBOX).await;
    info!("Message {} sent by {}", message_id, request.from_agent);

    Ok(Json(json!({
        "success": true,
        "message_id": message_id,
        "timestamp": timestamp,
    })))
}

pub async fn update_message_status(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Query(update): Query<StatusUpdate>,
) -> ApiResult<Json<Value>> {
    if update.status.trim().is_empty() {
        return Err(ApiError::Validation("status is required".into()));
    }
    let mut item = state.store.read(INBOX, &message_id, None).await?;
    match item.as_object_mut() {
        Some(map) => {
            map.insert("status".into(), json!(update.status));
        }
        None => {
            return Err(ApiError::Internal(format!(
                "message {message_id} is not an object"
            )))
        }
    }

    let stored = state.store.upsert(INBOX, item).await?;
    state.graph.record_write(INBOX, &stored);
    state.invalidate_container(INBOX).await;

    Ok(Json(json!({
        "success": true,
        "message_id": message_id,
        "new_status": update.status,
    })))
}

pub async fn message_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let query = SqlQuery::new(
        "SELECT * FROM c WHERE c.thread_id = @thread_id ORDER BY c.timestamp ASC",
    )
    .param("@thread_id", thread_id.as_str());
    let messages: Vec<Value> = run_inbox_query(&state, query)
        .await?
        .iter()
        .map(message_view)
        .collect();
    Ok(Json(json!({
        "thread_id": thread_id,
        "total": messages.len(),
        "messages": messages,
    })))
}

#[derive(Debug, Default, Serialize)]
pub struct MessageStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_sender: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
}

impl MessageStats {
    pub fn from_messages(items: &[Value]) -> Self {
        let mut stats = MessageStats {
            total: items.len(),
            ..Default::default()
        };
        let bump =
            |map: &mut BTreeMap<String, usize>, key: String| *map.entry(key).or_insert(0) += 1;
        for item in items {
            bump(
                &mut stats.by_type,
                field_text(item, "type").unwrap_or_else(|| "MESSAGE".into()),
            );
            bump(
                &mut stats.by_sender,
                field_text(item, "from").unwrap_or_else(|| "unknown".into()),
            );
            bump(
                &mut stats.by_priority,
                field_text(item, "priority").unwrap_or_else(|| "NORMAL".into()),
            );
            bump(
                &mut stats.by_status,
                field_text(item, "status").unwrap_or_else(|| "unknown".into()),
            );
        }
        stats
    }
}

pub async fn message_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let items = run_inbox_query(&state, SqlQuery::new("SELECT * FROM c")).await?;
    Ok(Json(json!({
        "success": true,
        "stats": MessageStats::from_messages(&items),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_query_binds_filters() {
        let query = inbox_query(Some("alice"), Some("unread"), 10);
        assert!(query.text.contains("ARRAY_CONTAINS"));
        assert!(query.text.ends_with("OFFSET 0 LIMIT 10"));
        assert_eq!(query.parameters.len(), 2);

        let query = inbox_query(None, Some(""), 5);
        assert_eq!(query.text, "SELECT * FROM c ORDER BY c.timestamp DESC OFFSET 0 LIMIT 5");
        assert!(query.parameters.is_empty());
    }

    #[test]
    fn view_fills_defaults() {
        let view = message_view(&json!({"id": "m1", "from": "bob"}));
        assert_eq!(view["status"], "unknown");
        assert_eq!(view["priority"], "NORMAL");
        assert_eq!(view["type"], "MESSAGE");
        assert!(view["subject"].is_null());
    }

    #[test]
    fn stats_group_by_fields() {
        let items = vec![
            json!({"from": "a", "type": "TASK", "priority": "HIGH", "status": "unread"}),
            json!({"from": "a", "status": "read"}),
            json!({"from": "b", "status": "unread"}),
        ];
        let stats = MessageStats::from_messages(&items);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_sender["a"], 2);
        assert_eq!(stats.by_type["MESSAGE"], 2);
        assert_eq!(stats.by_priority["NORMAL"], 2);
        assert_eq!(stats.by_status["unread"], 2);
    }

    #[test]
    fn recipients_accept_string_or_list() {
        let one: Recipients = serde_json::from_value(json!("alice")).unwrap();
        assert!(!one.is_empty());
        let many: Recipients = serde_json::from_value(json!(["", " "])).unwrap();
        assert!(many.is_empty());
    }
}
