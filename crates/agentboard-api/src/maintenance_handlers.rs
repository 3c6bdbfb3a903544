//! Duplicate detection and cleanup for the log and message containers.

use std::collections::{BTreeMap, HashMap};

use crate::{ApiError, ApiResult, AppState};
use agentboard_core::AgentboardError;
use agentboard_store::SqlQuery;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Checked in order; the first one the store has is used.
const LOG_CONTAINERS: [&str; 4] = ["logs", "agent_logs", "system_logs", "agent_session_logs"];
const MESSAGE_CONTAINERS: [&str; 3] = ["system_inbox", "user_messages", "inbox"];
const DETAIL_LIMIT: usize = 10;
const FIELD_SEPARATOR: &str = "\u{1f}";

async fn resolve_container(
    state: &AppState,
    candidates: &[&'static str],
    kind: &str,
) -> ApiResult<&'static str> {
    let known = state.store.list_containers().await?;
    candidates
        .iter()
        .copied()
        .find(|name| known.iter().any(|info| info.id == *name))
        .ok_or_else(|| ApiError::NotFound(format!("no {kind} container")))
}

async fn all_documents(state: &AppState, container: &str) -> ApiResult<Vec<Value>> {
    Ok(state
        .store
        .query(container, &SqlQuery::new("SELECT * FROM c"))
        .await?)
}

/// Field as text: strings verbatim, missing or null as empty, anything else
/// as JSON.
fn text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn non_empty_str<'a>(doc: &'a Value, field: &str) -> Option<&'a str> {
    doc.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn log_type(log: &Value) -> String {
    non_empty_str(log, "logType")
        .or_else(|| non_empty_str(log, "type"))
        .unwrap_or("unknown")
        .to_string()
}

/// Identity of a log's content. Terminal captures are keyed by session and
/// conversation, agent logs by agent, action and timestamp.
pub fn log_fingerprint(log: &Value) -> String {
    let fields = if let Some(flow) = log.get("conversation_flow") {
        vec![
            text(log.pointer("/session_metadata/session_id")),
            flow.to_string(),
        ]
    } else if let Some(agent) = non_empty_str(log, "agentName") {
        vec![
            agent.to_string(),
            text(log.get("action")),
            text(log.get("timestamp")),
        ]
    } else {
        vec![
            text(log.get("content")),
            text(log.get("complete_conversation_flow")),
        ]
    };
    fields.join(FIELD_SEPARATOR)
}

pub fn message_fingerprint(message: &Value) -> String {
    ["subject", "content", "from", "to"]
        .iter()
        .map(|field| text(message.get(*field)))
        .collect::<Vec<_>>()
        .join(FIELD_SEPARATOR)
}

/// A terminal capture holding both sides of the conversation, or one that
/// reports its own completeness.
fn is_complete_capture(log: &Value) -> bool {
    match log.get("conversation_flow") {
        Some(flow) => {
            let items = flow.as_array().map(Vec::as_slice).unwrap_or_default();
            let has = |kind: &str| {
                items
                    .iter()
                    .any(|item| item.get("type").and_then(Value::as_str) == Some(kind))
            };
            has("user_input") && has("claude_response")
        }
        None => log.get("capture_completeness").is_some(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogDuplicate {
    pub original_id: String,
    pub duplicate_id: String,
    #[serde(rename = "type")]
    pub log_type: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogAnalysis {
    pub total_logs: usize,
    pub duplicates: usize,
    pub duplicate_details: Vec<LogDuplicate>,
    pub terminal_logs: usize,
    pub valid_terminal_logs: usize,
    pub agent_logs: usize,
    pub log_types: BTreeMap<String, usize>,
}

pub fn log_analysis(logs: &[Value]) -> LogAnalysis {
    let mut analysis = LogAnalysis {
        total_logs: logs.len(),
        ..LogAnalysis::default()
    };
    let mut first_seen: HashMap<String, &Value> = HashMap::new();

    for log in logs {
        let fingerprint = log_fingerprint(log);
        match first_seen.get(&fingerprint) {
            Some(original) => {
                analysis.duplicates += 1;
                if analysis.duplicate_details.len() < DETAIL_LIMIT {
                    analysis.duplicate_details.push(LogDuplicate {
                        original_id: text(original.get("id")),
                        duplicate_id: non_empty_str(log, "id").unwrap_or("unknown").to_string(),
                        log_type: log_type(log),
                    });
                }
            }
            None => {
                first_seen.insert(fingerprint, log);
            }
        }

        let terminal = log.get("conversation_flow").is_some()
            || log.to_string().to_lowercase().contains("terminal");
        if terminal {
            analysis.terminal_logs += 1;
            if is_complete_capture(log) {
                analysis.valid_terminal_logs += 1;
            }
        } else if non_empty_str(log, "agentName").is_some() {
            analysis.agent_logs += 1;
        }

        *analysis.log_types.entry(log_type(log)).or_insert(0) += 1;
    }
    analysis
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDuplicates {
    pub subject: String,
    pub copies: usize,
    /// Every copy but the first.
    pub duplicate_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageAnalysis {
    pub total_messages: usize,
    pub duplicate_groups: usize,
    pub total_duplicates: usize,
    pub duplicate_details: Vec<MessageDuplicates>,
}

pub fn message_analysis(messages: &[Value]) -> MessageAnalysis {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<&Value>> = Vec::new();
    for message in messages {
        let slot = *slots
            .entry(message_fingerprint(message))
            .or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
        groups[slot].push(message);
    }

    let mut analysis = MessageAnalysis {
        total_messages: messages.len(),
        ..MessageAnalysis::default()
    };
    for group in groups.iter().filter(|g| g.len() > 1) {
        analysis.duplicate_groups += 1;
        analysis.total_duplicates += group.len() - 1;
        if analysis.duplicate_details.len() < DETAIL_LIMIT {
            analysis.duplicate_details.push(MessageDuplicates {
                subject: non_empty_str(group[0], "subject")
                    .unwrap_or("No subject")
                    .to_string(),
                copies: group.len(),
                duplicate_ids: group[1..].iter().map(|m| text(m.get("id"))).collect(),
            });
        }
    }
    analysis
}

pub async fn analyze_logs(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let container = resolve_container(&state, &LOG_CONTAINERS, "logs").await?;
    let logs = all_documents(&state, container).await?;
    Ok(Json(json!({
        "success": true,
        "container": container,
        "analysis": log_analysis(&logs),
    })))
}

pub async fn analyze_messages(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let container = resolve_container(&state, &MESSAGE_CONTAINERS, "messages").await?;
    let messages = all_documents(&state, container).await?;
    Ok(Json(json!({
        "success": true,
        "container": container,
        "analysis": message_analysis(&messages),
    })))
}

#[derive(Debug, Deserialize)]
pub struct RemoveDuplicatesRequest {
    #[serde(default)]
    pub duplicate_ids: Vec<String>,
}

async fn remove_documents(
    state: &AppState,
    container: &str,
    ids: &[String],
    label: &str,
) -> ApiResult<Json<Value>> {
    if ids.is_empty() {
        return Err(ApiError::Validation("No duplicate IDs provided".into()));
    }

    let mut removed = 0usize;
    let mut errors = Vec::new();
    for id in ids {
        match state.store.delete(container, id, None).await {
            Ok(()) => {
                state.graph.record_delete(container, id);
                removed += 1;
            }
            Err(AgentboardError::NotFound(_)) => {
                errors.push(json!({"id": id, "error": format!("{label} not found")}));
            }
            Err(e) => {
                warn!("Could not delete {} from {}: {}", id, container, e);
                errors.push(json!({"id": id, "error": e.to_string()}));
            }
        }
    }
    if removed > 0 {
        state.invalidate_container(container).await;
    }
    info!("Removed {} duplicates from {}", removed, container);

    Ok(Json(json!({
        "success": true,
        "container": container,
        "removed": removed,
        "errors": errors,
    })))
}

pub async fn remove_duplicate_logs(
    State(state): State<AppState>,
    Json(request): Json<RemoveDuplicatesRequest>,
) -> ApiResult<Json<Value>> {
    let container = resolve_container(&state, &LOG_CONTAINERS, "logs").await?;
    remove_documents(&state, container, &request.duplicate_ids, "Log").await
}

pub async fn remove_duplicate_messages(
    State(state): State<AppState>,
    Json(request): Json<RemoveDuplicatesRequest>,
) -> ApiResult<Json<Value>> {
    let container = resolve_container(&state, &MESSAGE_CONTAINERS, "messages").await?;
    remove_documents(&state, container, &request.duplicate_ids, "Message").await
}
