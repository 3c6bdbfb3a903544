//! Agent overview built from recent activity across the agent containers.

use crate::{ApiError, ApiResult, AppState};
use agentboard_cache::CacheKey;
use agentboard_core::document::{doc_ts, field_text, now_ts, str_field, truncate, ts_to_iso};
use agentboard_store::{execute_batch, BatchRequest, SqlQuery};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Containers scanned for agent names.
pub const ACTIVITY_CONTAINERS: &[&str] = &[
    "agent_logs",
    "agent_session_logs",
    "working_contexts",
    "memory_contexts",
    "journal_entries",
    "agent_status",
];

const DISCOVERY_WINDOW_SECS: i64 = 7 * 24 * 3600;
const ACTIVE_WINDOW_SECS: i64 = 2 * 3600;
const IDLE_WINDOW_SECS: i64 = 24 * 3600;
const MAX_AGENTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Idle,
    Offline,
    Unknown,
}

/// Status from the age of the agent's latest log entry.
pub fn classify_status(last_ts: i64, now: i64) -> AgentStatus {
    if last_ts > now - ACTIVE_WINDOW_SECS {
        AgentStatus::Active
    } else if last_ts > now - IDLE_WINDOW_SECS {
        AgentStatus::Idle
    } else {
        AgentStatus::Offline
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentMessage {
    pub content: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_name: String,
    pub current_activity: String,
    pub current_task: String,
    pub todos_count: u64,
    pub completed_tasks_count: u64,
    pub last_seen: Option<String>,
    pub recent_messages: Vec<RecentMessage>,
    pub status: AgentStatus,
}

impl AgentInfo {
    fn empty(agent_name: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            current_activity: "No recent activity".to_string(),
            current_task: "No active task".to_string(),
            todos_count: 0,
            completed_tasks_count: 0,
            last_seen: None,
            recent_messages: Vec::new(),
            status: AgentStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSummary {
    pub total_agents: usize,
    pub active_agents: usize,
    pub idle_agents: usize,
    pub offline_agents: usize,
}

impl AgentSummary {
    fn of(agents: &[AgentInfo]) -> Self {
        let count = |status| agents.iter().filter(|a| a.status == status).count();
        Self {
            total_agents: agents.len(),
            active_agents: count(AgentStatus::Active),
            idle_agents: count(AgentStatus::Idle),
            offline_agents: count(AgentStatus::Offline),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsOverview {
    pub success: bool,
    pub agents: Vec<AgentInfo>,
    pub summary: AgentSummary,
}

pub async fn agents_status(State(state): State<AppState>) -> ApiResult<Json<AgentsOverview>> {
    Ok(Json(cached_overview(&state).await?))
}

async fn cached_overview(state: &AppState) -> ApiResult<AgentsOverview> {
    let key = CacheKey::new("agents", "status");
    state
        .cache
        .get_or_try_insert_with(&key, || async move {
            Ok::<_, ApiError>(build_overview(state).await)
        })
        .await
}

async fn build_overview(state: &AppState) -> AgentsOverview {
    let names = discover_agents(state).await;
    if names.is_empty() {
        info!("No agents found in recent activity");
        let placeholder = AgentInfo {
            current_activity: "Check agent_logs, working_contexts containers".to_string(),
            current_task: "No recent agent activity detected".to_string(),
            ..AgentInfo::empty("No agents found in recent activity")
        };
        return AgentsOverview {
            success: true,
            agents: vec![placeholder],
            summary: AgentSummary::default(),
        };
    }

    let mut agents = join_all(names.iter().map(|name| agent_details(state, name))).await;
    agents.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

    AgentsOverview {
        success: true,
        summary: AgentSummary::of(&agents),
        agents,
    }
}

/// Distinct agent names active within the discovery window, in container order.
async fn discover_agents(state: &AppState) -> Vec<String> {
    let recent_ts = now_ts() - DISCOVERY_WINDOW_SECS;
    let requests: Vec<BatchRequest> = ACTIVITY_CONTAINERS
        .iter()
        .map(|container| {
            BatchRequest::new(
                *container,
                SqlQuery::new(
                    "SELECT DISTINCT c.agent_name FROM c \
                     WHERE c.agent_name != null AND c._ts > @recent_ts",
                )
                .param("@recent_ts", recent_ts),
            )
        })
        .collect();

    let mut names: Vec<String> = Vec::new();
    for rows in execute_batch(state.store.as_ref(), &state.registry, &requests).await {
        for row in rows {
            let Some(name) = row.get("agent_name").and_then(Value::as_str).map(str::trim) else {
                continue;
            };
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
            if names.len() >= MAX_AGENTS {
                return names;
            }
        }
    }
    names
}

/// Latest logs, open todos, completed sessions and journal entries of one agent.
async fn agent_details(state: &AppState, agent_name: &str) -> AgentInfo {
    let scoped = |text: &str| {
        SqlQuery::new(text)
            .param("@agent_name", agent_name)
            .with_partition_key(agent_name)
    };
    let requests = [
        BatchRequest::new(
            "agent_logs",
            scoped("SELECT TOP 5 * FROM c WHERE c.agent_name = @agent_name ORDER BY c._ts DESC"),
        ),
        BatchRequest::new(
            "working_contexts",
            scoped(
                "SELECT VALUE COUNT(1) FROM c WHERE c.agent_name = @agent_name \
                 AND (c.status = 'pending' OR c.status = 'active' OR c.status IS NULL)",
            ),
        ),
        BatchRequest::new(
            "agent_session_logs",
            scoped(
                "SELECT VALUE COUNT(1) FROM c WHERE c.agent_name = @agent_name \
                 AND (c.status = 'completed' OR c.status = 'success')",
            ),
        ),
        BatchRequest::new(
            "journal_entries",
            scoped(
                "SELECT TOP 3 c.entry, c._ts FROM c WHERE c.agent_name = @agent_name \
                 ORDER BY c._ts DESC",
            ),
        ),
    ];

    let mut results = execute_batch(state.store.as_ref(), &state.registry, &requests)
        .await
        .into_iter();
    let logs = results.next().unwrap_or_default();
    let todos = results.next().unwrap_or_default();
    let completed = results.next().unwrap_or_default();
    let journal = results.next().unwrap_or_default();

    let mut info = AgentInfo::empty(agent_name);
    if let Some(latest) = logs.first() {
        let ts = doc_ts(latest).unwrap_or(0);
        info.last_seen = ts_to_iso(ts);
        info.current_activity = str_field(latest, &["action", "message"])
            .unwrap_or("Active")
            .to_string();
        info.status = classify_status(ts, now_ts());
    }
    info.todos_count = first_count(&todos);
    info.completed_tasks_count = first_count(&completed);
    info.recent_messages = journal
        .iter()
        .map(|entry| RecentMessage {
            content: truncate(&field_text(entry, "entry").unwrap_or_default(), 100),
            timestamp: doc_ts(entry).and_then(ts_to_iso),
        })
        .collect();

    debug!(
        "Agent {} is {:?} with {} open todos",
        agent_name, info.status, info.todos_count
    );
    info
}

fn first_count(rows: &[Value]) -> u64 {
    rows.first().and_then(Value::as_u64).unwrap_or(0)
}

pub async fn agent_details_handler(
    State(state): State<AppState>,
    Path(agent_name): Path<String>,
) -> ApiResult<Json<Value>> {
    let key = CacheKey::new("agent_details", "get")
        .with_params(&json!({ "agent_name": agent_name }));
    let state = &state;
    let details = state
        .cache
        .get_or_try_insert_with(&key, || async move {
            Ok::<_, ApiError>(agent_details(state, &agent_name).await)
        })
        .await?;
    Ok(Json(json!({ "success": true, "details": details })))
}

pub async fn agents_health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let overview = cached_overview(&state).await?;
    let summary = overview.summary;
    let active = summary.active_agents > 0;
    Ok(Json(json!({
        "success": true,
        "health": {
            "system_status": if active { "healthy" } else { "idle" },
            "health_score": if active { 100.0 } else { 50.0 },
            "total_agents": summary.total_agents,
            "active_agents": summary.active_agents,
            "idle_agents": summary.idle_agents,
            "offline_agents": summary.offline_agents,
            "last_updated": Utc::now().to_rfc3339(),
        }
    })))
}
