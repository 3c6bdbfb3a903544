use crate::{ApiError, ApiResult, AppState};
use agentboard_core::AgentboardError;
use agentboard_store::DocumentStore;
use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Highest sequence tried for a generated id.
const MAX_ID_SEQUENCE: u32 = 99;

#[derive(Serialize)]
pub struct RootResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub store: String,
    pub cache: String,
    pub endpoints: Vec<&'static str>,
}

pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        name: "Agentboard API",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.env().to_string(),
        store: state.store.name().to_string(),
        cache: state.cache.backend_name().to_string(),
        endpoints: vec![
            "/health",
            "/metrics",
            "/api/v1/agents",
            "/api/v1/messages",
            "/api/v1/cosmos",
            "/api/v1/graph",
            "/api/v1/memory",
            "/api/v1/memory-layers",
            "/api/v1/monitoring",
        ],
    })
}

/// Create `doc` under the first free id `{base}_01`, `{base}_02`, ...
///
/// Writers that generate ids at second resolution collide; this keeps both
/// documents instead of replacing the first.
pub async fn create_sequenced(
    store: &dyn DocumentStore,
    container: &str,
    base: &str,
    mut doc: Map<String, Value>,
) -> ApiResult<Value> {
    for sequence in 1..=MAX_ID_SEQUENCE {
        doc.insert("id".into(), json!(format!("{base}_{sequence:02}")));
        match store.create(container, Value::Object(doc.clone())).await {
            Err(AgentboardError::Conflict(_)) => continue,
            result => return Ok(result?),
        }
    }
    Err(ApiError::Agentboard(AgentboardError::Conflict(format!(
        "no free id for '{base}' in '{container}'"
    ))))
}
