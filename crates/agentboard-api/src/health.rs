use crate::{ApiError, ApiResult, AppState};
use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::time::{timeout, Duration};

const CHECK_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub components: ComponentsHealth,
}

#[derive(Serialize, Debug)]
pub struct ComponentsHealth {
    pub store: ComponentStatus,
    pub cache: ComponentStatus,
    pub graph: ComponentStatus,
    pub memory: ComponentStatus,
}

#[derive(Serialize, Debug)]
pub struct ComponentStatus {
    pub status: String,
    pub last_check: u64,
    pub response_time_ms: Option<u64>,
    pub details: Option<HashMap<String, String>>,
    pub error: Option<String>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.components
            .all()
            .iter()
            .all(|component| component.status == "healthy")
    }
}

impl ComponentsHealth {
    fn all(&self) -> [&ComponentStatus; 4] {
        [&self.store, &self.cache, &self.graph, &self.memory]
    }
}

impl ComponentStatus {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            last_check: current_timestamp(),
            response_time_ms: None,
            details: None,
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy".to_string(),
            last_check: current_timestamp(),
            response_time_ms: None,
            details: None,
            error: Some(error),
        }
    }

    pub fn degraded(error: String, details: HashMap<String, String>) -> Self {
        Self {
            status: "degraded".to_string(),
            last_check: current_timestamp(),
            response_time_ms: None,
            details: Some(details),
            error: Some(error),
        }
    }

    pub fn with_response_time(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

pub async fn comprehensive_health_check(
    State(state): State<AppState>,
) -> ApiResult<Json<HealthResponse>> {
    let components = ComponentsHealth {
        store: check_store_health(&state).await,
        cache: check_cache_health(&state).await,
        graph: check_graph_health(&state),
        memory: check_memory_health(),
    };

    let status = if components.all().iter().any(|c| c.status == "unhealthy") {
        "unhealthy"
    } else if components.all().iter().any(|c| c.status == "degraded") {
        "degraded"
    } else {
        "healthy"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: current_timestamp(),
        uptime_seconds: state.uptime_secs(),
        components,
    }))
}

pub(crate) async fn check_store_health(state: &AppState) -> ComponentStatus {
    let start = Instant::now();
    let health_check = timeout(CHECK_TIMEOUT, state.store.list_containers()).await;
    let response_time = start.elapsed().as_millis() as u64;

    match health_check {
        Ok(Ok(containers)) => {
            let mut details = HashMap::new();
            details.insert("backend".to_string(), state.store.name().to_string());
            details.insert("containers".to_string(), containers.len().to_string());
            ComponentStatus::healthy()
                .with_response_time(response_time)
                .with_details(details)
        }
        Ok(Err(e)) => ComponentStatus::unhealthy(format!("Store error: {}", e))
            .with_response_time(response_time),
        Err(_) => ComponentStatus::unhealthy("Store timeout".to_string())
            .with_response_time(response_time),
    }
}

pub(crate) async fn check_cache_health(state: &AppState) -> ComponentStatus {
    let start = Instant::now();
    let health_check = timeout(CHECK_TIMEOUT, state.cache.ping()).await;
    let response_time = start.elapsed().as_millis() as u64;

    let mut details = HashMap::new();
    details.insert("backend".to_string(), state.cache.backend_name().to_string());
    details.insert("enabled".to_string(), state.cache.is_enabled().to_string());

    match health_check {
        Ok(Ok(())) => ComponentStatus::healthy()
            .with_response_time(response_time)
            .with_details(details),
        // Reads fall through to the store.
        Ok(Err(e)) => ComponentStatus::degraded(format!("Cache error: {}", e), details)
            .with_response_time(response_time),
        Err(_) => ComponentStatus::degraded("Cache timeout".to_string(), details)
            .with_response_time(response_time),
    }
}

fn check_graph_health(state: &AppState) -> ComponentStatus {
    let summary = state.graph.summary();
    let mut details = HashMap::new();
    details.insert("documents".to_string(), summary.documents.to_string());
    details.insert("edges".to_string(), summary.edges.to_string());
    details.insert(
        "built_at".to_string(),
        summary.built_at.unwrap_or_else(|| "never".to_string()),
    );
    ComponentStatus::healthy().with_details(details)
}

fn check_memory_health() -> ComponentStatus {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_memory();

    let mut details = HashMap::new();
    details.insert(
        "available_memory_mb".to_string(),
        (sys.available_memory() / 1024 / 1024).to_string(),
    );
    details.insert(
        "used_memory_mb".to_string(),
        (sys.used_memory() / 1024 / 1024).to_string(),
    );
    details.insert(
        "total_memory_mb".to_string(),
        (sys.total_memory() / 1024 / 1024).to_string(),
    );

    let memory_usage_percent = if sys.total_memory() > 0 {
        (sys.used_memory() as f64 / sys.total_memory() as f64) * 100.0
    } else {
        0.0
    };
    if memory_usage_percent > 90.0 {
        ComponentStatus::degraded(
            format!("High memory usage: {:.1}%", memory_usage_percent),
            details,
        )
    } else {
        ComponentStatus::healthy().with_details(details)
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// Readiness: the store must answer before traffic is accepted.
pub async fn readiness_check(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let store = check_store_health(&state).await;
    if store.status != "healthy" {
        return Err(ApiError::ServiceUnavailable(
            store.error.unwrap_or_else(|| "Store not ready".to_string()),
        ));
    }
    Ok(Json(serde_json::json!({
        "status": "ready",
        "timestamp": current_timestamp(),
        "store": store,
    })))
}

// Liveness
pub async fn liveness_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "timestamp": current_timestamp(),
        "uptime_seconds": state.uptime_secs()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_status_creation() {
        let healthy = ComponentStatus::healthy();
        assert_eq!(healthy.status, "healthy");
        assert!(healthy.error.is_none());

        let unhealthy = ComponentStatus::unhealthy("test error".to_string());
        assert_eq!(unhealthy.status, "unhealthy");
        assert_eq!(unhealthy.error, Some("test error".to_string()));
    }

    #[test]
    fn test_health_response_status() {
        let mut response = HealthResponse {
            status: "healthy".to_string(),
            version: "1.0.0".to_string(),
            timestamp: current_timestamp(),
            uptime_seconds: 100,
            components: ComponentsHealth {
                store: ComponentStatus::healthy(),
                cache: ComponentStatus::healthy(),
                graph: ComponentStatus::healthy(),
                memory: ComponentStatus::healthy(),
            },
        };
        assert!(response.is_healthy());

        response.components.cache = ComponentStatus::degraded("slow".into(), HashMap::new());
        assert!(!response.is_healthy());
    }
}
