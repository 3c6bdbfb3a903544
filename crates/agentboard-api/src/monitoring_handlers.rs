use std::collections::BTreeMap;

use crate::health::{check_cache_health, check_store_health};
use crate::{ensure_range, ApiResult, AppState};
use agentboard_core::document::doc_ts;
use agentboard_store::QueryFilter;
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sysinfo::{Disks, Networks, System};
use tracing::{debug, warn};

const WARNING_PERCENT: f64 = 80.0;

#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub timestamp: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_bytes_sent: u64,
    pub network_bytes_recv: u64,
    pub process_count: usize,
    pub load_average: Option<[f64; 3]>,
}

impl SystemMetrics {
    pub fn status(&self) -> &'static str {
        if self.cpu_percent < WARNING_PERCENT && self.memory_percent < WARNING_PERCENT {
            "healthy"
        } else {
            "warning"
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(used as f64 / total as f64 * 100.0)
    }
}

/// Sample host metrics. CPU usage needs two refreshes separated by the
/// minimum update interval.
pub async fn collect_system_metrics() -> SystemMetrics {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

    let disks = Disks::new_with_refreshed_list();
    let (disk_total, disk_available) = disks
        .list()
        .iter()
        .fold((0u64, 0u64), |(total, available), disk| {
            (total + disk.total_space(), available + disk.available_space())
        });

    let networks = Networks::new_with_refreshed_list();
    let (sent, received) = networks
        .list()
        .iter()
        .fold((0u64, 0u64), |(sent, received), (_, data)| {
            (
                sent + data.total_transmitted(),
                received + data.total_received(),
            )
        });

    let load = System::load_average();
    let load_average = if cfg!(windows) {
        None
    } else {
        Some([load.one, load.five, load.fifteen])
    };

    SystemMetrics {
        timestamp: Utc::now().to_rfc3339(),
        cpu_percent: round2(sys.global_cpu_usage() as f64),
        memory_percent: percent(sys.used_memory(), sys.total_memory()),
        disk_percent: percent(disk_total.saturating_sub(disk_available), disk_total),
        network_bytes_sent: sent,
        network_bytes_recv: received,
        process_count: sys.processes().len(),
        load_average,
    }
}

pub async fn system_metrics() -> ApiResult<Json<Value>> {
    let metrics = collect_system_metrics().await;
    Ok(Json(json!({
        "success": true,
        "status": metrics.status(),
        "metrics": metrics,
    })))
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service_name: String,
    pub status: String,
    pub uptime: Option<u64>,
    pub last_check: String,
    pub health_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceStatus {
    fn new(service_name: &str, healthy: bool, error: Option<String>) -> Self {
        Self {
            service_name: service_name.to_string(),
            status: if healthy { "running" } else { "error" }.to_string(),
            uptime: None,
            last_check: Utc::now().to_rfc3339(),
            health_score: if healthy { 100.0 } else { 0.0 },
            error,
        }
    }
}

/// `critical` below 50, `warning` below 80, else `healthy`.
pub fn overall_status(services: &[ServiceStatus]) -> (&'static str, f64) {
    let score = if services.is_empty() {
        0.0
    } else {
        services.iter().map(|s| s.health_score).sum::<f64>() / services.len() as f64
    };
    let status = if score < 50.0 {
        "critical"
    } else if score < 80.0 {
        "warning"
    } else {
        "healthy"
    };
    (status, round2(score))
}

async fn collect_services(state: &AppState) -> Vec<ServiceStatus> {
    let mut api = ServiceStatus::new("Agentboard API", true, None);
    api.uptime = Some(state.uptime_secs());

    let store = check_store_health(state).await;
    let store = ServiceStatus::new(
        &format!("Document store ({})", state.store.name()),
        store.status == "healthy",
        store.error,
    );

    let cache = check_cache_health(state).await;
    let cache = ServiceStatus::new(
        &format!("Cache ({})", state.cache.backend_name()),
        cache.status == "healthy",
        cache.error,
    );

    vec![api, store, cache]
}

pub async fn service_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let services = collect_services(&state).await;
    let (status, score) = overall_status(&services);
    Ok(Json(json!({
        "success": true,
        "services": services,
        "overall_status": status,
        "overall_health_score": score,
    })))
}

/// Size assumed per document when estimating container sizes.
const ESTIMATED_DOC_KB: u64 = 1;

pub async fn database_health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mut containers = Vec::new();
    let mut healthy = 0usize;
    let mut total_documents = 0u64;
    for info in state.store.list_containers().await? {
        let last_check = Utc::now().to_rfc3339();
        match state.store.count(&info.id).await {
            Ok(count) => {
                healthy += 1;
                total_documents += count;
                containers.push(json!({
                    "name": info.id,
                    "document_count": count,
                    "estimated_size_kb": count * ESTIMATED_DOC_KB,
                    "status": "healthy",
                    "last_check": last_check,
                }));
            }
            Err(e) => {
                warn!("Could not count {}: {}", info.id, e);
                containers.push(json!({
                    "name": info.id,
                    "document_count": 0,
                    "estimated_size_kb": 0,
                    "status": "error",
                    "error": e.to_string(),
                    "last_check": last_check,
                }));
            }
        }
    }

    let health_percentage = if containers.is_empty() {
        0.0
    } else {
        round2(healthy as f64 / containers.len() as f64 * 100.0)
    };
    let estimated_kb = total_documents * ESTIMATED_DOC_KB;
    Ok(Json(json!({
        "success": true,
        "database_name": state.settings.cosmos.database,
        "endpoint": state.settings.cosmos.endpoint,
        "backend": state.store.name(),
        "summary": {
            "total_containers": containers.len(),
            "healthy_containers": healthy,
            "total_documents": total_documents,
            "estimated_size_mb": round2(estimated_kb as f64 / 1024.0),
            "health_percentage": health_percentage,
        },
        "containers": containers,
        "last_updated": Utc::now().to_rfc3339(),
    })))
}

/// Containers whose documents count as operations.
const ACTIVITY_CONTAINERS: [&str; 4] = ["agent_session_logs", "agent_logs", "logs", "system_inbox"];
const HOUR_FORMAT: &str = "%Y-%m-%d %H:00";

#[derive(Debug, Clone, Default, Serialize)]
pub struct Activity {
    pub total_operations: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// Operations per `YYYY-MM-DD HH:00` bucket (UTC).
    pub hourly: BTreeMap<String, usize>,
    pub operation_types: BTreeMap<String, usize>,
    pub error_types: BTreeMap<String, usize>,
}

fn first_text(doc: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match doc.get(*field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    })
}

impl Activity {
    /// Count one document. Errors are documents with `status: "error"` or
    /// any mention of "error".
    pub fn record(&mut self, doc: &Value) {
        self.total_operations += 1;
        let hour = doc_ts(doc)
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .unwrap_or_default()
            .format(HOUR_FORMAT)
            .to_string();
        *self.hourly.entry(hour).or_insert(0) += 1;

        let operation = first_text(doc, &["logType", "action", "type"])
            .unwrap_or_else(|| "unknown".to_string());
        *self.operation_types.entry(operation).or_insert(0) += 1;

        let failed = doc.get("status").and_then(Value::as_str) == Some("error")
            || doc.to_string().to_lowercase().contains("error");
        if failed {
            self.error_count += 1;
            let kind = first_text(doc, &["error", "errorType"])
                .unwrap_or_else(|| "unknown_error".to_string());
            *self.error_types.entry(kind).or_insert(0) += 1;
        } else {
            self.success_count += 1;
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            round2(self.success_count as f64 / self.total_operations as f64 * 100.0)
        }
    }

    /// One bucket per hour from `start`, zero-filled.
    pub fn time_series(&self, start: DateTime<Utc>, hours: usize) -> Vec<Value> {
        (0..hours)
            .map(|offset| {
                let hour = (start + Duration::hours(offset as i64))
                    .format(HOUR_FORMAT)
                    .to_string();
                let count = self.hourly.get(&hour).copied().unwrap_or(0);
                json!({ "timestamp": hour, "activity_count": count })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct PerformanceParams {
    pub hours: Option<usize>,
}

pub async fn performance_metrics(
    State(state): State<AppState>,
    Query(params): Query<PerformanceParams>,
) -> ApiResult<Json<Value>> {
    let hours = ensure_range("hours", params.hours.unwrap_or(24), 1, 168)?;
    let end = Utc::now();
    let start = end - Duration::hours(hours as i64);
    let query = QueryFilter::new()
        .add_date_range("_ts", Some(start), None)
        .build("SELECT * FROM c", None);

    let mut activity = Activity::default();
    for container in ACTIVITY_CONTAINERS {
        match state.store.query(container, &query).await {
            Ok(docs) => docs.iter().for_each(|doc| activity.record(doc)),
            Err(e) => debug!("Skipping {} for performance metrics: {}", container, e),
        }
    }

    Ok(Json(json!({
        "success": true,
        "period": {
            "hours": hours,
            "start_time": start.to_rfc3339(),
            "end_time": end.to_rfc3339(),
        },
        "metrics": {
            "total_operations": activity.total_operations,
            "success_count": activity.success_count,
            "error_count": activity.error_count,
            "success_rate": activity.success_rate(),
            "avg_operations_per_hour": round2(activity.total_operations as f64 / hours as f64),
        },
        "time_series": activity.time_series(start, hours),
        "operation_types": activity.operation_types,
        "error_types": activity.error_types,
    })))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub metric: &'static str,
    pub value: Value,
    pub threshold: Value,
    pub timestamp: String,
}

/// `(metric, label, value, warning threshold, critical threshold)`
type Threshold = (&'static str, &'static str, f64, f64, f64);

fn resource_thresholds(metrics: &SystemMetrics) -> [Threshold; 3] {
    [
        ("cpu_percent", "CPU", metrics.cpu_percent, 80.0, 90.0),
        ("memory_percent", "memory", metrics.memory_percent, 80.0, 90.0),
        ("disk_percent", "disk", metrics.disk_percent, 85.0, 95.0),
    ]
}

/// Alerts for host resources above their thresholds and services that are
/// not running, critical first.
pub fn build_alerts(metrics: &SystemMetrics, services: &[ServiceStatus]) -> Vec<Alert> {
    let mut alerts = Vec::new();
    for (metric, label, value, warning, critical) in resource_thresholds(metrics) {
        if value <= warning {
            continue;
        }
        let id = metric.replace("_percent", "_high");
        alerts.push(Alert {
            id,
            severity: if value < critical {
                Severity::Warning
            } else {
                Severity::Critical
            },
            message: format!("High {label} usage: {value:.1}%"),
            metric,
            value: json!(value),
            threshold: json!(warning),
            timestamp: metrics.timestamp.clone(),
        });
    }
    for service in services.iter().filter(|s| s.status != "running") {
        alerts.push(Alert {
            id: format!("service_{}", service.service_name.to_lowercase().replace(' ', "_")),
            severity: Severity::Critical,
            message: format!("Service {} is {}", service.service_name, service.status),
            metric: "service_status",
            value: json!(service.status),
            threshold: json!("running"),
            timestamp: service.last_check.clone(),
        });
    }
    alerts.sort_by_key(|alert| alert.severity);
    alerts
}

pub async fn alerts(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let metrics = collect_system_metrics().await;
    let services = collect_services(&state).await;
    let alerts = build_alerts(&metrics, &services);
    let count_of = |severity: Severity| alerts.iter().filter(|a| a.severity == severity).count();
    Ok(Json(json!({
        "success": true,
        "count": alerts.len(),
        "critical_count": count_of(Severity::Critical),
        "warning_count": count_of(Severity::Warning),
        "alerts": alerts,
        "last_updated": Utc::now().to_rfc3339(),
    })))
}

pub async fn cache_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = state.cache.stats().await;
    Ok(Json(json!({
        "success": true,
        "enabled": stats.enabled,
        "stats": stats,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ClearCacheParams {
    pub container: Option<String>,
}

pub async fn clear_cache(
    State(state): State<AppState>,
    Query(params): Query<ClearCacheParams>,
) -> ApiResult<Json<Value>> {
    let (removed, message) = match params.container.as_deref().filter(|c| !c.is_empty()) {
        Some(container) => (
            state.invalidate_container(container).await,
            format!("Cleared cache for container: {container}"),
        ),
        None => (
            state.cache.clear().await,
            "Cleared all cache entries".to_string(),
        ),
    };
    Ok(Json(json!({
        "success": true,
        "removed": removed,
        "message": message,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn service(score: f64) -> ServiceStatus {
        ServiceStatus {
            health_score: score,
            ..ServiceStatus::new("svc", true, None)
        }
    }

    #[test]
    fn overall_status_thresholds() {
        let (status, score) = overall_status(&[service(100.0), service(100.0), service(0.0)]);
        assert_eq!(status, "warning");
        assert_relative_eq!(score, 66.67);

        assert_eq!(overall_status(&[service(100.0), service(0.0)]).0, "warning");
        assert_eq!(overall_status(&[service(0.0), service(40.0)]).0, "critical");
        assert_eq!(overall_status(&[service(90.0)]).0, "healthy");
        assert_eq!(overall_status(&[]).0, "critical");
    }

    #[test]
    fn system_status_warns_at_threshold() {
        let mut metrics = SystemMetrics {
            timestamp: String::new(),
            cpu_percent: 10.0,
            memory_percent: 79.9,
            disk_percent: 0.0,
            network_bytes_sent: 0,
            network_bytes_recv: 0,
            process_count: 1,
            load_average: None,
        };
        assert_eq!(metrics.status(), "healthy");
        metrics.memory_percent = 80.0;
        assert_eq!(metrics.status(), "warning");
    }

    fn metrics(cpu: f64, memory: f64, disk: f64) -> SystemMetrics {
        SystemMetrics {
            timestamp: "now".into(),
            cpu_percent: cpu,
            memory_percent: memory,
            disk_percent: disk,
            network_bytes_sent: 0,
            network_bytes_recv: 0,
            process_count: 1,
            load_average: None,
        }
    }

    #[test]
    fn alerts_rank_critical_first() {
        let down = ServiceStatus::new("Document store (cosmos)", false, Some("timeout".into()));
        let alerts = build_alerts(&metrics(85.0, 40.0, 96.0), &[service(100.0), down]);
        let ids: Vec<&str> = alerts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["disk_high", "service_document_store_(cosmos)", "cpu_high"]
        );
        assert_eq!(alerts[2].severity, Severity::Warning);
        assert_eq!(alerts[2].message, "High CPU usage: 85.0%");
        assert_eq!(alerts[0].threshold, json!(85.0));

        assert!(build_alerts(&metrics(80.0, 80.0, 85.0), &[service(100.0)]).is_empty());
    }

    #[test]
    fn activity_buckets_by_hour_and_counts_errors() {
        let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let ts = start.timestamp();
        let mut activity = Activity::default();
        activity.record(&json!({"_ts": ts + 10, "logType": "session"}));
        activity.record(&json!({"_ts": ts + 20, "action": "deploy", "status": "error",
                                "errorType": "timeout"}));
        activity.record(&json!({"_ts": ts + 3700, "type": "MESSAGE",
                                "content": "Error budget exceeded"}));

        assert_eq!(activity.total_operations, 3);
        assert_eq!(activity.error_count, 2);
        assert_eq!(activity.error_types.get("timeout"), Some(&1));
        assert_eq!(activity.error_types.get("unknown_error"), Some(&1));
        assert_eq!(activity.operation_types.get("deploy"), Some(&1));
        assert_relative_eq!(activity.success_rate(), 33.33);

        let series = activity.time_series(start, 3);
        let counts: Vec<u64> = series
            .iter()
            .map(|bucket| bucket["activity_count"].as_u64().unwrap())
            .collect();
        assert_eq!(counts, vec![2, 1, 0]);
    }

    #[test]
    fn percentages() {
        assert_relative_eq!(percent(1, 3), 33.33);
        assert_relative_eq!(percent(5, 0), 0.0);
    }
}
