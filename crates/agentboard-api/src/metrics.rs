use std::sync::Once;
use std::time::Instant;

use agentboard_cache::{CacheObserver, CacheOutcome};
use agentboard_graph::{RefreshObserver, RefreshReport};
use axum::{
    extract::{MatchedPath, Request},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("agentboard_http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "agentboard_http_request_duration_seconds",
            "HTTP request latency in seconds"
        ),
        &["method", "path"]
    )
    .unwrap();

    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("agentboard_cache_lookups_total", "Cache lookups by namespace and outcome"),
        &["namespace", "outcome"]
    )
    .unwrap();

    pub static ref GRAPH_REFRESHES_TOTAL: IntCounter = IntCounter::new(
        "agentboard_graph_refreshes_total",
        "Number of full graph rescans"
    )
    .unwrap();

    pub static ref GRAPH_DOCUMENTS: IntGauge = IntGauge::new(
        "agentboard_graph_documents",
        "Documents held by the graph index after the last rescan"
    )
    .unwrap();

    pub static ref GRAPH_EDGES: IntGauge = IntGauge::new(
        "agentboard_graph_edges",
        "Edges held by the graph index after the last rescan"
    )
    .unwrap();
}

static REGISTER: Once = Once::new();

pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(HTTP_REQUESTS_TOTAL.clone()),
            Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()),
            Box::new(CACHE_LOOKUPS_TOTAL.clone()),
            Box::new(GRAPH_REFRESHES_TOTAL.clone()),
            Box::new(GRAPH_DOCUMENTS.clone()),
            Box::new(GRAPH_EDGES.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                warn!("Failed to register metric: {}", e);
            }
        }
        #[cfg(target_os = "linux")]
        if let Err(e) = REGISTRY.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        )) {
            warn!("Failed to register process metrics: {}", e);
        }
    });
}

pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

pub async fn metrics_handler() -> Response {
    match render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}

/// Records request count and latency labelled by the matched route.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method.as_str(), path.as_str()])
        .observe(started.elapsed().as_secs_f64());
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();
    response
}

/// Feeds cache and graph events into the registry.
#[derive(Debug, Default)]
pub struct MetricsObserver;

impl CacheObserver for MetricsObserver {
    fn record(&self, namespace: &str, outcome: CacheOutcome) {
        CACHE_LOOKUPS_TOTAL
            .with_label_values(&[namespace, outcome.as_str()])
            .inc();
    }
}

impl RefreshObserver for MetricsObserver {
    fn refreshed(&self, report: &RefreshReport) {
        GRAPH_REFRESHES_TOTAL.inc();
        GRAPH_DOCUMENTS.set(report.documents as i64);
        GRAPH_EDGES.set(report.edges as i64);
    }
}
