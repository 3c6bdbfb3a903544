use crate::{
    agent_handlers, cosmos_handlers, graph_handlers, handlers, health, maintenance_handlers,
    memory_handlers, message_handlers, metrics, monitoring_handlers, AppState,
};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use http::HeaderValue;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

fn agent_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(agent_handlers::agents_status))
        .route(
            "/agent/{agent_name}/details",
            get(agent_handlers::agent_details_handler),
        )
        .route("/health", get(agent_handlers::agents_health))
}

fn message_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(message_handlers::list_messages).post(message_handlers::send_message),
        )
        .route("/stats", get(message_handlers::message_stats))
        .route("/thread/{thread_id}", get(message_handlers::message_thread))
        .route("/{agent_name}", get(message_handlers::agent_messages))
        .route(
            "/{message_id}/status",
            put(message_handlers::update_message_status),
        )
}

fn cosmos_routes() -> Router<AppState> {
    Router::new()
        .route("/containers", get(cosmos_handlers::list_containers))
        .route(
            "/containers/{container_id}/documents",
            get(cosmos_handlers::list_documents).post(cosmos_handlers::create_document),
        )
        .route(
            "/containers/{container_id}/documents/{document_id}",
            get(cosmos_handlers::get_document).delete(cosmos_handlers::delete_document),
        )
        .route(
            "/containers/{container_id}/indexing-policy",
            get(cosmos_handlers::get_indexing_policy),
        )
        .route(
            "/containers/{container_id}/filters",
            get(cosmos_handlers::get_container_filters),
        )
        .route("/stats", get(cosmos_handlers::database_stats))
        .route("/query", post(cosmos_handlers::run_query))
        .route("/search", get(cosmos_handlers::search_documents))
        .route("/user-content", get(cosmos_handlers::user_content))
        .route("/logs/analyze", get(maintenance_handlers::analyze_logs))
        .route(
            "/logs/remove-duplicates",
            post(maintenance_handlers::remove_duplicate_logs),
        )
        .route("/messages/analyze", get(maintenance_handlers::analyze_messages))
        .route(
            "/messages/remove-duplicates",
            post(maintenance_handlers::remove_duplicate_messages),
        )
}

fn graph_routes() -> Router<AppState> {
    Router::new()
        .route("/nodes", get(graph_handlers::graph_nodes))
        .route("/edges", get(graph_handlers::graph_edges))
        .route("/graph", get(graph_handlers::graph_data))
        .route("/search", get(graph_handlers::graph_search))
        .route("/stats", get(graph_handlers::graph_stats))
        .route("/refresh", post(graph_handlers::refresh_graph))
}

fn memory_routes() -> Router<AppState> {
    Router::new()
        .route("/layers", get(memory_handlers::memory_layers))
        .route("/layer/{layer_id}", get(memory_handlers::memory_layer_details))
        .route("/layer/{layer_id}/add", post(memory_handlers::add_memory_item))
}

fn memory_store_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(memory_handlers::memory_stats))
        .route("/search", post(memory_handlers::memory_search))
}

fn monitoring_routes() -> Router<AppState> {
    Router::new()
        .route("/system", get(monitoring_handlers::system_metrics))
        .route("/services", get(monitoring_handlers::service_status))
        .route("/database", get(monitoring_handlers::database_health))
        .route("/performance", get(monitoring_handlers::performance_metrics))
        .route("/alerts", get(monitoring_handlers::alerts))
        .route(
            "/cache",
            get(monitoring_handlers::cache_stats).delete(monitoring_handlers::clear_cache),
        )
}

/// Configured origins, or any origin when none are listed.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server.cors_origins);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(health::comprehensive_health_check))
        .route("/health/live", get(health::liveness_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/api/v1/agents", agent_routes())
        .nest("/api/v1/messages", message_routes())
        .nest("/api/v1/cosmos", cosmos_routes())
        .nest("/api/v1/graph", graph_routes())
        .nest("/api/v1/memory-layers", memory_routes())
        .nest("/api/v1/memory", memory_store_routes())
        .nest("/api/v1/monitoring", monitoring_routes())
        .route_layer(middleware::from_fn(metrics::track_requests))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CompressionLayer::new()),
        )
}
