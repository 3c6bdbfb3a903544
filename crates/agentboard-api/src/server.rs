use crate::{create_router, AppState};
use agentboard_core::{AgentboardError, ConfigManager, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};

pub struct Server {
    state: AppState,
    addr: SocketAddr,
}

impl Server {
    pub async fn new(addr: SocketAddr, config: Arc<ConfigManager>) -> Result<Self> {
        crate::metrics::register_metrics();
        let state = AppState::new(config).await?;
        spawn_cache_purge(&state);
        spawn_graph_refresh(&state);
        Ok(Self { state, addr })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> Result<()> {
        let router = create_router(self.state);

        info!("Starting Agentboard API server on {}", self.addr);

        let listener = {
            let socket = if self.addr.is_ipv6() {
                tokio::net::TcpSocket::new_v6()
            } else {
                tokio::net::TcpSocket::new_v4()
            }?;

            // Reuse addr/port to improve rebind under restarts
            let _ = socket.set_reuseaddr(true);
            #[cfg(unix)]
            let _ = socket.set_reuseport(true);
            let _ = socket.set_keepalive(true);

            socket.bind(self.addr)?;
            socket.listen(1024)?
        };

        info!("Server listening on http://{}", self.addr);
        info!("  GET /health - Comprehensive health check");
        info!("  GET /metrics - Prometheus metrics");
        info!("  /api/v1/{{agents,messages,cosmos,graph,memory,memory-layers,monitoring}}");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(AgentboardError::Io)?;

        info!("Server stopped");
        Ok(())
    }
}

fn spawn_cache_purge(state: &AppState) {
    let interval = state.settings.cache.cleanup_interval_secs;
    if interval == 0 || !state.cache.is_enabled() {
        return;
    }
    let cache = state.cache.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                debug!(purged, "Purged expired cache entries");
            }
        }
    });
}

/// Builds the graph once at startup, then rescans on the configured
/// interval. With an interval of 0 reads refresh on demand instead.
fn spawn_graph_refresh(state: &AppState) {
    let graph = state.graph.clone();
    let interval = state.settings.graph.refresh_interval_secs;
    tokio::spawn(async move {
        let report = graph.refresh().await;
        info!(
            documents = report.documents,
            edges = report.edges,
            "Initial graph build finished"
        );
        if interval == 0 {
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(interval));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = graph.refresh().await;
            if !report.containers_failed.is_empty() {
                warn!(
                    failed = ?report.containers_failed,
                    "Graph refresh skipped containers"
                );
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
