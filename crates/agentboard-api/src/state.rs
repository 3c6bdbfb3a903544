use std::sync::Arc;
use std::time::Instant;

use agentboard_cache::DocumentCache;
use agentboard_core::{ConfigManager, Result, Settings};
use agentboard_graph::GraphService;
use agentboard_store::{CosmosStore, DocumentStore, MemoryStore, PartitionRegistry};
use tracing::{info, warn};

use crate::cosmos_handlers::documents_namespace;
use crate::memory_handlers::MEMORY_LAYERS;
use crate::metrics::MetricsObserver;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigManager>,
    pub settings: Arc<Settings>,
    pub store: Arc<dyn DocumentStore>,
    pub registry: Arc<PartitionRegistry>,
    pub cache: Arc<DocumentCache>,
    pub graph: Arc<GraphService>,
    pub started_at: Instant,
}

impl AppState {
    pub async fn new(config: Arc<ConfigManager>) -> Result<Self> {
        let settings = config.settings();
        let registry = PartitionRegistry::with_overrides(&settings.partitions);

        let store: Arc<dyn DocumentStore> = if settings.cosmos.is_configured() {
            let store = CosmosStore::new(&settings.cosmos)?;
            info!("Using Cosmos DB database '{}'", settings.cosmos.database);
            Arc::new(store)
        } else {
            warn!("Cosmos DB endpoint or key not configured; serving from an in-memory store");
            Arc::new(in_memory_store(&registry, &settings))
        };

        let observer = Arc::new(MetricsObserver);
        let cache = DocumentCache::from_settings(&settings.cache)
            .await
            .with_observer(observer.clone());
        let graph =
            GraphService::new(store.clone(), settings.graph.clone()).with_observer(observer);

        Ok(Self::from_parts(config, store, registry, cache, graph))
    }

    pub fn from_parts(
        config: Arc<ConfigManager>,
        store: Arc<dyn DocumentStore>,
        registry: PartitionRegistry,
        cache: DocumentCache,
        graph: GraphService,
    ) -> Self {
        Self {
            settings: config.settings(),
            config,
            store,
            registry: Arc::new(registry),
            cache: Arc::new(cache),
            graph: Arc::new(graph),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Drop cached reads of `container`, document listings included.
    pub async fn invalidate_container(&self, container: &str) -> usize {
        self.cache.invalidate_namespace(container).await
            + self
                .cache
                .invalidate_namespace(&documents_namespace(container))
                .await
    }
}

/// Empty store with every container the handlers read, partitioned the way
/// the registry expects.
pub fn in_memory_store(registry: &PartitionRegistry, settings: &Settings) -> MemoryStore {
    let store = MemoryStore::new();
    let containers = registry
        .containers()
        .map(str::to_string)
        .chain(settings.graph.containers.iter().cloned())
        .chain(MEMORY_LAYERS.iter().map(|layer| layer.container.to_string()));
    for container in containers {
        let path = registry
            .strategy(&container)
            .map(|strategy| format!("/{}", strategy.field));
        store.create_container(&container, path.as_deref());
    }
    store
}
