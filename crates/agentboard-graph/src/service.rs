use std::sync::Arc;
use std::time::{Duration, Instant};

use agentboard_core::GraphSettings;
use agentboard_store::{DocumentStore, SqlQuery};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::index::{GraphIndex, UpsertOutcome};
use crate::model::{EdgeType, GraphData, GraphEdge, GraphNode, NodeType, SearchResult};
use crate::stats::GraphStats;

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub containers_scanned: Vec<String>,
    pub containers_failed: Vec<String>,
    pub documents: usize,
    pub edges: usize,
    pub duration_ms: u64,
    pub refreshed_at: String,
}

pub trait RefreshObserver: Send + Sync {
    fn refreshed(&self, report: &RefreshReport);
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub documents: usize,
    pub edges: usize,
    pub containers: Vec<String>,
    pub built_at: Option<String>,
}

/// Owns the graph index and keeps it in step with the document store.
///
/// Writes made through the API update the index in place; a periodic full
/// rescan picks up writes from other processes.
pub struct GraphService {
    store: Arc<dyn DocumentStore>,
    settings: GraphSettings,
    index: RwLock<GraphIndex>,
    refreshed_at: RwLock<Option<Instant>>,
    refresh_lock: Mutex<()>,
    observer: Option<Arc<dyn RefreshObserver>>,
}

impl GraphService {
    pub fn new(store: Arc<dyn DocumentStore>, settings: GraphSettings) -> Self {
        let index = GraphIndex::new(&settings.containers);
        Self {
            store,
            settings,
            index: RwLock::new(index),
            refreshed_at: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    pub fn tracks(&self, container: &str) -> bool {
        self.settings.containers.iter().any(|c| c == container)
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.settings.refresh_interval_secs)
    }

    fn is_stale(&self) -> bool {
        match *self.refreshed_at.read() {
            Some(at) => at.elapsed() >= self.refresh_interval(),
            None => true,
        }
    }

    /// Rescan every tracked container and swap in a fresh index.
    pub async fn refresh(&self) -> RefreshReport {
        let _guard = self.refresh_lock.lock().await;
        self.rebuild().await
    }

    /// Refresh when the index is older than the refresh interval.
    pub async fn ensure_fresh(&self) -> Option<RefreshReport> {
        if !self.is_stale() {
            return None;
        }
        let _guard = self.refresh_lock.lock().await;
        // another task may have refreshed while we waited
        if !self.is_stale() {
            return None;
        }
        Some(self.rebuild().await)
    }

    async fn rebuild(&self) -> RefreshReport {
        let started = Instant::now();
        let query = SqlQuery::new(format!(
            "SELECT * FROM c ORDER BY c._ts DESC OFFSET 0 LIMIT {}",
            self.settings.scan_limit
        ));
        let scans = self.settings.containers.iter().map(|container| {
            let store = self.store.clone();
            let query = query.clone();
            async move { (container, store.query(container, &query).await) }
        });
        let results = join_all(scans).await;

        let mut index = GraphIndex::new(&self.settings.containers);
        let mut scanned = Vec::new();
        let mut failed = Vec::new();
        for (container, result) in results {
            match result {
                Ok(docs) => {
                    debug!("Scanned {} documents from {}", docs.len(), container);
                    for doc in docs {
                        index.upsert_document(container, doc);
                    }
                    scanned.push(container.clone());
                }
                Err(e) => {
                    let previous = self.index.read().container_documents(container);
                    warn!(
                        "Scan of {} failed during graph refresh, keeping {} indexed documents: {}",
                        container,
                        previous.len(),
                        e
                    );
                    for doc in previous {
                        index.upsert_document(container, doc);
                    }
                    failed.push(container.clone());
                }
            }
        }
        index.mark_built();

        let report = RefreshReport {
            containers_scanned: scanned,
            containers_failed: failed,
            documents: index.document_count(),
            edges: index.edge_count(),
            duration_ms: started.elapsed().as_millis() as u64,
            refreshed_at: chrono::Utc::now().to_rfc3339(),
        };
        *self.index.write() = index;
        *self.refreshed_at.write() = Some(Instant::now());
        info!(
            "Graph refreshed: {} documents, {} edges in {}ms",
            report.documents, report.edges, report.duration_ms
        );
        if let Some(observer) = &self.observer {
            observer.refreshed(&report);
        }
        report
    }

    /// Apply a document written through the API. Untracked containers are ignored.
    pub fn record_write(&self, container: &str, doc: &Value) -> Option<UpsertOutcome> {
        if !self.tracks(container) {
            return None;
        }
        Some(self.index.write().upsert_document(container, doc.clone()))
    }

    pub fn record_delete(&self, container: &str, id: &str) -> bool {
        self.tracks(container) && self.index.write().remove_document(container, id)
    }

    pub async fn nodes(
        &self,
        node_type: Option<NodeType>,
        search: Option<&str>,
        limit: usize,
    ) -> Vec<GraphNode> {
        self.ensure_fresh().await;
        self.index.read().nodes(node_type, search, limit)
    }

    pub async fn edges(
        &self,
        source: Option<&str>,
        target: Option<&str>,
        edge_type: Option<EdgeType>,
        limit: usize,
    ) -> Vec<GraphEdge> {
        self.ensure_fresh().await;
        self.index.read().edges(source, target, edge_type, limit)
    }

    pub async fn subgraph(
        &self,
        max_nodes: usize,
        max_depth: usize,
        center: Option<&str>,
    ) -> GraphData {
        self.ensure_fresh().await;
        self.index.read().subgraph(max_nodes, max_depth, center)
    }

    pub async fn search(&self, term: &str, max_results: usize) -> SearchResult {
        self.ensure_fresh().await;
        self.index.read().search(term, max_results)
    }

    pub async fn stats(&self) -> GraphStats {
        self.ensure_fresh().await;
        self.index.read().stats()
    }

    pub fn summary(&self) -> IndexSummary {
        let index = self.index.read();
        IndexSummary {
            documents: index.document_count(),
            edges: index.edge_count(),
            containers: index.containers().to_vec(),
            built_at: index.built_at().map(|at| at.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentboard_core::{AgentboardError, Result};
    use agentboard_store::{ContainerInfo, MemoryStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn settings(interval: u64) -> GraphSettings {
        GraphSettings {
            containers: vec![
                "agent_session_logs".to_string(),
                "system_inbox".to_string(),
                "missing_container".to_string(),
            ],
            scan_limit: 200,
            refresh_interval_secs: interval,
        }
    }

    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::new()
            .with_container("agent_session_logs", Some("/agent_name"))
            .with_container("system_inbox", Some("/category"));
        store
            .seed(
                "agent_session_logs",
                json!({"id": "log1", "agent_name": "alice", "session_id": "s1", "_ts": 10}),
            )
            .unwrap();
        store
            .seed(
                "system_inbox",
                json!({"id": "m1", "category": "inbox", "from": "alice", "to": "bob", "_ts": 20}),
            )
            .unwrap();
        Arc::new(store)
    }

    struct Counter(AtomicUsize);

    impl RefreshObserver for Counter {
        fn refreshed(&self, _report: &RefreshReport) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Memory store whose inbox scans fail while `down` is set.
    struct FlakyInbox {
        inner: Arc<MemoryStore>,
        down: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for FlakyInbox {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
            self.inner.list_containers().await
        }

        async fn query(&self, container: &str, query: &SqlQuery) -> Result<Vec<Value>> {
            if container == "system_inbox" && self.down.load(Ordering::SeqCst) {
                return Err(AgentboardError::store("inbox unavailable"));
            }
            self.inner.query(container, query).await
        }

        async fn count(&self, container: &str) -> Result<u64> {
            self.inner.count(container).await
        }

        async fn read(&self, container: &str, id: &str, pk: Option<&str>) -> Result<Value> {
            self.inner.read(container, id, pk).await
        }

        async fn upsert(&self, container: &str, doc: Value) -> Result<Value> {
            self.inner.upsert(container, doc).await
        }

        async fn create(&self, container: &str, doc: Value) -> Result<Value> {
            self.inner.create(container, doc).await
        }

        async fn delete(&self, container: &str, id: &str, pk: Option<&str>) -> Result<()> {
            self.inner.delete(container, id, pk).await
        }
    }

    #[tokio::test]
    async fn failed_scan_keeps_previous_documents() {
        let flaky = Arc::new(FlakyInbox {
            inner: store(),
            down: AtomicBool::new(false),
        });
        let service = GraphService::new(flaky.clone(), settings(3600));
        assert_eq!(service.refresh().await.documents, 2);

        flaky.down.store(true, Ordering::SeqCst);
        let report = service.refresh().await;
        assert!(report.containers_failed.contains(&"system_inbox".to_string()));
        assert_eq!(report.documents, 2);
        assert_eq!(service.edges(None, Some("bob"), None, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn refresh_skips_failing_containers() {
        let service = GraphService::new(store(), settings(120));
        let report = service.refresh().await;
        assert_eq!(report.documents, 2);
        assert_eq!(report.edges, 2);
        assert_eq!(report.containers_failed, vec!["missing_container".to_string()]);
        assert_eq!(report.containers_scanned.len(), 2);
    }

    #[tokio::test]
    async fn reads_refresh_lazily_once() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let service = GraphService::new(store(), settings(120)).with_observer(counter.clone());
        assert_eq!(service.nodes(None, None, 100).await.len(), 2);
        assert_eq!(service.edges(None, None, None, 100).await.len(), 2);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(service.summary().built_at.is_some());
    }

    #[tokio::test]
    async fn writes_update_the_index_incrementally() {
        let store = store();
        let service = GraphService::new(store.clone(), settings(3600));
        service.refresh().await;

        let doc = store
            .upsert(
                "system_inbox",
                json!({"id": "m2", "category": "inbox", "from": "bob", "to": "carol"}),
            )
            .await
            .unwrap();
        assert_eq!(
            service.record_write("system_inbox", &doc),
            Some(UpsertOutcome::Inserted)
        );
        assert_eq!(service.record_write("other", &doc), None);
        assert_eq!(service.edges(None, Some("carol"), None, 10).await.len(), 1);

        assert!(service.record_delete("system_inbox", "m2"));
        assert!(service.edges(None, Some("carol"), None, 10).await.is_empty());
    }

    #[tokio::test]
    async fn zero_interval_refreshes_every_read() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let service = GraphService::new(store(), settings(0)).with_observer(counter.clone());
        service.stats().await;
        service.stats().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
