use agentboard_core::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::partition::{plan_batch, BatchRequest, PartitionRegistry};
use crate::query::SqlQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    /// Partition key path such as `/agent_name`.
    pub partition_key_path: Option<String>,
}

impl ContainerInfo {
    /// Partition field name derived from the path (`/agent_name` -> `agent_name`).
    pub fn partition_field(&self) -> Option<&str> {
        self.partition_key_path
            .as_deref()
            .map(|p| p.trim_start_matches('/'))
            .filter(|p| !p.is_empty())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs and health output.
    fn name(&self) -> &str;

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>>;

    /// Run a query. A query with a partition key only reads that partition.
    async fn query(&self, container: &str, query: &SqlQuery) -> Result<Vec<Value>>;

    async fn count(&self, container: &str) -> Result<u64>;

    /// Read a document by id; `NotFound` when it does not exist.
    async fn read(&self, container: &str, id: &str, partition_key: Option<&str>) -> Result<Value>;

    /// Create or replace a document, returning the stored version.
    async fn upsert(&self, container: &str, doc: Value) -> Result<Value>;

    /// Insert a new document; `Conflict` when the id already exists in its
    /// partition.
    async fn create(&self, container: &str, doc: Value) -> Result<Value>;

    async fn delete(&self, container: &str, id: &str, partition_key: Option<&str>) -> Result<()>;
}

/// Plan and run `requests` concurrently, returning results in request order.
///
/// A failing query yields an empty result instead of failing the batch.
pub async fn execute_batch(
    store: &dyn DocumentStore,
    registry: &PartitionRegistry,
    requests: &[BatchRequest],
) -> Vec<Vec<Value>> {
    let plan = plan_batch(registry, requests);
    debug!(
        "Executing {} queries in {} partition groups on {}",
        plan.queries.len(),
        plan.group_count,
        store.name()
    );

    let futures = plan.queries.iter().map(|planned| async move {
        let result = store.query(&planned.container, &planned.query).await;
        (planned.index, planned.container.as_str(), result)
    });

    let mut results = vec![Vec::new(); requests.len()];
    for (index, container, result) in join_all(futures).await {
        match result {
            Ok(rows) => results[index] = rows,
            Err(e) => error!("Batch query {} on {} failed: {}", index, container, e),
        }
    }
    results
}
