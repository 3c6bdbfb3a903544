use std::collections::{BTreeMap, HashMap};

use agentboard_core::{document, AgentboardError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::query::SqlQuery;
use crate::sql;
use crate::store::{ContainerInfo, DocumentStore};

#[derive(Debug, Default)]
struct Container {
    partition_path: Option<String>,
    /// partition value -> id -> document
    partitions: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Container {
    fn partition_value(&self, doc: &Value) -> String {
        let Some(path) = self.partition_path.as_deref() else {
            return String::new();
        };
        let mut current = doc;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match current.get(segment) {
                Some(next) => current = next,
                None => return String::new(),
            }
        }
        match current {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn docs<'a>(&'a self, partition: Option<&'a str>) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
        match partition {
            Some(key) => Box::new(
                self.partitions
                    .get(key)
                    .into_iter()
                    .flat_map(|docs| docs.values()),
            ),
            None => Box::new(self.partitions.values().flat_map(|docs| docs.values())),
        }
    }

    fn len(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }

    fn insert(&mut self, doc: Value) -> Result<Value> {
        let id = document::doc_id(&doc)
            .map(str::to_string)
            .ok_or_else(|| AgentboardError::InvalidInput("document requires an 'id'".into()))?;
        let partition = self.partition_value(&doc);
        self.partitions
            .entry(partition)
            .or_default()
            .insert(id, doc.clone());
        Ok(doc)
    }

    fn insert_new(&mut self, doc: Value) -> Result<Value> {
        let id = document::doc_id(&doc)
            .ok_or_else(|| AgentboardError::InvalidInput("document requires an 'id'".into()))?;
        let partition = self.partition_value(&doc);
        if self
            .partitions
            .get(&partition)
            .is_some_and(|docs| docs.contains_key(id))
        {
            return Err(AgentboardError::Conflict(format!("document '{id}' already exists")));
        }
        self.insert(doc)
    }

    fn locate(&self, id: &str, partition: Option<&str>) -> Option<String> {
        match partition {
            Some(key) => self
                .partitions
                .get(key)
                .filter(|docs| docs.contains_key(id))
                .map(|_| key.to_string()),
            None => self
                .partitions
                .iter()
                .find(|(_, docs)| docs.contains_key(id))
                .map(|(key, _)| key.clone()),
        }
    }
}

/// Document store held in process memory.
///
/// Used when no Cosmos account is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    containers: RwLock<HashMap<String, Container>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`MemoryStore::create_container`].
    pub fn with_container(self, name: &str, partition_key_path: Option<&str>) -> Self {
        self.create_container(name, partition_key_path);
        self
    }

    /// Declare a container. Existing containers keep their documents.
    pub fn create_container(&self, name: &str, partition_key_path: Option<&str>) {
        let mut containers = self.containers.write();
        containers
            .entry(name.to_string())
            .or_insert_with(|| Container {
                partition_path: partition_key_path.map(str::to_string),
                partitions: BTreeMap::new(),
            });
    }

    /// Insert a document as-is, stamping `_ts` only when it is missing.
    pub fn seed(&self, container: &str, mut doc: Value) -> Result<()> {
        if doc.get("_ts").is_none() {
            if let Value::Object(map) = &mut doc {
                map.insert("_ts".into(), Value::from(document::now_ts()));
            }
        }
        let mut containers = self.containers.write();
        let target = containers
            .get_mut(container)
            .ok_or_else(|| not_found_container(container))?;
        target.insert(doc)?;
        Ok(())
    }
}

fn stamped(mut doc: Value) -> Result<Value> {
    let Value::Object(map) = &mut doc else {
        return Err(AgentboardError::InvalidInput(
            "document must be a JSON object".into(),
        ));
    };
    map.insert("_ts".into(), Value::from(document::now_ts()));
    Ok(doc)
}

fn not_found_container(container: &str) -> AgentboardError {
    AgentboardError::NotFound(format!("container '{container}'"))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        let containers = self.containers.read();
        let mut out: Vec<ContainerInfo> = containers
            .iter()
            .map(|(id, c)| ContainerInfo {
                id: id.clone(),
                partition_key_path: c.partition_path.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn query(&self, container: &str, query: &SqlQuery) -> Result<Vec<Value>> {
        let select = query.parse()?;
        let params = query.params_map();
        let containers = self.containers.read();
        let target = containers
            .get(container)
            .ok_or_else(|| not_found_container(container))?;
        let rows = sql::execute(&select, target.docs(query.partition_key.as_deref()), &params)?;
        debug!(
            "Memory query on {} returned {} rows (partition: {:?})",
            container,
            rows.len(),
            query.partition_key
        );
        Ok(rows)
    }

    async fn count(&self, container: &str) -> Result<u64> {
        let containers = self.containers.read();
        containers
            .get(container)
            .map(|c| c.len() as u64)
            .ok_or_else(|| not_found_container(container))
    }

    async fn read(&self, container: &str, id: &str, partition_key: Option<&str>) -> Result<Value> {
        let containers = self.containers.read();
        let target = containers
            .get(container)
            .ok_or_else(|| not_found_container(container))?;
        target
            .locate(id, partition_key)
            .and_then(|key| target.partitions.get(&key))
            .and_then(|docs| docs.get(id))
            .cloned()
            .ok_or_else(|| AgentboardError::NotFound(format!("document '{id}' in '{container}'")))
    }

    async fn upsert(&self, container: &str, doc: Value) -> Result<Value> {
        let doc = stamped(doc)?;
        let mut containers = self.containers.write();
        let target = containers
            .get_mut(container)
            .ok_or_else(|| not_found_container(container))?;
        target.insert(doc)
    }

    async fn create(&self, container: &str, doc: Value) -> Result<Value> {
        let doc = stamped(doc)?;
        let mut containers = self.containers.write();
        let target = containers
            .get_mut(container)
            .ok_or_else(|| not_found_container(container))?;
        target.insert_new(doc)
    }

    async fn delete(&self, container: &str, id: &str, partition_key: Option<&str>) -> Result<()> {
        let mut containers = self.containers.write();
        let target = containers
            .get_mut(container)
            .ok_or_else(|| not_found_container(container))?;
        let key = target
            .locate(id, partition_key)
            .ok_or_else(|| AgentboardError::NotFound(format!("document '{id}' in '{container}'")))?;
        if let Some(docs) = target.partitions.get_mut(&key) {
            docs.remove(id);
            if docs.is_empty() {
                target.partitions.remove(&key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        let store = MemoryStore::new()
            .with_container("agent_logs", Some("/agent_name"))
            .with_container("plain", None);
        store
            .seed("agent_logs", json!({"id": "1", "agent_name": "a", "_ts": 10}))
            .unwrap();
        store
            .seed("agent_logs", json!({"id": "2", "agent_name": "b", "_ts": 20}))
            .unwrap();
        store
            .seed("agent_logs", json!({"id": "3", "agent_name": "a", "_ts": 30}))
            .unwrap();
        store
    }

    #[tokio::test]
    async fn partition_scoped_queries_only_scan_that_partition() {
        let store = store();
        let all = store
            .query("agent_logs", &SqlQuery::new("SELECT VALUE c.id FROM c"))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let scoped = store
            .query(
                "agent_logs",
                &SqlQuery::new("SELECT VALUE c.id FROM c ORDER BY c._ts DESC")
                    .with_partition_key("a"),
            )
            .await
            .unwrap();
        assert_eq!(scoped, vec![json!("3"), json!("1")]);
    }

    #[tokio::test]
    async fn upsert_stamps_ts_and_replaces() {
        let store = store();
        let stored = store
            .upsert("plain", json!({"id": "x", "v": 1}))
            .await
            .unwrap();
        assert!(stored["_ts"].as_i64().unwrap() > 1_600_000_000);

        store.upsert("plain", json!({"id": "x", "v": 2})).await.unwrap();
        assert_eq!(store.count("plain").await.unwrap(), 1);
        let doc = store.read("plain", "x", None).await.unwrap();
        assert_eq!(doc["v"], 2);
    }

    #[tokio::test]
    async fn create_refuses_existing_ids_within_a_partition() {
        let store = store();
        store
            .create("agent_logs", json!({"id": "9", "agent_name": "a", "v": 1}))
            .await
            .unwrap();
        assert!(matches!(
            store
                .create("agent_logs", json!({"id": "9", "agent_name": "a", "v": 2}))
                .await,
            Err(AgentboardError::Conflict(_))
        ));
        assert_eq!(store.read("agent_logs", "9", Some("a")).await.unwrap()["v"], 1);

        // ids are unique per partition value
        store
            .create("agent_logs", json!({"id": "9", "agent_name": "b"}))
            .await
            .unwrap();
        assert_eq!(store.count("agent_logs").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn read_and_delete_respect_partitions() {
        let store = store();
        assert!(store.read("agent_logs", "1", Some("b")).await.is_err());
        assert_eq!(
            store.read("agent_logs", "1", Some("a")).await.unwrap()["_ts"],
            10
        );

        store.delete("agent_logs", "1", None).await.unwrap();
        assert_eq!(store.count("agent_logs").await.unwrap(), 2);
        assert!(matches!(
            store.delete("agent_logs", "1", None).await,
            Err(AgentboardError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_containers_and_missing_ids() {
        let store = store();
        assert!(matches!(
            store.count("nope").await,
            Err(AgentboardError::NotFound(_))
        ));
        assert!(matches!(
            store.upsert("plain", json!({"v": 1})).await,
            Err(AgentboardError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn lists_containers_sorted() {
        let names: Vec<String> = store()
            .list_containers()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(names, vec!["agent_logs", "plain"]);
    }
}
