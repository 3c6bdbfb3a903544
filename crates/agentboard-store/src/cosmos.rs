//! Azure Cosmos DB (SQL API) over its REST interface.

use std::collections::HashMap;
use std::time::Duration;

use agentboard_core::{document, AgentboardError, CosmosConfig, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use reqwest::{header::HeaderMap, Client, Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};
use url::Url;

use crate::partition::{bounded_candidates, filter_only};
use crate::query::SqlQuery;
use crate::sql;
use crate::store::{ContainerInfo, DocumentStore};

type HmacSha256 = Hmac<Sha256>;

pub const API_VERSION: &str = "2018-12-31";

/// Master-key authorization header value for one request.
pub fn auth_token(
    master_key: &str,
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
) -> Result<String> {
    let key = BASE64
        .decode(master_key.trim())
        .map_err(|e| AgentboardError::Config(format!("cosmos key is not valid base64: {e}")))?;
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| AgentboardError::Config(format!("invalid cosmos key: {e}")))?;
    mac.update(payload.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());
    let token = format!("type=master&ver=1.0&sig={signature}");
    Ok(url::form_urlencoded::byte_serialize(token.as_bytes()).collect())
}

fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    #[serde(rename = "DocumentCollections", default)]
    collections: Vec<Collection>,
}

#[derive(Debug, Deserialize)]
struct Collection {
    id: String,
    #[serde(rename = "partitionKey")]
    partition_key: Option<PartitionKeyDef>,
}

#[derive(Debug, Deserialize)]
struct PartitionKeyDef {
    #[serde(default)]
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentPage {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PartitionKeyRanges {
    #[serde(rename = "PartitionKeyRanges", default)]
    ranges: Vec<PartitionKeyRange>,
}

#[derive(Debug, Deserialize)]
struct PartitionKeyRange {
    id: String,
}

/// Where a query is routed.
#[derive(Clone, Copy)]
enum Route<'a> {
    Partition(&'a str),
    Range(&'a str),
}

pub struct CosmosStore {
    client: Client,
    endpoint: Url,
    database: String,
    key: SecretString,
    partition_paths: RwLock<HashMap<String, Option<String>>>,
    key_ranges: RwLock<HashMap<String, Vec<String>>>,
}

impl std::fmt::Debug for CosmosStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosmosStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("database", &self.database)
            .finish()
    }
}

impl CosmosStore {
    pub fn new(config: &CosmosConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| AgentboardError::Config("cosmos.endpoint is not set".into()))?;
        let key = config
            .key
            .clone()
            .ok_or_else(|| AgentboardError::Config("cosmos.key is not set".into()))?;
        let endpoint = Url::parse(endpoint)
            .map_err(|e| AgentboardError::Config(format!("invalid cosmos endpoint: {e}")))?;
        // Validate the key once so requests cannot fail on it later.
        auth_token(key.expose_secret(), "get", "dbs", "", &rfc1123_now())?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AgentboardError::store(format!("http client: {e}")))?;

        info!(
            "Cosmos store configured for database {} at {}",
            config.database, endpoint
        );
        Ok(Self {
            client,
            endpoint,
            database: config.database.clone(),
            key,
            partition_paths: RwLock::new(HashMap::new()),
            key_ranges: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| AgentboardError::Config("cosmos endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn collection_link(&self, container: &str) -> String {
        format!("dbs/{}/colls/{}", self.database, container)
    }

    async fn send(
        &self,
        method: Method,
        resource_type: &str,
        resource_link: &str,
        url: Url,
        headers: HeaderMap,
        body: Option<Value>,
    ) -> Result<Response> {
        let date = rfc1123_now();
        let token = auth_token(
            self.key.expose_secret(),
            method.as_str(),
            resource_type,
            resource_link,
            &date,
        )?;
        let mut request = self
            .client
            .request(method, url)
            .headers(headers)
            .header("authorization", token)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION);
        if let Some(body) = body {
            request = request.body(body.to_string());
        }
        let response = request
            .send()
            .await
            .map_err(|e| AgentboardError::store(format!("cosmos request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(AgentboardError::NotFound(format!(
                "{resource_link}: {}",
                document::truncate(&text, 200)
            )));
        }
        if status == StatusCode::CONFLICT {
            return Err(AgentboardError::Conflict(format!(
                "{resource_link}: {}",
                document::truncate(&text, 200)
            )));
        }
        Err(AgentboardError::store_status(
            status.as_u16(),
            document::truncate(&text, 500),
        ))
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| AgentboardError::store(format!("invalid cosmos response: {e}")))
    }

    async fn partition_path(&self, container: &str) -> Result<Option<String>> {
        let cached = self.partition_paths.read().get(container).cloned();
        if let Some(path) = cached {
            return Ok(path);
        }
        self.list_containers().await?;
        self.partition_paths
            .read()
            .get(container)
            .cloned()
            .ok_or_else(|| AgentboardError::NotFound(format!("container '{container}'")))
    }

    async fn partition_ranges(&self, container: &str) -> Result<Vec<String>> {
        let cached = self.key_ranges.read().get(container).cloned();
        if let Some(ranges) = cached {
            return Ok(ranges);
        }
        let link = self.collection_link(container);
        let url = self.url(&["dbs", &self.database, "colls", container, "pkranges"])?;
        let response = self
            .send(Method::GET, "pkranges", &link, url, HeaderMap::new(), None)
            .await?;
        let ranges: PartitionKeyRanges = Self::json(response).await?;
        let ids: Vec<String> = ranges.ranges.into_iter().map(|r| r.id).collect();
        debug!("Container {} has {} partition key ranges", container, ids.len());
        self.key_ranges
            .write()
            .insert(container.to_string(), ids.clone());
        Ok(ids)
    }

    /// POST a document. Without the upsert header Cosmos answers 409 for an
    /// existing id.
    async fn write_document(&self, container: &str, doc: Value, upsert: bool) -> Result<Value> {
        if document::doc_id(&doc).is_none() {
            return Err(AgentboardError::InvalidInput(
                "document requires an 'id'".into(),
            ));
        }
        let mut headers = HeaderMap::new();
        if upsert {
            headers.insert("x-ms-documentdb-is-upsert", header("True")?);
        }
        headers.insert("content-type", header("application/json")?);
        match self.partition_path(container).await? {
            Some(path) => {
                headers.insert(
                    "x-ms-documentdb-partitionkey",
                    header(&partition_header(&partition_value(&doc, &path)))?,
                );
            }
            None => warn!("Container {} has no partition key path", container),
        }
        let link = self.collection_link(container);
        let url = self.url(&["dbs", &self.database, "colls", container, "docs"])?;
        let response = self
            .send(Method::POST, "docs", &link, url, headers, Some(doc))
            .await?;
        Self::json(response).await
    }

    /// Run `query` on one partition or key range, following continuation tokens.
    async fn query_pages(
        &self,
        container: &str,
        text: &str,
        query: &SqlQuery,
        route: Route<'_>,
    ) -> Result<Vec<Value>> {
        let link = self.collection_link(container);
        let body = json!({ "query": text, "parameters": query.parameters });
        let mut documents = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut headers = HeaderMap::new();
            headers.insert("x-ms-documentdb-isquery", header("True")?);
            headers.insert("content-type", header("application/query+json")?);
            headers.insert("x-ms-max-item-count", header("-1")?);
            match route {
                Route::Partition(key) => {
                    headers.insert(
                        "x-ms-documentdb-partitionkey",
                        header(&partition_header(&Value::String(key.to_string())))?,
                    );
                }
                Route::Range(range) => {
                    headers.insert("x-ms-documentdb-query-enablecrosspartition", header("True")?);
                    headers.insert("x-ms-documentdb-partitionkeyrangeid", header(range)?);
                }
            }
            if let Some(token) = &continuation {
                headers.insert("x-ms-continuation", header(token)?);
            }

            let url = self.url(&["dbs", &self.database, "colls", container, "docs"])?;
            let response = self
                .send(Method::POST, "docs", &link, url, headers, Some(body.clone()))
                .await?;
            continuation = response
                .headers()
                .get("x-ms-continuation")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            let page: DocumentPage = Self::json(response).await?;
            documents.extend(page.documents);

            if continuation.is_none() {
                break;
            }
        }
        Ok(documents)
    }

    async fn find_partition_of(&self, container: &str, id: &str) -> Result<Option<Value>> {
        let Some(path) = self.partition_path(container).await? else {
            return Ok(None);
        };
        let query = SqlQuery::new("SELECT * FROM c WHERE c.id = @id").param("@id", id);
        let docs = self.query(container, &query).await?;
        let doc = docs
            .into_iter()
            .next()
            .ok_or_else(|| AgentboardError::NotFound(format!("document '{id}' in '{container}'")))?;
        Ok(Some(partition_value(&doc, &path)))
    }
}

/// Parsed `query` and the text each partition range runs. Bounded queries
/// push `TOP offset+limit` and their ORDER BY down; others fetch every match.
fn range_query(query: &SqlQuery) -> Result<(sql::Select, String)> {
    let select = query.parse()?;
    let remote = match sql::row_bound(&select, &query.params_map())? {
        Some(bound) => bounded_candidates(&query.text, bound),
        None => filter_only(&query.text),
    }
    .ok_or_else(|| AgentboardError::query("query has no FROM clause"))?;
    Ok((select, remote))
}

fn header(value: &str) -> Result<reqwest::header::HeaderValue> {
    reqwest::header::HeaderValue::from_str(value)
        .map_err(|e| AgentboardError::InvalidInput(format!("invalid header value: {e}")))
}

fn partition_header(value: &Value) -> String {
    Value::Array(vec![value.clone()]).to_string()
}

/// Partition key value of `doc` for `path`; `{}` when undefined.
fn partition_value(doc: &Value, path: &str) -> Value {
    let mut current = doc;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        match current.get(segment) {
            Some(next) => current = next,
            None => return json!({}),
        }
    }
    current.clone()
}

#[async_trait]
impl DocumentStore for CosmosStore {
    fn name(&self) -> &str {
        "cosmos"
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        let link = format!("dbs/{}", self.database);
        let url = self.url(&["dbs", &self.database, "colls"])?;
        let response = self
            .send(Method::GET, "colls", &link, url, HeaderMap::new(), None)
            .await?;
        let list: CollectionList = Self::json(response).await?;

        let containers: Vec<ContainerInfo> = list
            .collections
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id,
                partition_key_path: c.partition_key.and_then(|pk| pk.paths.into_iter().next()),
            })
            .collect();

        let mut paths = self.partition_paths.write();
        for container in &containers {
            paths.insert(container.id.clone(), container.partition_key_path.clone());
        }
        Ok(containers)
    }

    async fn query(&self, container: &str, query: &SqlQuery) -> Result<Vec<Value>> {
        if let Some(key) = query.partition_key.as_deref() {
            return self
                .query_pages(container, &query.text, query, Route::Partition(key))
                .await;
        }

        let ranges = self.partition_ranges(container).await?;
        if ranges.len() <= 1 {
            let range = ranges.first().map(String::as_str).unwrap_or("0");
            return self
                .query_pages(container, &query.text, query, Route::Range(range))
                .await;
        }

        // The gateway cannot merge ORDER BY, aggregates or paging across
        // ranges, so fetch candidates per range and evaluate locally.
        let (select, remote) = range_query(query)?;
        let mut candidates = Vec::new();
        for range in &ranges {
            candidates.extend(
                self.query_pages(container, &remote, query, Route::Range(range))
                    .await?,
            );
        }
        debug!(
            "Cross-partition query on {} fetched {} candidates from {} ranges",
            container,
            candidates.len(),
            ranges.len()
        );
        sql::execute(&select, candidates.iter(), &query.params_map())
    }

    async fn count(&self, container: &str) -> Result<u64> {
        let query = SqlQuery::new("SELECT VALUE COUNT(1) FROM c");
        let ranges = self.partition_ranges(container).await?;
        let mut total = 0;
        for range in ranges {
            let rows = self
                .query_pages(container, &query.text, &query, Route::Range(&range))
                .await?;
            total += rows.iter().filter_map(Value::as_u64).sum::<u64>();
        }
        Ok(total)
    }

    async fn read(&self, container: &str, id: &str, partition_key: Option<&str>) -> Result<Value> {
        let key = match partition_key {
            Some(key) => Some(Value::String(key.to_string())),
            None => self.find_partition_of(container, id).await?,
        };
        let link = format!("{}/docs/{}", self.collection_link(container), id);
        let url = self.url(&["dbs", &self.database, "colls", container, "docs", id])?;
        let mut headers = HeaderMap::new();
        if let Some(key) = key {
            headers.insert("x-ms-documentdb-partitionkey", header(&partition_header(&key))?);
        }
        let response = self
            .send(Method::GET, "docs", &link, url, headers, None)
            .await?;
        Self::json(response).await
    }

    async fn upsert(&self, container: &str, doc: Value) -> Result<Value> {
        self.write_document(container, doc, true).await
    }

    async fn create(&self, container: &str, doc: Value) -> Result<Value> {
        self.write_document(container, doc, false).await
    }

    async fn delete(&self, container: &str, id: &str, partition_key: Option<&str>) -> Result<()> {
        let key = match partition_key {
            Some(key) => Some(Value::String(key.to_string())),
            None => self.find_partition_of(container, id).await?,
        };
        let link = format!("{}/docs/{}", self.collection_link(container), id);
        let url = self.url(&["dbs", &self.database, "colls", container, "docs", id])?;
        let mut headers = HeaderMap::new();
        if let Some(key) = key {
            headers.insert("x-ms-documentdb-partitionkey", header(&partition_header(&key))?);
        }
        self.send(Method::DELETE, "docs", &link, url, headers, None)
            .await?;
        Ok(())
    }
}
