use agentboard_api::{create_router, in_memory_store, AppState};
use agentboard_cache::DocumentCache;
use agentboard_core::{document::now_ts, ConfigManager, Settings};
use agentboard_graph::GraphService;
use agentboard_store::{DocumentStore, MemoryStore, PartitionRegistry};
use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;

fn seeded_store(registry: &PartitionRegistry, settings: &Settings) -> MemoryStore {
    let store = in_memory_store(registry, settings);
    let now = now_ts();
    store
        .seed(
            "agent_session_logs",
            json!({
                "id": "session-1",
                "agent_name": "alice",
                "content": "Reviewing the deploy pipeline",
                "_ts": now - 60,
            }),
        )
        .unwrap();
    store
        .seed(
            "system_inbox",
            json!({
                "id": "msg-1",
                "from": "bob",
                "to": "alice",
                "content": "Can you look at the release notes?",
                "timestamp": "2026-01-02T10:00:00+00:00",
                "status": "unread",
                "priority": "HIGH",
                "type": "MESSAGE",
                "category": "inbox",
                "thread_id": "thread-1",
                "_ts": now - 120,
            }),
        )
        .unwrap();
    store
        .seed(
            "identity_cards",
            json!({"id": "card-alice", "agent_name": "alice", "content": "Release engineer"}),
        )
        .unwrap();
    store
}

fn test_server() -> (TestServer, Arc<MemoryStore>) {
    let settings = Settings::default();
    let registry = PartitionRegistry::with_overrides(&settings.partitions);
    let store = Arc::new(seeded_store(&registry, &settings));
    let cache = DocumentCache::memory(&settings.cache);
    let graph = GraphService::new(store.clone(), settings.graph.clone());
    let config = Arc::new(ConfigManager::from_settings(settings).expect("config"));

    let state = AppState::from_parts(config, store.clone(), registry, cache, graph);
    let server = TestServer::new(create_router(state)).expect("test server");
    (server, store)
}

#[tokio::test]
async fn health_endpoints_report_store() {
    let (server, _) = test_server();

    let resp = server.get("/health").await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert!(body.get("version").is_some());
    assert_eq!(body["components"]["store"]["status"], "healthy");

    let resp = server.get("/health/ready").await;
    assert_eq!(resp.status_code(), 200);
    assert_eq!(resp.json::<Value>()["status"], "ready");

    let resp = server.get("/health/live").await;
    assert_eq!(resp.json::<Value>()["status"], "alive");
}

#[tokio::test]
async fn root_lists_endpoints() {
    let (server, _) = test_server();
    let body: Value = server.get("/").await.json();
    assert_eq!(body["name"], "Agentboard API");
    assert_eq!(body["store"], "memory");
    assert!(body["endpoints"]
        .as_array()
        .unwrap()
        .contains(&json!("/api/v1/graph")));
}

#[tokio::test]
async fn agents_status_discovers_recent_agents() {
    let (server, _) = test_server();

    let resp = server.get("/api/v1/agents/status").await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["agents"][0]["agent_name"], "alice");
    assert_eq!(body["agents"][0]["status"], "active");
    assert_eq!(body["summary"]["total_agents"], 1);
    assert_eq!(body["summary"]["active_agents"], 1);
}

#[tokio::test]
async fn sent_messages_reach_the_inbox() {
    let (server, _) = test_server();

    let resp = server
        .post("/api/v1/messages")
        .json(&json!({
            "from_agent": "alice",
            "to": ["bob", "carol"],
            "content": "Release notes are updated",
            "thread_id": "thread-1",
        }))
        .await;
    assert_eq!(resp.status_code(), 200);
    let sent: Value = resp.json();
    assert_eq!(sent["success"], true);
    let message_id = sent["message_id"].as_str().unwrap().to_string();
    assert!(message_id.ends_with("_alice_01"));

    let resp = server.get("/api/v1/messages").add_query_param("agent", "carol").await;
    assert_eq!(resp.status_code(), 200);
    let messages: Vec<Value> = resp.json();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["from"], "alice");

    let body: Value = server.get("/api/v1/messages/alice").await.json();
    assert_eq!(body["agent"], "alice");
    assert_eq!(body["total"], 1);

    let body: Value = server.get("/api/v1/messages/thread/thread-1").await.json();
    assert_eq!(body["total"], 2);

    let resp = server
        .put(&format!("/api/v1/messages/{message_id}/status"))
        .add_query_param("status", "read")
        .await;
    assert_eq!(resp.status_code(), 200);

    let unread: Vec<Value> = server
        .get("/api/v1/messages")
        .add_query_param("agent", "bob")
        .add_query_param("status", "unread")
        .await
        .json();
    assert!(unread.is_empty());
}

#[tokio::test]
async fn send_message_requires_content() {
    let (server, _) = test_server();
    let resp = server
        .post("/api/v1/messages")
        .json(&json!({"from_agent": "alice", "to": "bob", "content": "  "}))
        .await;
    assert_eq!(resp.status_code(), 400);
    assert_eq!(resp.json::<Value>()["status"], 400);
}

#[tokio::test]
async fn message_limit_is_bounded() {
    let (server, _) = test_server();
    let resp = server.get("/api/v1/messages").add_query_param("limit", "0").await;
    assert_eq!(resp.status_code(), 400);
}

#[tokio::test]
async fn document_listing_validates_filters() {
    let (server, _) = test_server();

    let resp = server
        .get("/api/v1/cosmos/containers/identity_cards/documents")
        .add_query_param("status", "active")
        .await;
    assert_eq!(resp.status_code(), 400);

    let resp = server
        .get("/api/v1/cosmos/containers/system_inbox/documents")
        .add_query_param("status", "unread")
        .await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["documents"][0]["id"], "msg-1");
}

#[tokio::test]
async fn created_documents_can_be_read_back() {
    let (server, store) = test_server();

    let resp = server
        .post("/api/v1/cosmos/containers/identity_cards/documents")
        .json(&json!({"data": {"id": "card-bob", "agent_name": "bob"}}))
        .await;
    assert_eq!(resp.status_code(), 200);
    assert!(store
        .read("identity_cards", "card-bob", None)
        .await
        .is_ok());

    let resp = server
        .get("/api/v1/cosmos/containers/identity_cards/documents/card-bob")
        .await;
    assert_eq!(resp.status_code(), 200);
    assert_eq!(resp.json::<Value>()["document"]["agent_name"], "bob");

    let resp = server
        .post("/api/v1/cosmos/containers/identity_cards/documents")
        .json(&json!({"data": [1, 2]}))
        .await;
    assert_eq!(resp.status_code(), 400);
}

#[tokio::test]
async fn ad_hoc_queries_are_scoped_to_the_partition() {
    let (server, _) = test_server();

    let resp = server
        .post("/api/v1/cosmos/query")
        .json(&json!({
            "container": "agent_session_logs",
            "query": "SELECT * FROM c",
            "partition_key": "alice",
        }))
        .await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["rewritten"], true);
    assert_eq!(body["partition_field"], "agent_name");
    assert!(body["executed_query"]
        .as_str()
        .unwrap()
        .contains("@partitionKey"));
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn graph_reflects_seeded_documents() {
    let (server, _) = test_server();

    let resp = server
        .get("/api/v1/graph/nodes")
        .add_query_param("node_type", "message")
        .await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["nodes"][0]["id"], "msg-1");

    let resp = server
        .get("/api/v1/graph/nodes")
        .add_query_param("node_type", "planet")
        .await;
    assert_eq!(resp.status_code(), 400);

    let resp = server.get("/api/v1/graph/search").await;
    assert_eq!(resp.status_code(), 400);

    let resp = server.get("/api/v1/graph/stats").await;
    assert_eq!(resp.json::<Value>()["success"], true);
}

#[tokio::test]
async fn memory_layers_serve_their_containers() {
    let (server, _) = test_server();

    let body: Value = server.get("/api/v1/memory-layers/layers").await.json();
    assert_eq!(body["summary"]["total_layers"], 4);
    assert_eq!(body["layers"]["layer_1"]["item_count"], 1);
    assert_eq!(body["layers"]["layer_1"]["items"][0]["content"], "Release engineer");

    let resp = server
        .post("/api/v1/memory-layers/layer/layer_3/add")
        .json(&json!({"content": "Working on release 1.2", "agent_name": "alice"}))
        .await;
    assert_eq!(resp.status_code(), 200);

    let body: Value = server.get("/api/v1/memory-layers/layer/layer_3").await.json();
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["items"][0]["content"], "Working on release 1.2");

    let resp = server.get("/api/v1/memory-layers/layer/layer_7").await;
    assert_eq!(resp.status_code(), 404);
}

#[tokio::test]
async fn cache_can_be_cleared() {
    let (server, _) = test_server();

    server.get("/api/v1/agents/status").await;
    let stats: Value = server.get("/api/v1/monitoring/cache").await.json();
    assert_eq!(stats["enabled"], true);

    let resp = server.delete("/api/v1/monitoring/cache").await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["message"], "Cleared all cache entries");
}

#[tokio::test]
async fn back_to_back_sends_keep_both_messages() {
    let (server, _) = test_server();
    let body = json!({"from_agent": "zed", "to": ["carol"], "content": "ping"});

    let first: Value = server.post("/api/v1/messages").json(&body).await.json();
    let second: Value = server.post("/api/v1/messages").json(&body).await.json();
    assert_ne!(first["message_id"], second["message_id"]);

    let messages: Vec<Value> = server
        .get("/api/v1/messages")
        .add_query_param("agent", "carol")
        .await
        .json();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn repeated_memory_items_are_not_replaced() {
    let (server, _) = test_server();
    for content in ["first note", "second note"] {
        let resp = server
            .post("/api/v1/memory-layers/layer/layer_4/add")
            .json(&json!({"content": content}))
            .await;
        assert_eq!(resp.status_code(), 200);
    }
    let body: Value = server.get("/api/v1/memory-layers/layer/layer_4").await.json();
    assert_eq!(body["total_count"], 2);

    let resp = server
        .post("/api/v1/memory-layers/layer/layer_4/add")
        .json(&json!({"id": body["items"][0]["id"], "content": "clobber"}))
        .await;
    assert_eq!(resp.status_code(), 409);
}

#[tokio::test]
async fn creating_an_existing_document_conflicts() {
    let (server, _) = test_server();
    let resp = server
        .post("/api/v1/cosmos/containers/identity_cards/documents")
        .json(&json!({"data": {"id": "card-alice", "agent_name": "alice"}}))
        .await;
    assert_eq!(resp.status_code(), 409);
    assert_eq!(resp.json::<Value>()["status"], 409);
}

#[tokio::test]
async fn document_listings_are_cached_apart_and_invalidated_by_writes() {
    let (server, _) = test_server();
    let path = "/api/v1/cosmos/containers/identity_cards/documents";

    assert_eq!(server.get(path).await.json::<Value>()["cached"], false);
    assert_eq!(server.get(path).await.json::<Value>()["cached"], true);
    server.get("/api/v1/cosmos/containers").await;

    let stats: Value = server.get("/api/v1/monitoring/cache").await.json();
    assert_eq!(stats["stats"]["namespaces"]["docs/identity_cards"], 1);
    assert_eq!(stats["stats"]["namespaces"]["containers"], 1);

    server
        .post(path)
        .json(&json!({"data": {"id": "card-bob", "agent_name": "bob"}}))
        .await;
    let body: Value = server.get(path).await.json();
    assert_eq!(body["cached"], false);
    assert_eq!(body["count"], 2);

    let resp = server
        .delete("/api/v1/monitoring/cache")
        .add_query_param("container", "identity_cards")
        .await;
    assert_eq!(resp.json::<Value>()["removed"], 1);
}

#[tokio::test]
async fn document_search_spans_containers() {
    let (server, _) = test_server();

    let resp = server
        .get("/api/v1/cosmos/search")
        .add_query_param("q", "release")
        .await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["count"], 2);
    let ids: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|hit| hit["document"]["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["card-alice", "msg-1"]);

    let scoped: Value = server
        .get("/api/v1/cosmos/search")
        .add_query_param("q", "release")
        .add_query_param("containers", "system_inbox")
        .await
        .json();
    assert_eq!(scoped["count"], 1);
    assert_eq!(scoped["results"][0]["container"], "system_inbox");

    let resp = server.get("/api/v1/cosmos/search").await;
    assert_eq!(resp.status_code(), 400);
}

#[tokio::test]
async fn user_content_reads_the_inbox() {
    let (server, _) = test_server();
    let body: Value = server.get("/api/v1/cosmos/user-content").await.json();
    assert_eq!(body["container"], "system_inbox");
    assert_eq!(body["messages"][0]["id"], "msg-1");
}

#[tokio::test]
async fn duplicate_messages_are_found_and_removed() {
    let (server, store) = test_server();
    store
        .seed(
            "system_inbox",
            json!({
                "id": "msg-2",
                "from": "bob",
                "to": "alice",
                "content": "Can you look at the release notes?",
                "category": "inbox",
            }),
        )
        .unwrap();

    let body: Value = server.get("/api/v1/cosmos/messages/analyze").await.json();
    assert_eq!(body["container"], "system_inbox");
    assert_eq!(body["analysis"]["duplicate_groups"], 1);
    assert_eq!(body["analysis"]["total_duplicates"], 1);

    let resp = server
        .post("/api/v1/cosmos/messages/remove-duplicates")
        .json(&json!({"duplicate_ids": []}))
        .await;
    assert_eq!(resp.status_code(), 400);

    let body: Value = server
        .post("/api/v1/cosmos/messages/remove-duplicates")
        .json(&json!({"duplicate_ids": ["msg-2", "msg-missing"]}))
        .await
        .json();
    assert_eq!(body["removed"], 1);
    assert_eq!(body["errors"][0]["id"], "msg-missing");
    assert_eq!(body["errors"][0]["error"], "Message not found");
    assert_eq!(store.count("system_inbox").await.unwrap(), 1);
}

#[tokio::test]
async fn log_analysis_uses_the_first_existing_log_container() {
    let (server, _) = test_server();
    let body: Value = server.get("/api/v1/cosmos/logs/analyze").await.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["container"], "agent_session_logs");
    assert_eq!(body["analysis"]["duplicates"], 0);
}

#[tokio::test]
async fn monitoring_reports_database_performance_and_alerts() {
    let (server, _) = test_server();

    let body: Value = server.get("/api/v1/monitoring/database").await.json();
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["summary"]["health_percentage"], 100.0);
    assert_eq!(
        body["summary"]["healthy_containers"],
        body["summary"]["total_containers"]
    );

    let resp = server
        .get("/api/v1/monitoring/performance")
        .add_query_param("hours", 6)
        .await;
    assert_eq!(resp.status_code(), 200);
    assert_eq!(resp.json::<Value>()["period"]["hours"], 6);

    let resp = server
        .get("/api/v1/monitoring/performance")
        .add_query_param("hours", 500)
        .await;
    assert_eq!(resp.status_code(), 400);

    let body: Value = server.get("/api/v1/monitoring/alerts").await.json();
    assert_eq!(body["success"], true);
    assert!(body["alerts"].is_array());
}

#[tokio::test]
async fn memory_stats_and_search_cover_memory_containers() {
    let (server, store) = test_server();
    store
        .seed(
            "memory_contexts",
            json!({
                "id": "mem-1",
                "agent_name": "alice",
                "type": "operational",
                "name": "Deploy checklist",
                "size_bytes": 512,
            }),
        )
        .unwrap();

    let body: Value = server.get("/api/v1/memory/stats").await.json();
    assert_eq!(body["stats"]["total_layers"], 1);
    assert_eq!(body["stats"]["layers_by_type"]["operational"], 1);
    assert_eq!(body["stats"]["total_size_bytes"], 512);

    let body: Value = server
        .post("/api/v1/memory/search")
        .json(&json!({"search_term": "deploy", "agent_name": "alice"}))
        .await
        .json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["_container"], "memory_contexts");
    assert_eq!(body["results"][0]["_search_highlights"][0]["field"], "name");

    let resp = server
        .post("/api/v1/memory/search")
        .json(&json!({"limit": 0}))
        .await;
    assert_eq!(resp.status_code(), 400);
}
