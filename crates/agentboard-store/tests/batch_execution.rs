use agentboard_store::{
    execute_batch, BatchRequest, DocumentStore, MemoryStore, PartitionRegistry, QueryFilter,
    SqlQuery,
};
use serde_json::json;

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new()
        .with_container("system_inbox", Some("/category"))
        .with_container("agent_session_logs", Some("/agent_name"));

    store
        .seed(
            "system_inbox",
            json!({"id": "m1", "category": "inbox", "from": "a", "to": "b", "_ts": 100}),
        )
        .unwrap();
    store
        .seed(
            "system_inbox",
            json!({"id": "m2", "category": "urgent", "from": "b", "to": "a", "_ts": 200}),
        )
        .unwrap();
    store
        .seed(
            "agent_session_logs",
            json!({"id": "s1", "agent_name": "a", "_ts": 300}),
        )
        .unwrap();
    store
        .seed(
            "agent_session_logs",
            json!({"id": "s2", "agent_name": "b", "_ts": 400}),
        )
        .unwrap();
    store
}

#[tokio::test]
async fn batch_results_follow_request_order() {
    let store = seeded_store();
    let registry = PartitionRegistry::builtin();
    let requests = vec![
        BatchRequest::new(
            "agent_session_logs",
            SqlQuery::new("SELECT VALUE c.id FROM c ORDER BY c._ts DESC"),
        ),
        // system_inbox defaults to the `inbox` partition
        BatchRequest::new("system_inbox", SqlQuery::new("SELECT VALUE c.id FROM c")),
        BatchRequest::new(
            "agent_session_logs",
            SqlQuery::new("SELECT VALUE c.id FROM c").with_partition_key("a"),
        ),
    ];

    let results = execute_batch(&store, &registry, &requests).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], vec![json!("s2"), json!("s1")]);
    assert_eq!(results[1], vec![json!("m1")]);
    assert_eq!(results[2], vec![json!("s1")]);
}

#[tokio::test]
async fn failed_queries_yield_empty_results() {
    let store = seeded_store();
    let registry = PartitionRegistry::builtin();
    let requests = vec![
        BatchRequest::new("missing_container", SqlQuery::new("SELECT * FROM c")),
        BatchRequest::new("agent_session_logs", SqlQuery::new("SELECT * FROM c WHERE")),
        BatchRequest::new("agent_session_logs", SqlQuery::new("SELECT * FROM c")),
    ];

    let results = execute_batch(&store, &registry, &requests).await;
    assert!(results[0].is_empty());
    assert!(results[1].is_empty());
    assert_eq!(results[2].len(), 2);
}

#[tokio::test]
async fn filters_run_against_the_store() {
    let store = seeded_store();
    let mut filter = QueryFilter::new();
    filter.add_agent("from", "b").add_text_search(&["to"], "A");
    let query = filter.build("SELECT * FROM c", Some("ORDER BY c._ts DESC"));

    let rows = store.query("system_inbox", &query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "m2");
}

#[tokio::test]
async fn optimized_queries_route_to_one_partition() {
    let store = seeded_store();
    let registry = PartitionRegistry::builtin();

    let (query, meta) = SqlQuery::new("SELECT * FROM c ORDER BY c._ts DESC").optimize(
        &registry,
        "system_inbox",
        Some("urgent"),
    );
    assert!(meta.rewritten);
    let rows = store.query("system_inbox", &query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "m2");
}
