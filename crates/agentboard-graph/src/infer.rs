//! Edge inference from shared field values.

use agentboard_core::document::{agent_name, doc_ts, session_id};
use serde_json::Value;

use crate::model::{EdgeType, GraphEdge};

fn recipients(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.as_str()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Edges contributed by one document, deduplicated by key.
pub fn infer_edges(doc_id: &str, doc: &Value) -> Vec<GraphEdge> {
    let created = doc_ts(doc).unwrap_or(0);
    let agent = agent_name(doc);
    let mut edges = Vec::new();

    if let (Some(agent), Some(session)) = (agent, session_id(doc)) {
        edges.push(
            GraphEdge::new(agent, session, EdgeType::Participates)
                .with_property("created", created),
        );
    }

    if let Some(sender) = doc.get("from").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        let subject = doc.get("subject").and_then(Value::as_str).unwrap_or("");
        for recipient in recipients(doc.get("to")) {
            edges.push(
                GraphEdge::new(sender, recipient, EdgeType::SendsTo)
                    .with_property("message_id", doc_id)
                    .with_property("subject", subject)
                    .with_property("created", created),
            );
        }
    }

    if let Some(agent) = agent {
        let text = doc.to_string().to_lowercase();
        if text.contains("context") {
            edges.push(
                GraphEdge::new(agent, doc_id, EdgeType::HasContext)
                .with_property("created", created),
            );
        }
        if text.contains("memory") {
            edges.push(
                GraphEdge::new(agent, doc_id, EdgeType::Remembers)
                .with_property("created", created),
            );
        }
    }

    let mut seen = std::collections::HashSet::new();
    edges.retain(|edge| seen.insert(edge.key()));
    edges
}
