//! Node classification for scanned documents.

use agentboard_core::document::{agent_name, doc_id, doc_ts, str_field, ts_to_iso};
use serde_json::{Map, Value};

use crate::model::{GraphNode, NodeType};

/// Fields copied verbatim into node properties.
const PROPERTY_FIELDS: &[&str] = &[
    "agentName",
    "agent_name",
    "sessionId",
    "session_id",
    "subject",
    "from",
    "to",
    "timestamp",
    "_ts",
];

const LABEL_FIELDS: &[&str] = &["subject", "name", "agentName", "agent_name"];

pub fn classify(container: &str, doc: &Value) -> NodeType {
    if container == "agent_session_logs" {
        if agent_name(doc).is_some() {
            NodeType::Agent
        } else {
            NodeType::Session
        }
    } else if container == "system_inbox" {
        NodeType::Message
    } else if container.contains("context") {
        NodeType::Context
    } else if container.contains("memory") {
        NodeType::Memory
    } else {
        NodeType::Document
    }
}

pub fn node_label(id: &str, doc: &Value) -> String {
    match str_field(doc, LABEL_FIELDS) {
        Some(label) => label.to_string(),
        None => id.chars().take(20).collect(),
    }
}

/// `min(5, len(content) / 1000 + 1)`; 1.0 without content.
pub fn node_size(doc: &Value) -> f64 {
    let length = match doc.get("content") {
        None | Some(Value::Null) => return 1.0,
        Some(Value::String(s)) if s.is_empty() => return 1.0,
        Some(Value::String(s)) => s.chars().count(),
        Some(other) => other.to_string().chars().count(),
    };
    (length as f64 / 1000.0 + 1.0).min(5.0)
}

pub fn node_properties(doc: &Value) -> Map<String, Value> {
    let mut properties = Map::new();
    for field in PROPERTY_FIELDS {
        if let Some(value) = doc.get(*field) {
            properties.insert((*field).to_string(), value.clone());
        }
    }
    if let Some(created) = doc_ts(doc).filter(|ts| *ts > 0).and_then(ts_to_iso) {
        properties.insert("created".to_string(), Value::String(created));
    }
    properties
}

/// Node for `doc`, or `None` when it has no usable id.
pub fn node_from_document(container: &str, doc: &Value) -> Option<GraphNode> {
    let id = doc_id(doc)?;
    let node_type = classify(container, doc);
    Some(GraphNode {
        id: id.to_string(),
        label: node_label(id, doc),
        node_type,
        properties: node_properties(doc),
        size: node_size(doc),
        color: node_type.color().to_string(),
    })
}
