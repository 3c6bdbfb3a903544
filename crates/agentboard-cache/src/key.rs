use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// `namespace:operation[:hash]` where the hash covers the canonical JSON of the
/// operation's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    operation: String,
    params_hash: Option<String>,
}

impl CacheKey {
    pub fn new(namespace: &str, operation: &str) -> Self {
        Self {
            namespace: sanitize(namespace),
            operation: sanitize(operation),
            params_hash: None,
        }
    }

    /// Attach a hash of `params`. `null` and empty objects add no hash.
    pub fn with_params<P: Serialize + ?Sized>(mut self, params: &P) -> Self {
        let value = serde_json::to_value(params).unwrap_or(Value::Null);
        let empty = match &value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if !empty {
            self.params_hash = Some(params_hash(&value));
        }
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn params_hash(&self) -> Option<&str> {
        self.params_hash.as_deref()
    }

    /// Prefix matching every key of `namespace`.
    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{}:", sanitize(namespace))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.operation)?;
        if let Some(hash) = &self.params_hash {
            write!(f, ":{hash}")?;
        }
        Ok(())
    }
}

/// Namespace of a rendered key.
pub fn namespace_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| if c == ':' || c.is_whitespace() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// First 16 hex characters of SHA-256 over the canonical JSON.
pub fn params_hash(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

/// JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (idx, (key, item)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
