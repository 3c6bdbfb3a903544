use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::partition::{OptimizedQuery, PartitionRegistry};
use crate::sql::{self, Params};

/// A named query parameter, serialized the way the Cosmos REST API expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub value: Value,
}

impl QueryParam {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let name = if name.starts_with('@') {
            name
        } else {
            format!("@{name}")
        };
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Query text plus bound parameters and an optional single-partition target.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SqlQuery {
    pub text: String,
    #[serde(default)]
    pub parameters: Vec<QueryParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
}

impl SqlQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
            partition_key: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let param = QueryParam::new(name, value);
        self.parameters.retain(|p| p.name != param.name);
        self.parameters.push(param);
        self
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Rewrite the query for `container` so it targets a single partition when a
    /// partition value is known, binding `@partitionKey`.
    pub fn optimize(
        self,
        registry: &PartitionRegistry,
        container: &str,
        explicit_value: Option<&str>,
    ) -> (Self, OptimizedQuery) {
        let optimized = registry.optimize(
            &self.text,
            container,
            explicit_value.or(self.partition_key.as_deref()),
        );
        let mut query = SqlQuery {
            text: optimized.text.clone(),
            parameters: self.parameters,
            partition_key: optimized.partition_key.clone().or(self.partition_key),
        };
        if optimized.rewritten {
            if let Some(value) = &optimized.partition_key {
                query = query.param("@partitionKey", value.clone());
            }
        }
        (query, optimized)
    }

    pub fn params_map(&self) -> Params {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }

    pub fn parse(&self) -> agentboard_core::Result<sql::Select> {
        sql::parse(&self.text)
    }
}

/// Render `alias.field`, switching to bracket notation for reserved words and
/// names that are not plain identifiers.
pub fn field_ref(alias: &str, field: &str) -> String {
    let plain = field
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain && !sql::is_reserved(field) {
        format!("{alias}.{field}")
    } else {
        format!("{alias}[\"{}\"]", field.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Builds a WHERE clause from optional dashboard filters.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    conditions: Vec<String>,
    parameters: Vec<QueryParam>,
    used: HashMap<String, usize>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `@base`, then `@base_2`, `@base_3`, ... for repeated filter kinds.
    fn bind(&mut self, base: &str, value: Value) -> String {
        let count = self.used.entry(base.to_string()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            format!("@{base}")
        } else {
            format!("@{base}_{count}")
        };
        self.parameters.push(QueryParam {
            name: name.clone(),
            value,
        });
        name
    }

    /// `field = @base`; empty values add nothing.
    pub fn add_equals(&mut self, base: &str, field: &str, value: &str) -> &mut Self {
        if !value.is_empty() {
            let param = self.bind(base, Value::String(value.to_string()));
            self.conditions
                .push(format!("{} = {param}", field_ref("c", field)));
        }
        self
    }

    /// Range over an epoch-seconds field such as `_ts`.
    pub fn add_date_range(
        &mut self,
        field: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> &mut Self {
        if let Some(start) = start {
            let param = self.bind("start_date", Value::from(start.timestamp()));
            self.conditions
                .push(format!("{} >= {param}", field_ref("c", field)));
        }
        if let Some(end) = end {
            let param = self.bind("end_date", Value::from(end.timestamp()));
            self.conditions
                .push(format!("{} <= {param}", field_ref("c", field)));
        }
        self
    }

    pub fn add_category(&mut self, field: &str, value: &str) -> &mut Self {
        self.add_equals("category", field, value)
    }

    pub fn add_status(&mut self, field: &str, value: &str) -> &mut Self {
        self.add_equals("status", field, value)
    }

    pub fn add_agent(&mut self, field: &str, value: &str) -> &mut Self {
        self.add_equals("agent", field, value)
    }

    pub fn add_type(&mut self, field: &str, value: &str) -> &mut Self {
        self.add_equals("type", field, value)
    }

    /// Case-insensitive substring match over any of `fields`.
    pub fn add_text_search(&mut self, fields: &[&str], term: &str) -> &mut Self {
        if term.is_empty() || fields.is_empty() {
            return self;
        }
        let param = self.bind("search", Value::String(term.to_string()));
        let alternatives = fields
            .iter()
            .map(|f| format!("CONTAINS(LOWER({}), LOWER({param}))", field_ref("c", f)))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.conditions.push(format!("({alternatives})"));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Append the accumulated conditions to `base` (which must not already have
    /// a WHERE clause) followed by `suffix`, e.g. an ORDER BY.
    pub fn build(&self, base: &str, suffix: Option<&str>) -> SqlQuery {
        let mut text = base.trim_end().to_string();
        if !self.conditions.is_empty() {
            text.push_str(" WHERE ");
            text.push_str(&self.conditions.join(" AND "));
        }
        if let Some(suffix) = suffix {
            text.push(' ');
            text.push_str(suffix.trim());
        }
        SqlQuery {
            text,
            parameters: self.parameters.clone(),
            partition_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Date,
    Category,
    Status,
    Agent,
    Type,
    Author,
    Tags,
    Layer,
}

/// Searchable fields and supported filters of a container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerFilters {
    pub fields: Vec<&'static str>,
    pub filters: Vec<FilterKind>,
}

impl ContainerFilters {
    pub fn supports(&self, kind: FilterKind) -> bool {
        self.filters.contains(&kind)
    }
}

pub fn container_filters(container: &str) -> ContainerFilters {
    use FilterKind::*;
    match container {
        "system_inbox" => ContainerFilters {
            fields: vec!["subject", "from", "body", "category", "status", "_ts"],
            filters: vec![Date, Category, Status],
        },
        "user_content" => ContainerFilters {
            fields: vec!["title", "content", "tags", "author", "created_at"],
            filters: vec![Date, Author, Tags],
        },
        "agent_logs" => ContainerFilters {
            fields: vec!["agent_name", "action", "status", "timestamp", "error"],
            filters: vec![Date, Agent, Status, Type],
        },
        "memory_store" => ContainerFilters {
            fields: vec!["layer", "key", "value", "updated_at", "agent_id"],
            filters: vec![Date, Agent, Layer],
        },
        _ => ContainerFilters {
            fields: vec!["id", "content", "_ts"],
            filters: vec![Date],
        },
    }
}
