//! Container partition strategies and the partition-aware query rewriter.

use std::collections::HashMap;

use agentboard_core::PartitionSetting;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::query::{field_ref, SqlQuery};
use crate::sql::{is_reserved, tokenize, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStrategy {
    pub field: String,
    pub default_value: Option<String>,
}

impl PartitionStrategy {
    pub fn new(field: impl Into<String>, default_value: Option<&str>) -> Self {
        Self {
            field: field.into(),
            default_value: default_value.map(str::to_string),
        }
    }
}

/// Result of [`PartitionRegistry::optimize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptimizedQuery {
    pub text: String,
    /// Partition the query should be routed to; `None` means cross-partition.
    pub partition_key: Option<String>,
    pub partition_field: Option<String>,
    /// True when a `@partitionKey` filter was inserted into the text.
    pub rewritten: bool,
}

impl OptimizedQuery {
    fn unchanged(text: &str, field: Option<&str>, partition_key: Option<String>) -> Self {
        Self {
            text: text.to_string(),
            partition_key,
            partition_field: field.map(str::to_string),
            rewritten: false,
        }
    }
}

/// Container name to partition strategy.
#[derive(Debug, Clone, Default)]
pub struct PartitionRegistry {
    strategies: HashMap<String, PartitionStrategy>,
}

impl PartitionRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for container in [
            "agent_logs",
            "agent_session_logs",
            "working_contexts",
            "memory_contexts",
            "journal_entries",
            "agent_status",
        ] {
            registry.insert(container, PartitionStrategy::new("agent_name", None));
        }
        registry.insert("documents", PartitionStrategy::new("workspace", Some("default")));
        registry.insert("system_inbox", PartitionStrategy::new("category", Some("inbox")));
        registry
    }

    /// Built-in strategies with configured overrides merged on top.
    pub fn with_overrides(overrides: &HashMap<String, PartitionSetting>) -> Self {
        let mut registry = Self::builtin();
        for (container, setting) in overrides {
            registry.insert(
                container,
                PartitionStrategy::new(&setting.field, setting.default_value.as_deref()),
            );
        }
        registry
    }

    pub fn insert(&mut self, container: &str, strategy: PartitionStrategy) {
        self.strategies.insert(container.to_string(), strategy);
    }

    pub fn strategy(&self, container: &str) -> Option<&PartitionStrategy> {
        self.strategies.get(container)
    }

    pub fn containers(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    /// Rewrite `text` so it filters on the container's partition field.
    ///
    /// The filter is only inserted when a partition value is known: the
    /// explicit value, else the strategy default. A query that already
    /// references the partition field is left as written.
    pub fn optimize(
        &self,
        text: &str,
        container: &str,
        explicit_value: Option<&str>,
    ) -> OptimizedQuery {
        let Some(strategy) = self.strategy(container) else {
            warn!("No partition strategy for container: {}", container);
            return OptimizedQuery::unchanged(text, None, None);
        };
        let field = strategy.field.as_str();

        let tokens = match tokenize(text) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Cannot optimize query for {}: {}", container, e);
                return OptimizedQuery::unchanged(text, Some(field), None);
            }
        };
        let Some(shape) = QueryShape::scan(&tokens) else {
            warn!("Cannot optimize query for {}: no FROM clause", container);
            return OptimizedQuery::unchanged(text, Some(field), None);
        };

        if shape.references(&tokens, field) {
            debug!("Query for {} already filters on {}", container, field);
            return OptimizedQuery::unchanged(
                text,
                Some(field),
                explicit_value.map(str::to_string),
            );
        }

        let Some(value) = explicit_value
            .map(str::to_string)
            .or_else(|| strategy.default_value.clone())
        else {
            debug!(
                "No partition value for {}; running cross-partition",
                container
            );
            return OptimizedQuery::unchanged(text, Some(field), None);
        };

        let filter = format!("{} = @partitionKey", field_ref(&shape.alias, field));
        let rewritten = match shape.where_token {
            Some(where_idx) => {
                let where_tok = &tokens[where_idx];
                let cond_end = shape.tail_start.unwrap_or(text.len());
                let condition = text[where_tok.end..cond_end].trim();
                let mut out = format!(
                    "{}WHERE {} AND ({})",
                    &text[..where_tok.start],
                    filter,
                    condition
                );
                let rest = text[cond_end..].trim();
                if !rest.is_empty() {
                    out.push(' ');
                    out.push_str(rest);
                }
                out
            }
            None => match shape.tail_start {
                Some(pos) => format!(
                    "{} WHERE {} {}",
                    text[..pos].trim_end(),
                    filter,
                    text[pos..].trim()
                ),
                None => format!("{} WHERE {}", text.trim_end(), filter),
            },
        };

        info!(
            "Optimized query for {}: added partition filter on {}",
            container, field
        );
        OptimizedQuery {
            text: rewritten,
            partition_key: Some(value),
            partition_field: Some(field.to_string()),
            rewritten: true,
        }
    }
}

/// Positions of the top-level clauses of a SELECT.
struct QueryShape {
    alias: String,
    from_idx: usize,
    where_token: Option<usize>,
    /// Byte offset of the first ORDER BY / OFFSET / LIMIT / GROUP BY after FROM.
    tail_start: Option<usize>,
}

impl QueryShape {
    fn scan(tokens: &[Token]) -> Option<Self> {
        let mut depth = 0i32;
        let mut from_idx = None;
        let mut where_token = None;
        let mut tail_start = None;

        for (idx, token) in tokens.iter().enumerate() {
            match token.kind {
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => depth -= 1,
                _ => {}
            }
            if depth != 0 {
                continue;
            }
            if from_idx.is_none() {
                if token.is_keyword("FROM") {
                    from_idx = Some(idx);
                }
                continue;
            }
            if where_token.is_none() && tail_start.is_none() && token.is_keyword("WHERE") {
                where_token = Some(idx);
            } else if tail_start.is_none() && is_tail_keyword(tokens, idx) {
                tail_start = Some(token.start);
            }
        }

        let from_idx = from_idx?;
        let first = tokens.get(from_idx + 1)?.ident()?.to_string();
        let alias = match tokens.get(from_idx + 2) {
            Some(t) if t.is_keyword("AS") => tokens
                .get(from_idx + 3)
                .and_then(Token::ident)
                .map(str::to_string)
                .unwrap_or(first),
            Some(t) => match t.ident() {
                Some(name) if !is_reserved(name) => name.to_string(),
                _ => first,
            },
            None => first,
        };

        Some(Self {
            alias,
            from_idx,
            where_token,
            tail_start,
        })
    }

    /// ` WHERE <condition>` as written, or empty.
    fn condition(&self, text: &str, tokens: &[Token]) -> String {
        match self.where_token {
            Some(idx) => {
                let end = self.tail_start.unwrap_or(text.len());
                format!(" WHERE {}", text[tokens[idx].end..end].trim())
            }
            None => String::new(),
        }
    }

    /// `alias.field` or `alias["field"]` anywhere after SELECT, compared case-insensitively.
    fn references(&self, tokens: &[Token], field: &str) -> bool {
        tokens.iter().enumerate().any(|(idx, token)| {
            if idx == self.from_idx + 1 {
                return false;
            }
            let Some(name) = token.ident() else {
                return false;
            };
            if !name.eq_ignore_ascii_case(&self.alias) {
                return false;
            }
            match (tokens.get(idx + 1), tokens.get(idx + 2), tokens.get(idx + 3)) {
                (Some(dot), Some(next), _) if dot.kind == TokenKind::Dot => {
                    next.ident().is_some_and(|n| n.eq_ignore_ascii_case(field))
                }
                (Some(open), Some(next), Some(close))
                    if open.kind == TokenKind::LBracket && close.kind == TokenKind::RBracket =>
                {
                    matches!(&next.kind, TokenKind::Str(s) if s.eq_ignore_ascii_case(field))
                }
                _ => false,
            }
        })
    }
}

/// `SELECT * FROM alias [WHERE <condition>]` with the projection, ordering and
/// paging of `text` stripped, for fetching candidates to evaluate locally.
pub(crate) fn filter_only(text: &str) -> Option<String> {
    let tokens = tokenize(text).ok()?;
    let shape = QueryShape::scan(&tokens)?;
    Some(format!(
        "SELECT * FROM {}{}",
        shape.alias,
        shape.condition(text, &tokens)
    ))
}

/// `SELECT TOP n * FROM alias [WHERE ...] [ORDER BY ...]`: the first `top`
/// documents of one source in the order `text` asks for. `None` for GROUP BY.
pub(crate) fn bounded_candidates(text: &str, top: usize) -> Option<String> {
    let tokens = tokenize(text).ok()?;
    let shape = QueryShape::scan(&tokens)?;
    let mut out = format!(
        "SELECT TOP {top} * FROM {}{}",
        shape.alias,
        shape.condition(text, &tokens)
    );
    if let Some(start) = shape.tail_start {
        let idx = tokens.iter().position(|t| t.start == start)?;
        if tokens[idx].is_keyword("GROUP") {
            return None;
        }
        if tokens[idx].is_keyword("ORDER") {
            let end = tokens[idx..]
                .iter()
                .find(|t| t.is_keyword("OFFSET") || t.is_keyword("LIMIT"))
                .map_or(text.len(), |t| t.start);
            out.push(' ');
            out.push_str(text[start..end].trim());
        }
    }
    Some(out)
}

fn is_tail_keyword(tokens: &[Token], idx: usize) -> bool {
    let token = &tokens[idx];
    let followed_by_by = tokens.get(idx + 1).is_some_and(|t| t.is_keyword("BY"));
    ((token.is_keyword("ORDER") || token.is_keyword("GROUP")) && followed_by_by)
        || token.is_keyword("OFFSET")
        || token.is_keyword("LIMIT")
}

/// One query of a batch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub container: String,
    pub query: SqlQuery,
}

impl BatchRequest {
    pub fn new(container: impl Into<String>, query: SqlQuery) -> Self {
        Self {
            container: container.into(),
            query,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedQuery {
    /// Position of the request in the input batch.
    pub index: usize,
    pub container: String,
    pub query: SqlQuery,
}

#[derive(Debug, Clone)]
pub struct BatchPlan {
    /// Optimized queries, grouped by `(container, partition key)` in order of first appearance.
    pub queries: Vec<PlannedQuery>,
    pub group_count: usize,
}

/// Optimize each request and group them by `(container, partition key)`.
pub fn plan_batch(registry: &PartitionRegistry, requests: &[BatchRequest]) -> BatchPlan {
    let mut groups: Vec<((String, Option<String>), Vec<PlannedQuery>)> = Vec::new();

    for (index, request) in requests.iter().enumerate() {
        let (query, _) = request
            .query
            .clone()
            .optimize(registry, &request.container, None);
        let key = (request.container.clone(), query.partition_key.clone());
        let planned = PlannedQuery {
            index,
            container: request.container.clone(),
            query,
        };
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, entries)) => entries.push(planned),
            None => groups.push((key, vec![planned])),
        }
    }

    let group_count = groups.len();
    info!(
        "Optimized {} queries into {} partition groups",
        requests.len(),
        group_count
    );
    BatchPlan {
        queries: groups.into_iter().flat_map(|(_, q)| q).collect(),
        group_count,
    }
}

/// Replace a top-level `SELECT *` with an explicit projection of `fields`.
pub fn limit_fields(text: &str, fields: &[&str]) -> String {
    if fields.is_empty() {
        return text.to_string();
    }
    let Ok(tokens) = tokenize(text) else {
        return text.to_string();
    };
    let Some(shape) = QueryShape::scan(&tokens) else {
        return text.to_string();
    };
    if !tokens.first().is_some_and(|t| t.is_keyword("SELECT")) {
        return text.to_string();
    }

    let mut idx = 1;
    if tokens.get(idx).is_some_and(|t| t.is_keyword("DISTINCT")) {
        idx += 1;
    }
    if tokens.get(idx).is_some_and(|t| t.is_keyword("TOP")) {
        idx += 2;
    }
    match tokens.get(idx) {
        Some(star) if star.kind == TokenKind::Star && idx + 1 == shape.from_idx => {
            let projection = fields
                .iter()
                .map(|f| field_ref(&shape.alias, f))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}{}{}", &text[..star.start], projection, &text[star.end..])
        }
        _ => text.to_string(),
    }
}

/// Recommended indexing policy for a container.
pub fn indexing_policy(container: &str) -> Value {
    match container {
        "agent_logs" => json!({
            "indexingMode": "consistent",
            "includedPaths": [{"path": "/*"}],
            "excludedPaths": [{"path": "/content/*"}],
            "compositeIndexes": [[
                {"path": "/agent_name", "order": "ascending"},
                {"path": "/_ts", "order": "descending"}
            ]]
        }),
        "messages" | "system_inbox" => json!({
            "indexingMode": "consistent",
            "includedPaths": [{"path": "/*"}],
            "excludedPaths": [{"path": "/body/*"}],
            "compositeIndexes": [
                [
                    {"path": "/type", "order": "ascending"},
                    {"path": "/created_at", "order": "descending"}
                ],
                [
                    {"path": "/status", "order": "ascending"},
                    {"path": "/priority", "order": "descending"}
                ]
            ]
        }),
        "documents" => json!({
            "indexingMode": "consistent",
            "includedPaths": [
                {"path": "/id/*"},
                {"path": "/type/*"},
                {"path": "/created_at/*"},
                {"path": "/metadata/*"}
            ],
            "excludedPaths": [{"path": "/content/*"}],
            "compositeIndexes": [[
                {"path": "/type", "order": "ascending"},
                {"path": "/created_at", "order": "descending"}
            ]]
        }),
        _ => json!({
            "indexingMode": "consistent",
            "automatic": true,
            "includedPaths": [{"path": "/*"}],
            "excludedPaths": [{"path": "/_etag/?"}]
        }),
    }
}
