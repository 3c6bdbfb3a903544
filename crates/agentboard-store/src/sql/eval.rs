//! Evaluates parsed queries over JSON documents.
//!
//! Missing properties evaluate to *undefined* (`None`). Comparisons and logical
//! operators follow Cosmos three-valued semantics, and a WHERE clause keeps a
//! document only when its predicate is exactly `true`.

use std::cmp::Ordering;
use std::collections::HashMap;

use agentboard_core::{AgentboardError, Result};
use serde_json::{json, Map, Value};

use super::ast::*;

pub type Params = HashMap<String, Value>;

/// Run `select` over `docs`, returning the projected rows.
pub fn execute<'a, I>(select: &Select, docs: I, params: &Params) -> Result<Vec<Value>>
where
    I: IntoIterator<Item = &'a Value>,
{
    let ctx = Context {
        alias: &select.alias,
        params,
    };

    let mut matched = Vec::new();
    for doc in docs {
        let keep = match &select.filter {
            Some(filter) => ctx.eval(filter, doc)? == Some(Value::Bool(true)),
            None => true,
        };
        if keep {
            matched.push(doc);
        }
    }

    if let Some(rows) = aggregate(select, &ctx, &matched)? {
        return Ok(rows);
    }

    if !select.order_by.is_empty() {
        let mut keyed = Vec::with_capacity(matched.len());
        for doc in matched {
            let keys = select
                .order_by
                .iter()
                .map(|item| ctx.eval(&item.expr, doc))
                .collect::<Result<Vec<_>>>()?;
            keyed.push((keys, doc));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (idx, item) in select.order_by.iter().enumerate() {
                let ord = type_order(a[idx].as_ref(), b[idx].as_ref());
                let ord = if item.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        matched = keyed.into_iter().map(|(_, doc)| doc).collect();
    }

    let mut rows = Vec::with_capacity(matched.len());
    for doc in matched {
        if let Some(row) = project(&select.projection, &ctx, doc)? {
            rows.push(row);
        }
    }

    if select.distinct {
        let mut unique: Vec<Value> = Vec::with_capacity(rows.len());
        for row in rows {
            if !unique.iter().any(|seen| json_equal(seen, &row)) {
                unique.push(row);
            }
        }
        rows = unique;
    }

    let offset = ctx.count(select.offset.as_ref(), "OFFSET")?.unwrap_or(0);
    let limit = ctx.count(select.limit.as_ref(), "LIMIT")?;
    let top = ctx.count(select.top.as_ref(), "TOP")?;

    let take = match (limit, top) {
        (Some(l), Some(t)) => l.min(t),
        (Some(l), None) => l,
        (None, Some(t)) => t,
        (None, None) => usize::MAX,
    };
    Ok(rows.into_iter().skip(offset).take(take).collect())
}

/// Rows any one source must supply so that merging per-source results and
/// running `select` again gives the same answer: `OFFSET` plus the smaller of
/// `LIMIT` and `TOP`. `None` when unbounded, aggregated or `DISTINCT`.
pub fn row_bound(select: &Select, params: &Params) -> Result<Option<usize>> {
    let aggregated = match &select.projection {
        Projection::Star => false,
        Projection::Value(expr) => expr.is_aggregate(),
        Projection::Items(items) => items.iter().any(|i| i.expr.is_aggregate()),
    };
    if aggregated || select.distinct {
        return Ok(None);
    }
    let ctx = Context {
        alias: &select.alias,
        params,
    };
    let offset = ctx.count(select.offset.as_ref(), "OFFSET")?.unwrap_or(0);
    let limit = ctx.count(select.limit.as_ref(), "LIMIT")?;
    let top = ctx.count(select.top.as_ref(), "TOP")?;
    let take = match (limit, top) {
        (Some(l), Some(t)) => Some(l.min(t)),
        (l, t) => l.or(t),
    };
    Ok(take.map(|n| n.saturating_add(offset)))
}

fn aggregate(select: &Select, ctx: &Context<'_>, matched: &[&Value]) -> Result<Option<Vec<Value>>> {
    match &select.projection {
        Projection::Value(expr) if expr.is_aggregate() => {
            Ok(Some(vec![json!(ctx.count_docs(expr, matched)?)]))
        }
        Projection::Items(items) if items.iter().any(|i| i.expr.is_aggregate()) => {
            if !items.iter().all(|i| i.expr.is_aggregate()) {
                return Err(AgentboardError::query(
                    "aggregates cannot be mixed with plain projections",
                ));
            }
            let mut row = Map::new();
            for (idx, item) in items.iter().enumerate() {
                let key = item
                    .alias
                    .clone()
                    .unwrap_or_else(|| format!("${}", idx + 1));
                row.insert(key, json!(ctx.count_docs(&item.expr, matched)?));
            }
            Ok(Some(vec![Value::Object(row)]))
        }
        _ => Ok(None),
    }
}

fn project(projection: &Projection, ctx: &Context<'_>, doc: &Value) -> Result<Option<Value>> {
    match projection {
        Projection::Star => Ok(Some(doc.clone())),
        Projection::Value(expr) => ctx.eval(expr, doc),
        Projection::Items(items) => {
            let mut row = Map::new();
            for (idx, item) in items.iter().enumerate() {
                let key = item
                    .alias
                    .clone()
                    .or_else(|| item.expr.output_name().map(str::to_string))
                    .unwrap_or_else(|| format!("${}", idx + 1));
                if let Some(value) = ctx.eval(&item.expr, doc)? {
                    row.insert(key, value);
                }
            }
            Ok(Some(Value::Object(row)))
        }
    }
}

struct Context<'a> {
    alias: &'a str,
    params: &'a Params,
}

impl Context<'_> {
    fn param(&self, name: &str) -> Result<&Value> {
        self.params
            .get(name)
            .ok_or_else(|| AgentboardError::query(format!("unbound parameter {name}")))
    }

    fn count(&self, expr: Option<&Expr>, clause: &str) -> Result<Option<usize>> {
        let value = match expr {
            None => return Ok(None),
            Some(Expr::Literal(v)) => v.clone(),
            Some(Expr::Param(name)) => self.param(name)?.clone(),
            Some(_) => {
                return Err(AgentboardError::query(format!("invalid {clause} value")));
            }
        };
        value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| {
                AgentboardError::query(format!("{clause} expects a non-negative integer"))
            })
    }

    fn count_docs(&self, expr: &Expr, matched: &[&Value]) -> Result<usize> {
        let Expr::Call { args, .. } = expr else {
            return Ok(0);
        };
        match args.as_slice() {
            [] | [Expr::Wildcard] => Ok(matched.len()),
            [arg] => {
                let mut n = 0;
                for doc in matched {
                    if self.eval(arg, doc)?.is_some() {
                        n += 1;
                    }
                }
                Ok(n)
            }
            _ => Err(AgentboardError::query("COUNT takes a single argument")),
        }
    }

    fn eval(&self, expr: &Expr, doc: &Value) -> Result<Option<Value>> {
        match expr {
            Expr::Literal(v) => Ok(Some(v.clone())),
            Expr::Param(name) => Ok(Some(self.param(name)?.clone())),
            Expr::Path { root, segments } => {
                if root != self.alias {
                    return Err(AgentboardError::query(format!(
                        "identifier '{root}' could not be resolved"
                    )));
                }
                Ok(resolve(doc, segments).cloned())
            }
            Expr::Compare { left, op, right } => {
                let l = self.eval(left, doc)?;
                let r = self.eval(right, doc)?;
                Ok(compare(l.as_ref(), *op, r.as_ref()).map(Value::Bool))
            }
            Expr::And(left, right) => {
                let l = truth(self.eval(left, doc)?);
                if l == Some(false) {
                    return Ok(Some(Value::Bool(false)));
                }
                let r = truth(self.eval(right, doc)?);
                Ok(match (l, r) {
                    (_, Some(false)) => Some(Value::Bool(false)),
                    (Some(true), Some(true)) => Some(Value::Bool(true)),
                    _ => None,
                })
            }
            Expr::Or(left, right) => {
                let l = truth(self.eval(left, doc)?);
                if l == Some(true) {
                    return Ok(Some(Value::Bool(true)));
                }
                let r = truth(self.eval(right, doc)?);
                Ok(match (l, r) {
                    (_, Some(true)) => Some(Value::Bool(true)),
                    (Some(false), Some(false)) => Some(Value::Bool(false)),
                    _ => None,
                })
            }
            Expr::Not(inner) => Ok(truth(self.eval(inner, doc)?).map(|b| Value::Bool(!b))),
            Expr::IsNull { expr, negated } => {
                let is_null = matches!(self.eval(expr, doc)?, None | Some(Value::Null));
                Ok(Some(Value::Bool(is_null != *negated)))
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                let Some(value) = self.eval(expr, doc)? else {
                    return Ok(None);
                };
                let mut found = false;
                for item in list {
                    if let Some(candidate) = self.eval(item, doc)? {
                        if json_equal(&value, &candidate) {
                            found = true;
                            break;
                        }
                    }
                }
                Ok(Some(Value::Bool(found != *negated)))
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(v) = self.eval(item, doc)? {
                        out.push(v);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            Expr::Call { name, args } => self.call(name, args, doc),
            Expr::Wildcard => Err(AgentboardError::query("'*' is only valid inside COUNT")),
        }
    }

    fn call(&self, name: &str, args: &[Expr], doc: &Value) -> Result<Option<Value>> {
        let values = args
            .iter()
            .map(|a| self.eval(a, doc))
            .collect::<Result<Vec<_>>>()?;
        let arity = |min: usize, max: usize| -> Result<()> {
            if values.len() < min || values.len() > max {
                Err(AgentboardError::query(format!(
                    "{name} expects {min}..={max} arguments, got {}",
                    values.len()
                )))
            } else {
                Ok(())
            }
        };

        match name {
            "LOWER" | "UPPER" => {
                arity(1, 1)?;
                Ok(match values[0].as_ref() {
                    Some(Value::String(s)) if name == "LOWER" => Some(json!(s.to_lowercase())),
                    Some(Value::String(s)) => Some(json!(s.to_uppercase())),
                    _ => None,
                })
            }
            "CONTAINS" | "STARTSWITH" | "ENDSWITH" => {
                arity(2, 3)?;
                let ignore_case = matches!(values.get(2), Some(Some(Value::Bool(true))));
                let (Some(Value::String(hay)), Some(Value::String(needle))) =
                    (values[0].as_ref(), values[1].as_ref())
                else {
                    return Ok(None);
                };
                let (hay, needle) = if ignore_case {
                    (hay.to_lowercase(), needle.to_lowercase())
                } else {
                    (hay.clone(), needle.clone())
                };
                let hit = match name {
                    "CONTAINS" => hay.contains(&needle),
                    "STARTSWITH" => hay.starts_with(&needle),
                    _ => hay.ends_with(&needle),
                };
                Ok(Some(Value::Bool(hit)))
            }
            "ARRAY_CONTAINS" => {
                arity(2, 3)?;
                let partial = matches!(values.get(2), Some(Some(Value::Bool(true))));
                let (Some(Value::Array(items)), Some(needle)) =
                    (values[0].as_ref(), values[1].as_ref())
                else {
                    return Ok(None);
                };
                let hit = items.iter().any(|item| {
                    if partial {
                        partial_match(item, needle)
                    } else {
                        json_equal(item, needle)
                    }
                });
                Ok(Some(Value::Bool(hit)))
            }
            "IS_DEFINED" => {
                arity(1, 1)?;
                Ok(Some(Value::Bool(values[0].is_some())))
            }
            "IS_NULL" => {
                arity(1, 1)?;
                Ok(Some(Value::Bool(matches!(values[0], Some(Value::Null)))))
            }
            "LENGTH" | "ARRAY_LENGTH" => {
                arity(1, 1)?;
                Ok(match values[0].as_ref() {
                    Some(Value::String(s)) if name == "LENGTH" => Some(json!(s.chars().count())),
                    Some(Value::Array(a)) => Some(json!(a.len())),
                    _ => None,
                })
            }
            "COUNT" => Err(AgentboardError::query(
                "COUNT is only valid in the SELECT clause",
            )),
            other => Err(AgentboardError::query(format!(
                "unsupported function {other}"
            ))),
        }
    }
}

fn resolve<'v>(doc: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
    let mut current = doc;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Field(name), Value::Object(map)) => map.get(name)?,
            (PathSegment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

fn truth(value: Option<Value>) -> Option<bool> {
    match value {
        Some(Value::Bool(b)) => Some(b),
        _ => None,
    }
}

/// Equality with numbers compared by value (`1 == 1.0`).
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_equal(v, other)))
        }
        _ => a == b,
    }
}

fn partial_match(item: &Value, needle: &Value) -> bool {
    match (item, needle) {
        (Value::Object(have), Value::Object(want)) => want
            .iter()
            .all(|(k, v)| have.get(k).is_some_and(|h| json_equal(h, v))),
        _ => json_equal(item, needle),
    }
}

fn compare(left: Option<&Value>, op: CompOp, right: Option<&Value>) -> Option<bool> {
    let (l, r) = (left?, right?);
    match op {
        CompOp::Eq => Some(json_equal(l, r)),
        CompOp::Neq => Some(!json_equal(l, r)),
        _ => {
            let ord = match (l, r) {
                (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?)?,
                (Value::String(a), Value::String(b)) => a.cmp(b),
                (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
                _ => return None,
            };
            Some(match op {
                CompOp::Lt => ord == Ordering::Less,
                CompOp::Le => ord != Ordering::Greater,
                CompOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Sort order across types: undefined < null < bool < number < string.
pub fn type_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse;

    fn docs() -> Vec<Value> {
        vec![
            json!({"id": "1", "from": "alice", "to": "bob", "priority": 3, "_ts": 100, "tags": ["x"]}),
            json!({"id": "2", "from": "bob", "to": ["alice", "carol"], "priority": 1, "_ts": 300}),
            json!({"id": "3", "from": "carol", "status": null, "_ts": 200, "tags": [{"k": 1, "v": 2}]}),
            json!({"id": "4", "from": "alice", "priority": "high", "_ts": 400}),
        ]
    }

    fn run(query: &str, params: Params) -> Vec<Value> {
        let select = parse(query).unwrap();
        let docs = docs();
        execute(&select, docs.iter(), &params).unwrap()
    }

    fn ids(rows: &[Value]) -> Vec<&str> {
        rows.iter().filter_map(|r| r["id"].as_str()).collect()
    }

    #[test]
    fn filters_with_parameters() {
        let params = Params::from([("@who".to_string(), json!("alice"))]);
        let rows = run("SELECT * FROM c WHERE c[\"from\"] = @who", params);
        assert_eq!(ids(&rows), vec!["1", "4"]);
    }

    #[test]
    fn undefined_and_mismatched_types_fail_the_filter() {
        // priority missing on doc 3, a string on doc 4
        let rows = run("SELECT * FROM c WHERE c.priority > 0", Params::new());
        assert_eq!(ids(&rows), vec!["1", "2"]);

        let rows = run("SELECT * FROM c WHERE NOT (c.priority > 0)", Params::new());
        assert!(rows.is_empty());
    }

    #[test]
    fn three_valued_or() {
        let rows = run(
            "SELECT * FROM c WHERE c.priority > 2 OR c[\"from\"] = 'carol'",
            Params::new(),
        );
        assert_eq!(ids(&rows), vec!["1", "3"]);
    }

    #[test]
    fn is_null_treats_undefined_as_null() {
        let rows = run("SELECT * FROM c WHERE c.status IS NULL", Params::new());
        assert_eq!(rows.len(), 4);
        let rows = run("SELECT * FROM c WHERE IS_NULL(c.status)", Params::new());
        assert_eq!(ids(&rows), vec!["3"]);
        let rows = run("SELECT * FROM c WHERE IS_DEFINED(c.tags)", Params::new());
        assert_eq!(ids(&rows), vec!["1", "3"]);
    }

    #[test]
    fn orders_by_type_then_value() {
        let rows = run("SELECT * FROM c ORDER BY c._ts DESC", Params::new());
        assert_eq!(ids(&rows), vec!["4", "2", "3", "1"]);

        // undefined < number < string
        let rows = run("SELECT * FROM c ORDER BY c.priority", Params::new());
        assert_eq!(ids(&rows), vec!["3", "2", "1", "4"]);
    }

    #[test]
    fn offset_limit_and_top() {
        let rows = run(
            "SELECT * FROM c ORDER BY c._ts OFFSET 1 LIMIT 2",
            Params::new(),
        );
        assert_eq!(ids(&rows), vec!["3", "2"]);

        let rows = run("SELECT TOP 1 * FROM c ORDER BY c._ts DESC", Params::new());
        assert_eq!(ids(&rows), vec!["4"]);

        let params = Params::from([("@n".to_string(), json!(3))]);
        let rows = run("SELECT TOP @n * FROM c", params);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn row_bounds() {
        let bound =
            |text: &str, params: &Params| row_bound(&parse(text).unwrap(), params).unwrap();
        let none = Params::new();
        assert_eq!(
            bound("SELECT * FROM c ORDER BY c._ts OFFSET 5 LIMIT 10", &none),
            Some(15)
        );
        assert_eq!(bound("SELECT TOP 3 c.id FROM c ORDER BY c._ts", &none), Some(3));
        let params = Params::from([("@n".to_string(), json!(4))]);
        assert_eq!(bound("SELECT TOP @n * FROM c OFFSET 0 LIMIT 7", &params), Some(4));

        assert_eq!(bound("SELECT * FROM c ORDER BY c._ts", &none), None);
        assert_eq!(bound("SELECT VALUE COUNT(1) FROM c OFFSET 0 LIMIT 1", &none), None);
        assert_eq!(bound("SELECT DISTINCT VALUE c.a FROM c OFFSET 0 LIMIT 1", &none), None);
    }

    #[test]
    fn projections_and_distinct() {
        let rows = run(
            "SELECT c.id, c[\"from\"] AS sender, c.missing FROM c WHERE c.id = '1'",
            Params::new(),
        );
        assert_eq!(rows, vec![json!({"id": "1", "sender": "alice"})]);

        let rows = run("SELECT DISTINCT VALUE c[\"from\"] FROM c", Params::new());
        assert_eq!(rows, vec![json!("alice"), json!("bob"), json!("carol")]);
    }

    #[test]
    fn counts() {
        let rows = run("SELECT VALUE COUNT(1) FROM c", Params::new());
        assert_eq!(rows, vec![json!(4)]);

        let rows = run(
            "SELECT COUNT(c.priority) AS n, COUNT(*) FROM c",
            Params::new(),
        );
        assert_eq!(rows, vec![json!({"n": 3, "$2": 4})]);
    }

    #[test]
    fn string_and_array_functions() {
        let rows = run(
            "SELECT * FROM c WHERE CONTAINS(LOWER(c[\"from\"]), 'AL', true)",
            Params::new(),
        );
        assert_eq!(ids(&rows), vec!["1", "4"]);

        let rows = run(
            "SELECT * FROM c WHERE ARRAY_CONTAINS(c.to, 'alice') OR c.to = 'alice'",
            Params::new(),
        );
        assert_eq!(ids(&rows), vec!["2"]);

        let params = Params::from([("@tag".to_string(), json!({"k": 1}))]);
        let rows = run(
            "SELECT * FROM c WHERE ARRAY_CONTAINS(c.tags, @tag, true)",
            params.clone(),
        );
        assert_eq!(ids(&rows), vec!["3"]);
        let rows = run("SELECT * FROM c WHERE ARRAY_CONTAINS(c.tags, @tag)", params);
        assert!(rows.is_empty());
    }

    #[test]
    fn in_lists() {
        let rows = run(
            "SELECT * FROM c WHERE c.id IN ('2', '3') AND STARTSWITH(c[\"from\"], 'b')",
            Params::new(),
        );
        assert_eq!(ids(&rows), vec!["2"]);
    }

    #[test]
    fn errors() {
        let select = parse("SELECT * FROM c WHERE c.a = @missing").unwrap();
        let docs = docs();
        assert!(execute(&select, docs.iter(), &Params::new()).is_err());

        let select = parse("SELECT * FROM c WHERE d.a = 1").unwrap();
        assert!(execute(&select, docs.iter(), &Params::new()).is_err());

        let select = parse("SELECT c.id, COUNT(1) FROM c").unwrap();
        assert!(execute(&select, docs.iter(), &Params::new()).is_err());
    }
}
