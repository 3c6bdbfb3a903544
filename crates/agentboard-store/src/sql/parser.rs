use agentboard_core::{AgentboardError, Result};
use serde_json::{json, Value};

use super::ast::*;
use super::lexer::{tokenize, Token, TokenKind};

const RESERVED: &[&str] = &[
    "SELECT", "DISTINCT", "TOP", "VALUE", "AS", "FROM", "WHERE", "ORDER", "BY", "ASC", "DESC",
    "OFFSET", "LIMIT", "AND", "OR", "NOT", "IS", "IN", "JOIN", "GROUP",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Parse a query in the supported Cosmos SQL subset.
pub fn parse(input: &str) -> Result<Select> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let select = parser.select()?;
    if let Some(token) = parser.peek() {
        return Err(AgentboardError::query(format!(
            "unexpected token at offset {}",
            token.start
        )));
    }
    Ok(select)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(keyword))
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {keyword}")))
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn error(&self, message: &str) -> AgentboardError {
        match self.peek() {
            Some(token) => AgentboardError::query(format!("{message} at offset {}", token.start)),
            None => AgentboardError::query(format!("{message} at end of query")),
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String> {
        match self.peek_kind() {
            Some(TokenKind::Ident(name)) if !is_reserved(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(&format!("expected {what}"))),
        }
    }

    fn select(&mut self) -> Result<Select> {
        self.expect_keyword("SELECT")?;
        let distinct = self.eat_keyword("DISTINCT");
        let top = if self.eat_keyword("TOP") {
            Some(self.count_value("TOP")?)
        } else {
            None
        };

        let projection = if self.eat(&TokenKind::Star) {
            Projection::Star
        } else if self.eat_keyword("VALUE") {
            Projection::Value(self.expr()?)
        } else {
            let mut items = vec![self.select_item()?];
            while self.eat(&TokenKind::Comma) {
                items.push(self.select_item()?);
            }
            Projection::Items(items)
        };

        self.expect_keyword("FROM")?;
        let first = self.identifier("container alias")?;
        let (source, alias) = if self.eat_keyword("AS") {
            (Some(first), self.identifier("alias")?)
        } else {
            match self.peek_kind() {
                Some(TokenKind::Ident(name)) if !is_reserved(name) => {
                    let alias = name.clone();
                    self.pos += 1;
                    (Some(first), alias)
                }
                _ => (None, first),
            }
        };

        let filter = if self.eat_keyword("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let expr = self.expr()?;
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                order_by.push(OrderItem { expr, descending });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let offset = if self.eat_keyword("OFFSET") {
            Some(self.count_value("OFFSET")?)
        } else {
            None
        };
        let limit = if self.eat_keyword("LIMIT") {
            Some(self.count_value("LIMIT")?)
        } else {
            None
        };

        Ok(Select {
            distinct,
            top,
            projection,
            source,
            alias,
            filter,
            order_by,
            offset,
            limit,
        })
    }

    /// Integer literal or parameter after TOP/OFFSET/LIMIT.
    fn count_value(&mut self, clause: &str) -> Result<Expr> {
        match self.next().map(|t| t.kind) {
            Some(TokenKind::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                Ok(Expr::Literal(json!(n as u64)))
            }
            Some(TokenKind::Param(name)) => Ok(Expr::Param(name)),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error(&format!("{clause} expects a non-negative integer")))
            }
        }
    }

    fn select_item(&mut self) -> Result<SelectItem> {
        let expr = self.expr()?;
        let alias = if self.eat_keyword("AS") {
            Some(self.identifier("column alias")?)
        } else {
            None
        };
        Ok(SelectItem { expr, alias })
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("AND") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            let inner = self.not_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.primary()?;

        let op = match self.peek_kind() {
            Some(TokenKind::Eq) => Some(CompOp::Eq),
            Some(TokenKind::Neq) => Some(CompOp::Neq),
            Some(TokenKind::Lt) => Some(CompOp::Lt),
            Some(TokenKind::Le) => Some(CompOp::Le),
            Some(TokenKind::Gt) => Some(CompOp::Gt),
            Some(TokenKind::Ge) => Some(CompOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.primary()?;
            return Ok(Expr::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            if !self.eat_keyword("NULL") {
                return Err(self.error("expected NULL after IS"));
            }
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated_in = self.peek_keyword("NOT")
            && self
                .tokens
                .get(self.pos + 1)
                .is_some_and(|t| t.is_keyword("IN"));
        if negated_in || self.peek_keyword("IN") {
            if negated_in {
                self.pos += 1;
            }
            self.expect_keyword("IN")?;
            self.expect(TokenKind::LParen, "'(' after IN")?;
            let list = self.expr_list(TokenKind::RParen, "')'")?;
            return Ok(Expr::In {
                expr: Box::new(left),
                list,
                negated: negated_in,
            });
        }

        Ok(left)
    }

    fn expr_list(&mut self, close: TokenKind, what: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat(&close) {
                return Ok(items);
            }
            self.expect(TokenKind::Comma, &format!("',' or {what}"))?;
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let Some(token) = self.next() else {
            return Err(self.error("expected expression"));
        };
        match token.kind {
            TokenKind::LParen => {
                let inner = self.expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => Ok(Expr::Array(
                self.expr_list(TokenKind::RBracket, "']'")?,
            )),
            TokenKind::Number(n) => Ok(Expr::Literal(number(n))),
            TokenKind::Minus => match self.next().map(|t| t.kind) {
                Some(TokenKind::Number(n)) => Ok(Expr::Literal(number(-n))),
                _ => Err(self.error("expected number after '-'")),
            },
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::Param(name) => Ok(Expr::Param(name)),
            TokenKind::Star => Ok(Expr::Wildcard),
            TokenKind::Ident(name) => {
                if name.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Literal(Value::Bool(true)));
                }
                if name.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Literal(Value::Bool(false)));
                }
                if name.eq_ignore_ascii_case("null") {
                    return Ok(Expr::Literal(Value::Null));
                }
                if self.eat(&TokenKind::LParen) {
                    let args = self.expr_list(TokenKind::RParen, "')'")?;
                    return Ok(Expr::Call {
                        name: name.to_ascii_uppercase(),
                        args,
                    });
                }
                if is_reserved(&name) {
                    self.pos -= 1;
                    return Err(self.error("unexpected keyword"));
                }
                self.path(name)
            }
            _ => {
                self.pos -= 1;
                Err(self.error("unexpected token"))
            }
        }
    }

    fn path(&mut self, root: String) -> Result<Expr> {
        let mut segments = Vec::new();
        loop {
            if self.eat(&TokenKind::Dot) {
                match self.next().map(|t| t.kind) {
                    Some(TokenKind::Ident(field)) => segments.push(PathSegment::Field(field)),
                    _ => {
                        self.pos = self.pos.saturating_sub(1);
                        return Err(self.error("expected property name after '.'"));
                    }
                }
            } else if self.peek_kind() == Some(&TokenKind::LBracket) {
                self.pos += 1;
                match self.next().map(|t| t.kind) {
                    Some(TokenKind::Str(field)) => segments.push(PathSegment::Field(field)),
                    Some(TokenKind::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                        segments.push(PathSegment::Index(n as usize))
                    }
                    _ => {
                        self.pos = self.pos.saturating_sub(1);
                        return Err(self.error("expected property name or index in '[]'"));
                    }
                }
                self.expect(TokenKind::RBracket, "']'")?;
            } else {
                break;
            }
        }
        Ok(Expr::Path { root, segments })
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(root: &str, fields: &[&str]) -> Expr {
        Expr::Path {
            root: root.into(),
            segments: fields
                .iter()
                .map(|f| PathSegment::Field((*f).to_string()))
                .collect(),
        }
    }

    #[test]
    fn parses_full_select() {
        let select = parse(
            "SELECT DISTINCT TOP 5 c.id, c.subject AS title FROM c \
             WHERE c.to = @agent AND NOT (c.status = 'read') \
             ORDER BY c._ts DESC OFFSET 0 LIMIT 20",
        )
        .unwrap();

        assert!(select.distinct);
        assert_eq!(select.top, Some(Expr::Literal(json!(5))));
        assert_eq!(select.alias, "c");
        assert_eq!(select.source, None);
        match &select.projection {
            Projection::Items(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1].alias.as_deref(), Some("title"));
            }
            other => panic!("unexpected projection {other:?}"),
        }
        assert_eq!(select.order_by.len(), 1);
        assert!(select.order_by[0].descending);
        assert_eq!(select.order_by[0].expr, path("c", &["_ts"]));
        assert_eq!(select.offset, Some(Expr::Literal(json!(0))));
        assert_eq!(select.limit, Some(Expr::Literal(json!(20))));
        assert!(matches!(select.filter, Some(Expr::And(_, _))));
    }

    #[test]
    fn parses_bracket_paths_and_value_projection() {
        let select =
            parse("SELECT VALUE COUNT(1) FROM messages m WHERE m[\"from\"] = 'a'").unwrap();
        assert_eq!(select.alias, "m");
        assert_eq!(select.source.as_deref(), Some("messages"));
        assert!(matches!(select.projection, Projection::Value(ref e) if e.is_aggregate()));
        match select.filter {
            Some(Expr::Compare { left, op, .. }) => {
                assert_eq!(*left, path("m", &["from"]));
                assert_eq!(op, CompOp::Eq);
            }
            other => panic!("unexpected filter {other:?}"),
        }
    }

    #[test]
    fn parses_is_null_and_in() {
        let select =
            parse("SELECT * FROM c WHERE c.x IS NOT NULL OR c.kind NOT IN ('a', 'b')").unwrap();
        match select.filter {
            Some(Expr::Or(left, right)) => {
                assert!(matches!(*left, Expr::IsNull { negated: true, .. }));
                assert!(matches!(*right, Expr::In { negated: true, ref list, .. } if list.len() == 2));
            }
            other => panic!("unexpected filter {other:?}"),
        }
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let select = parse("select * from c where c.a = 1 order by c.b asc").unwrap();
        assert!(select.filter.is_some());
        assert!(!select.order_by[0].descending);
    }

    #[test]
    fn rejects_malformed_queries() {
        assert!(parse("SELECT FROM c").is_err());
        assert!(parse("SELECT * FROM c WHERE").is_err());
        assert!(parse("SELECT * FROM c WHERE c.a = 1 extra").is_err());
        assert!(parse("SELECT * FROM c OFFSET -1 LIMIT 2").is_err());
        assert!(parse("SELECT * FROM c WHERE c.a IS 3").is_err());
    }
}
