use serde_json::Value;

/// `SELECT ... FROM alias [WHERE ...] [ORDER BY ...] [OFFSET n LIMIT m]`
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub top: Option<Expr>,
    pub projection: Projection,
    /// Container name as written after FROM, when an alias follows it.
    pub source: Option<String>,
    pub alias: String,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub offset: Option<Expr>,
    pub limit: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Star,
    Value(Expr),
    Items(Vec<SelectItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Parameter name including the leading `@`.
    Param(String),
    /// Property path rooted at an identifier, e.g. `c.payload["from"]`.
    Path {
        root: String,
        segments: Vec<PathSegment>,
    },
    Compare {
        left: Box<Expr>,
        op: CompOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// Function call; `name` is upper-cased.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// `[a, b, ...]`
    Array(Vec<Expr>),
    /// `*` inside `COUNT(*)`.
    Wildcard,
}

impl Expr {
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Call { name, .. } if name == "COUNT")
    }

    /// Last field name of a property path, used as the projected key.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            Expr::Path { root, segments } => match segments.last() {
                Some(PathSegment::Field(name)) => Some(name),
                Some(PathSegment::Index(_)) => None,
                None => Some(root),
            },
            _ => None,
        }
    }
}
