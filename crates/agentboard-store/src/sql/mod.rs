//! The subset of Cosmos DB SQL used by the dashboard: lexer, parser and an
//! evaluator over in-memory JSON documents.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{Expr, Projection, Select};
pub use eval::{execute, json_equal, row_bound, type_order, Params};
pub use lexer::{tokenize, Token, TokenKind};
pub use parser::{is_reserved, parse};
