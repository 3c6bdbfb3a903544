//! Document relationship graph: classification, edge inference and an
//! incrementally maintained adjacency index.

pub mod classify;
pub mod index;
pub mod infer;
pub mod model;
pub mod service;
pub mod stats;
pub mod traverse;

pub use classify::{classify, node_from_document};
pub use index::{GraphIndex, UpsertOutcome};
pub use infer::infer_edges;
pub use model::*;
pub use service::{GraphService, IndexSummary, RefreshObserver, RefreshReport};
pub use stats::GraphStats;
