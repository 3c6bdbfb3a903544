pub mod cosmos;
pub mod memory;
pub mod partition;
pub mod query;
pub mod sql;
pub mod store;

pub use cosmos::CosmosStore;
pub use memory::MemoryStore;
pub use partition::{
    indexing_policy, limit_fields, plan_batch, BatchPlan, BatchRequest, OptimizedQuery,
    PartitionRegistry, PartitionStrategy, PlannedQuery,
};
pub use query::{container_filters, ContainerFilters, FilterKind, QueryFilter, QueryParam, SqlQuery};
pub use store::{execute_batch, ContainerInfo, DocumentStore};
