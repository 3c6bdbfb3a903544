pub mod agent_handlers;
pub mod cosmos_handlers;
pub mod error;
pub mod graph_handlers;
pub mod handlers;
pub mod health;
pub mod maintenance_handlers;
pub mod memory_handlers;
pub mod message_handlers;
pub mod metrics;
pub mod monitoring_handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use error::*;
pub use routes::*;
pub use server::*;
pub use state::*;
