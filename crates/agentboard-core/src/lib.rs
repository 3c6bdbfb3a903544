pub mod config;
pub mod document;
pub mod error;

pub use config::{
    CacheBackendKind, CacheSettings, ConfigManager, CosmosConfig, GraphSettings, LoggingConfig,
    PartitionSetting, ServerConfig, Settings,
};
pub use error::*;
