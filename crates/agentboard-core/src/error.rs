use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentboardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Store error ({status:?}): {message}")]
    Store {
        status: Option<u16>,
        message: String,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AgentboardError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            status: None,
            message: message.into(),
        }
    }

    pub fn store_status(status: u16, message: impl Into<String>) -> Self {
        Self::Store {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }
}

pub type Result<T> = std::result::Result<T, AgentboardError>;
