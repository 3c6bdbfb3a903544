use agentboard_core::AgentboardError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Agentboard(#[from] AgentboardError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Agentboard(err) => match err {
                AgentboardError::NotFound(_) => StatusCode::NOT_FOUND,
                AgentboardError::Conflict(_) => StatusCode::CONFLICT,
                AgentboardError::InvalidInput(_) | AgentboardError::Query(_) => {
                    StatusCode::BAD_REQUEST
                }
                AgentboardError::Store {
                    status: Some(404), ..
                } => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Reject `value` outside `min..=max` with a 400.
pub fn ensure_range(name: &str, value: usize, min: usize, max: usize) -> ApiResult<usize> {
    if value < min || value > max {
        return Err(ApiError::Validation(format!(
            "{name} must be between {min} and {max}"
        )));
    }
    Ok(value)
}
