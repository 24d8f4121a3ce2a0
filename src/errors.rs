use axum::http::StatusCode;
use thiserror::Error;

/// Failures raised by the roster, the event store and the status engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Malformed input rejected before it reaches storage.
    #[error("invalid input: {0}")]
    StructuralValidation(String),
    #[error("member `{member_id}` already exists in group `{group_id}`")]
    DuplicateMember { group_id: String, member_id: String },
    #[error("{0} not found")]
    NotFound(String),
    /// Backend failure; in-memory state stays at its last committed value.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::StructuralValidation(message.into())
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has invalid value `{value}`: {reason}")]
    InvalidVar {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::StructuralValidation(_) => StatusCode::BAD_REQUEST,
            CoreError::DuplicateMember { .. } => StatusCode::CONFLICT,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.message).into_response()
    }
}
