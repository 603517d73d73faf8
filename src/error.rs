use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::state_machine::InvalidTransition};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No identity accompanied the request.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A transaction kept losing against concurrent writers.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Invalid input provided by the client.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Caller is not allowed to touch the resource.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The scoring backend failed.
    #[error("evaluation failed upstream: {message}")]
    UpstreamEvaluationFailure {
        /// Whether triggering the evaluation again may succeed.
        retryable: bool,
        /// Failure description.
        message: String,
    },
    /// Somebody else already completed or is completing the evaluation.
    #[error("evaluation already completed")]
    AlreadyCompleted,
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { key } => {
                ServiceError::Conflict(format!("too much contention on `{key}`, try again"))
            }
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Missing or malformed identity.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Identity known but not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Upstream dependency failed.
    #[error("bad gateway: {0}")]
    BadGateway(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthenticated(message) => AppError::Unauthorized(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Conflict(message) | ServiceError::InvalidState(message) => {
                AppError::Conflict(message)
            }
            ServiceError::InvalidArgument(message) => AppError::BadRequest(message),
            ServiceError::Forbidden(message) => AppError::Forbidden(message),
            ServiceError::UpstreamEvaluationFailure { retryable, message } => {
                if retryable {
                    AppError::ServiceUnavailable(format!("scoring unavailable: {message}"))
                } else {
                    AppError::BadGateway(message)
                }
            }
            ServiceError::AlreadyCompleted => {
                AppError::Conflict("evaluation already completed".into())
            }
            ServiceError::Unavailable(StorageError::Corrupted { key, message }) => {
                AppError::Internal(format!("corrupted document `{key}`: {message}"))
            }
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_conflict_becomes_service_conflict() {
        let err: ServiceError = StorageError::conflict("sessions/x").into();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (ServiceError::Unauthenticated("x".into()), StatusCode::UNAUTHORIZED),
            (ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ServiceError::InvalidState("x".into()), StatusCode::CONFLICT),
            (ServiceError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (
                ServiceError::UpstreamEvaluationFailure {
                    retryable: false,
                    message: "bad transcript".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                ServiceError::UpstreamEvaluationFailure {
                    retryable: true,
                    message: "timeout".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ServiceError::Degraded, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
