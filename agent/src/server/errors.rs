//! Mapping of agent errors onto HTTP responses

use api_models::ErrorResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use crate::errors::AgentError;

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError(pub AgentError);

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        ApiError(err)
    }
}

/// HTTP status for an agent error
pub fn status_code(err: &AgentError) -> StatusCode {
    match err {
        AgentError::NotFound(_) => StatusCode::NOT_FOUND,

        AgentError::ValidationError(_) | AgentError::InvalidTarget { .. } => {
            StatusCode::BAD_REQUEST
        }

        AgentError::InvalidTransition { .. }
        | AgentError::PortConflict { .. }
        | AgentError::ActiveDeployment { .. }
        | AgentError::NoRestorableDeployment { .. } => StatusCode::CONFLICT,

        AgentError::PortRangeExhausted { .. } | AgentError::PortBindError { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }

        AgentError::RollbackHealthCheckFailed { .. }
        | AgentError::ContainerRuntimeError(_)
        | AgentError::BuildError(_)
        | AgentError::VcsError(_) => StatusCode::BAD_GATEWAY,

        AgentError::IoError(_)
        | AgentError::JsonError(_)
        | AgentError::PersistenceError { .. }
        | AgentError::ConfigError(_)
        | AgentError::ServerError(_)
        | AgentError::ShutdownError(_)
        | AgentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: self.0.kind().to_string(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}
