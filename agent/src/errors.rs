//! Error types for the deployment agent

use thiserror::Error;

use crate::models::deployment::DeploymentStatus;

/// Main error type for the deployment agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Persistence error during {operation} of {key}: {message}")]
    PersistenceError {
        operation: &'static str,
        key: String,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition for {deployment_id}: {from} -> {to}")]
    InvalidTransition {
        deployment_id: String,
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("Port {port} is already in use")]
    PortConflict { port: u16 },

    #[error("No available ports in range {start}-{end}")]
    PortRangeExhausted { start: u16, end: u16 },

    #[error("Port {port} was claimed before container {container_name} could bind it")]
    PortBindError { port: u16, container_name: String },

    #[error("No restorable deployment for service {service} before {deployment_id}")]
    NoRestorableDeployment {
        service: String,
        deployment_id: String,
    },

    #[error("Rollback deployment {deployment_id} of service {service} failed verification: {message}")]
    RollbackHealthCheckFailed {
        service: String,
        deployment_id: String,
        message: String,
    },

    #[error("Service {service} already has active deployment {deployment_id}")]
    ActiveDeployment {
        service: String,
        deployment_id: String,
    },

    #[error("Invalid health check target '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("VCS error: {0}")]
    VcsError(String),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Container runtime error: {0}")]
    ContainerRuntimeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Wrap a storage failure with the operation and key it happened on
    pub fn persistence(
        operation: &'static str,
        key: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        AgentError::PersistenceError {
            operation,
            key: key.into(),
            message: err.to_string(),
        }
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::IoError(_) => "io",
            AgentError::JsonError(_) => "json",
            AgentError::PersistenceError { .. } => "persistence",
            AgentError::NotFound(_) => "not_found",
            AgentError::InvalidTransition { .. } => "invalid_transition",
            AgentError::PortConflict { .. } => "port_conflict",
            AgentError::PortRangeExhausted { .. } => "port_range_exhausted",
            AgentError::PortBindError { .. } => "port_bind",
            AgentError::NoRestorableDeployment { .. } => "no_restorable_deployment",
            AgentError::RollbackHealthCheckFailed { .. } => "rollback_health_check_failed",
            AgentError::ActiveDeployment { .. } => "active_deployment",
            AgentError::InvalidTarget { .. } => "invalid_target",
            AgentError::VcsError(_) => "vcs",
            AgentError::BuildError(_) => "build",
            AgentError::ContainerRuntimeError(_) => "container_runtime",
            AgentError::ValidationError(_) => "validation",
            AgentError::ConfigError(_) => "config",
            AgentError::ServerError(_) => "server",
            AgentError::ShutdownError(_) => "shutdown",
            AgentError::Internal(_) => "internal",
        }
    }

    /// Whether a caller may reasonably retry the operation at a higher level.
    ///
    /// Only resource exhaustion and lost port races qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::PortConflict { .. }
                | AgentError::PortRangeExhausted { .. }
                | AgentError::PortBindError { .. }
        )
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}
