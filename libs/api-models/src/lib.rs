//! Deploy agent API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub retryable: bool,
}

/// Start deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDeploymentRequest {
    pub service_name: String,
    pub image_tag: String,
    pub commit_sha: String,
    #[serde(default)]
    pub preferred_port: Option<u16>,
    #[serde(default)]
    pub container_port: Option<u16>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

/// A deployment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub deployment_id: String,
    pub service_name: String,
    pub image_tag: String,
    pub commit_sha: String,
    pub container_name: String,
    pub container_id: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub previous_deployment_id: Option<String>,
    pub original_deployment_id: Option<String>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub env_keys: Vec<String>,
    pub url: String,
}

/// Deployment history of a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub service_name: String,
    pub total: usize,
    pub deployments: Vec<DeploymentResponse>,
}

/// Health check request; omitted fields use the agent's configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckRequest {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub initial_interval_secs: Option<f64>,
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
    #[serde(default)]
    pub expected_status: Option<u16>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Health check outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub deployment_id: String,
    pub healthy: bool,
    pub url: String,
    pub response_code: Option<u16>,
    pub attempts: u32,
    pub elapsed_seconds: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rollback request; exactly one field must be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackRequest {
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
}

/// Log query parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub tail: Option<u32>,
}

/// Container logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub target: String,
    pub tail: u32,
    pub logs: String,
}

/// Repository preparation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRepositoryRequest {
    pub repo_url: String,
    #[serde(default = "default_reference")]
    pub reference: String,
}

fn default_reference() -> String {
    "main".to_string()
}

/// Prepared working tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRepositoryResponse {
    pub workspace_path: String,
    pub commit_sha: String,
    pub short_sha: String,
    pub reference: String,
    pub author: String,
    pub message: String,
}

/// Image build request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildImageRequest {
    pub context_path: String,
    pub tag: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

/// Built image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildImageResponse {
    pub image_id: String,
    pub tag: String,
    pub size_bytes: Option<u64>,
    pub build_logs: String,
}

/// Project detection request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectProjectRequest {
    pub path: String,
}

/// Detected project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectProjectResponse {
    pub project_type: String,
    pub dockerfile_path: Option<String>,
    pub compose_file: Option<String>,
    pub exposed_ports: Vec<u16>,
    pub has_docker: bool,
    pub has_compose: bool,
}
