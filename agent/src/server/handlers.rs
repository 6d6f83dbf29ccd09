//! HTTP request handlers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use api_models::{
    BuildImageRequest, BuildImageResponse, DeploymentResponse, DetectProjectRequest,
    DetectProjectResponse, HealthCheckRequest, HealthCheckResponse, HealthResponse,
    HistoryResponse, LogsQuery, LogsResponse, PrepareRepositoryRequest,
    PrepareRepositoryResponse, RollbackRequest, StartDeploymentRequest, VersionResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::deploy::project::detect_project_type;
use crate::deploy::{BuildImage, HealthCheck, RollbackTarget, StartDeployment};
use crate::errors::AgentError;
use crate::models::deployment::{short_sha, DeploymentRecord};
use crate::server::errors::ApiError;
use crate::server::state::ServerState;
use crate::utils::version_info;
use crate::validation;

type ApiResult<T> = Result<T, ApiError>;

fn deployment_response(record: DeploymentRecord, bind_host: &str) -> DeploymentResponse {
    let url = record.url(bind_host, "/");
    DeploymentResponse {
        deployment_id: record.deployment_id,
        service_name: record.service_name,
        image_tag: record.image_tag,
        commit_sha: record.commit_sha,
        container_name: record.container_name,
        container_id: record.container_id,
        host_port: record.host_port,
        container_port: record.container_port,
        status: record.status.to_string(),
        created_at: record.created_at,
        previous_deployment_id: record.previous_deployment_id,
        original_deployment_id: record.original_deployment_id,
        repo_url: record.repo_url,
        branch: record.branch,
        env_keys: record.env_keys,
        url,
    }
}

/// Apply request overrides on top of the configured health check
fn health_check(defaults: HealthCheck, request: HealthCheckRequest) -> Result<HealthCheck, AgentError> {
    let mut check = defaults;
    if let Some(secs) = request.timeout_secs {
        check.poll.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = request.initial_interval_secs {
        check.poll.initial_interval = Duration::try_from_secs_f64(secs).map_err(|_| {
            AgentError::ValidationError(format!("Invalid health check interval: {}", secs))
        })?;
    }
    if let Some(multiplier) = request.backoff_multiplier {
        check.poll.backoff_multiplier = multiplier;
    }
    if let Some(status) = request.expected_status {
        check.poll.expected_status = status;
    }
    if let Some(path) = request.path {
        if !path.starts_with('/') {
            return Err(AgentError::ValidationError(format!(
                "Health check path must start with '/': {}",
                path
            )));
        }
        check.path = path;
    }
    check.poll.validate()?;
    Ok(check)
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deploy-agent".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

pub async fn start_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<StartDeploymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .manager
        .start_deployment(StartDeployment {
            service_name: request.service_name,
            image_tag: request.image_tag,
            commit_sha: request.commit_sha,
            preferred_port: request.preferred_port,
            container_port: request.container_port,
            env_vars: request.env_vars,
            repo_url: request.repo_url,
            branch: request.branch,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(deployment_response(record, &state.bind_host)),
    ))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> ApiResult<Json<DeploymentResponse>> {
    let record = state.manager.get_deployment(&deployment_id).await?;
    Ok(Json(deployment_response(record, &state.bind_host)))
}

/// Poll a deployment; an empty body uses the configured check
pub async fn check_health_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
    request: Option<Json<HealthCheckRequest>>,
) -> ApiResult<Json<HealthCheckResponse>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let check = health_check(state.manager.default_health_check(), request)?;

    let result = state.manager.check_health(&deployment_id, &check).await?;
    Ok(Json(HealthCheckResponse {
        deployment_id,
        healthy: result.healthy,
        url: result.url,
        response_code: result.response_code,
        attempts: result.attempts,
        elapsed_seconds: result.elapsed_seconds,
        message: result.message,
        error: result.error,
    }))
}

pub async fn stop_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> ApiResult<Json<DeploymentResponse>> {
    let record = state.manager.stop_deployment(&deployment_id).await?;
    Ok(Json(deployment_response(record, &state.bind_host)))
}

pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let tail = validation::clamp_tail(query.tail);
    let logs = state
        .manager
        .container_logs(&deployment_id, Some(tail))
        .await?;
    Ok(Json(LogsResponse {
        target: deployment_id,
        tail,
        logs,
    }))
}

pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<RollbackRequest>,
) -> ApiResult<Json<DeploymentResponse>> {
    let target = match (request.deployment_id, request.service_name) {
        (Some(id), None) => RollbackTarget::Deployment(id),
        (None, Some(name)) => RollbackTarget::Service(name),
        _ => {
            return Err(AgentError::ValidationError(
                "Exactly one of deployment_id or service_name is required".to_string(),
            )
            .into())
        }
    };

    let record = state.manager.rollback(target).await?;
    Ok(Json(deployment_response(record, &state.bind_host)))
}

pub async fn history_handler(
    State(state): State<Arc<ServerState>>,
    Path(service_name): Path<String>,
) -> ApiResult<Json<HistoryResponse>> {
    let deployments: Vec<DeploymentResponse> = state
        .manager
        .get_history(&service_name)
        .await?
        .into_iter()
        .map(|r| deployment_response(r, &state.bind_host))
        .collect();

    Ok(Json(HistoryResponse {
        service_name,
        total: deployments.len(),
        deployments,
    }))
}

pub async fn prepare_repository_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<PrepareRepositoryRequest>,
) -> ApiResult<Json<PrepareRepositoryResponse>> {
    let prepared = state
        .manager
        .prepare_repository(&request.repo_url, &request.reference)
        .await?;

    Ok(Json(PrepareRepositoryResponse {
        workspace_path: prepared.workspace_path.display().to_string(),
        short_sha: short_sha(&prepared.commit_sha).to_string(),
        commit_sha: prepared.commit_sha,
        reference: prepared.reference,
        author: prepared.author,
        message: prepared.message,
    }))
}

pub async fn build_image_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<BuildImageRequest>,
) -> ApiResult<impl IntoResponse> {
    let image = state
        .manager
        .build_image(BuildImage {
            context_path: PathBuf::from(request.context_path),
            tag: request.tag,
            dockerfile: request.dockerfile,
            build_args: request.build_args,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(BuildImageResponse {
            image_id: image.image_id,
            tag: image.tag,
            size_bytes: image.size_bytes,
            build_logs: image.build_logs,
        }),
    ))
}

pub async fn detect_project_handler(
    Json(request): Json<DetectProjectRequest>,
) -> ApiResult<Json<DetectProjectResponse>> {
    let info = detect_project_type(&PathBuf::from(&request.path)).await?;
    Ok(Json(DetectProjectResponse {
        project_type: info.project_type.to_string(),
        dockerfile_path: info.dockerfile_path,
        compose_file: info.compose_file,
        exposed_ports: info.exposed_ports,
        has_docker: info.has_docker,
        has_compose: info.has_compose,
    }))
}
