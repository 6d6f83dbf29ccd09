//! Deployment manager: the operations exposed to callers

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::deploy::git::{PreparedRepository, Vcs};
use crate::deploy::runtime::{BuildRequest, BuiltImage, ContainerRuntime, ContainerSpec};
use crate::errors::AgentError;
use crate::health::poller::{HealthPoller, PollOptions};
use crate::ledger::{Ledger, ServiceGuard};
use crate::models::deployment::{
    short_sha, DeploymentRecord, DeploymentStatus, HealthResult, NewDeployment,
};
use crate::ports::PortAllocator;
use crate::storage::settings::{HealthSettings, Settings};
use crate::validation;

/// Health check parameters for one deployment
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheck {
    pub poll: PollOptions,
    pub path: String,
}

impl From<&HealthSettings> for HealthCheck {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            poll: PollOptions::from(settings),
            path: settings.path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Host address deployments are reachable on
    pub bind_host: String,

    /// Container port used when a request names none
    pub default_container_port: u16,

    /// Health check used by rollback and as the default for `check_health`
    pub health: HealthCheck,
}

impl From<&Settings> for ManagerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            bind_host: settings.bind_host.clone(),
            default_container_port: settings.container.default_port,
            health: HealthCheck::from(&settings.health),
        }
    }
}

/// Request to start a deployment
#[derive(Debug, Clone, Default)]
pub struct StartDeployment {
    pub service_name: String,
    pub image_tag: String,
    pub commit_sha: String,
    pub preferred_port: Option<u16>,
    pub container_port: Option<u16>,
    pub env_vars: BTreeMap<String, String>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
}

/// Request to build an image from a prepared working tree
#[derive(Debug, Clone, Default)]
pub struct BuildImage {
    pub context_path: PathBuf,
    pub tag: String,
    pub dockerfile: Option<String>,
    pub build_args: BTreeMap<String, String>,
}

/// Composes the ledger, port allocator, health poller and the container and
/// VCS collaborators.
pub struct DeploymentManager {
    pub(super) ledger: Arc<Ledger>,
    pub(super) allocator: Arc<PortAllocator>,
    pub(super) poller: HealthPoller,
    pub(super) runtime: Arc<dyn ContainerRuntime>,
    pub(super) vcs: Arc<dyn Vcs>,
    pub(super) options: ManagerOptions,
}

impl DeploymentManager {
    pub fn new(
        ledger: Arc<Ledger>,
        allocator: Arc<PortAllocator>,
        poller: HealthPoller,
        runtime: Arc<dyn ContainerRuntime>,
        vcs: Arc<dyn Vcs>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            ledger,
            allocator,
            poller,
            runtime,
            vcs,
            options,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Health check configured for this agent
    pub fn default_health_check(&self) -> HealthCheck {
        self.options.health.clone()
    }

    /// Start a new deployment of a service.
    ///
    /// A port is reserved and the new container started while the current
    /// active record keeps serving. The active record is superseded only once
    /// the start succeeded, then a `pending` record is appended while the port
    /// reservation is still held. A failed start leaves the service as it was.
    pub async fn start_deployment(
        &self,
        request: StartDeployment,
    ) -> Result<DeploymentRecord, AgentError> {
        validation::validate_service_name(&request.service_name)?;
        let image_tag = validation::validate_image_tag(&request.image_tag)?;
        let commit_sha = validation::validate_commit_sha(&request.commit_sha)?;
        validation::validate_env_vars(&request.env_vars)?;
        if let Some(port) = request.preferred_port {
            validation::validate_port(port)?;
        }
        let container_port = request
            .container_port
            .unwrap_or(self.options.default_container_port);
        if container_port == 0 {
            return Err(AgentError::ValidationError(
                "Container port must be positive".to_string(),
            ));
        }
        if let Some(branch) = &request.branch {
            validation::validate_git_ref(branch)?;
        }

        let service = request.service_name.clone();
        info!(
            "Starting deployment of {} ({} at {})",
            service,
            image_tag,
            short_sha(&commit_sha)
        );

        let guard = self.ledger.lock(&service).await;
        let active = self.ledger.active(&service).await?;
        let previous = active.as_ref().map(|r| r.deployment_id.clone());

        // The predecessor must release its port before the new container can bind it
        let retiring = match active {
            Some(active) if request.preferred_port == Some(active.host_port) => {
                self.supersede(&guard, &active).await?;
                None
            }
            other => other,
        };

        let env_keys: Vec<String> = request.env_vars.keys().cloned().collect();
        let record = self
            .launch(&guard, request.preferred_port, retiring.as_ref(), |port| {
                let container_name = format!("{}-{}-p{}", service, short_sha(&commit_sha), port);
                validation::validate_container_name(&container_name)?;
                let spec = ContainerSpec {
                    image_tag: image_tag.clone(),
                    container_name: container_name.clone(),
                    host_port: port,
                    container_port,
                    env: request.env_vars.clone(),
                };
                let draft = NewDeployment {
                    service_name: service.clone(),
                    image_tag: image_tag.clone(),
                    commit_sha: commit_sha.clone(),
                    container_name,
                    container_id: None,
                    host_port: port,
                    container_port,
                    previous_deployment_id: previous.clone(),
                    original_deployment_id: None,
                    repo_url: request.repo_url.clone(),
                    branch: request.branch.clone(),
                    env_keys: env_keys.clone(),
                };
                Ok((spec, draft))
            })
            .await?;

        info!(
            "Deployment {} of {} is pending on port {}",
            record.deployment_id, record.service_name, record.host_port
        );
        Ok(record)
    }

    /// Poll a deployment and settle its status when it is still `pending`
    pub async fn check_health(
        &self,
        deployment_id: &str,
        check: &HealthCheck,
    ) -> Result<HealthResult, AgentError> {
        validation::validate_deployment_id(deployment_id)?;
        let record = self.ledger.get(deployment_id).await?;
        let url = record.url(&self.options.bind_host, &check.path);

        let mut result = self.poller.poll(&url, &check.poll).await?;

        if !result.healthy {
            match self.runtime.is_running(&record.container_name).await {
                Ok(false) => {
                    result.message = format!(
                        "{} (container {} is not running)",
                        result.message, record.container_name
                    )
                }
                Ok(true) => {}
                Err(e) => debug!("Unable to inspect {}: {}", record.container_name, e),
            }
        }

        if record.status == DeploymentStatus::Pending {
            let guard = self.ledger.lock(&record.service_name).await;
            let current = self.ledger.get(deployment_id).await?;
            if current.status == DeploymentStatus::Pending {
                let status = if result.healthy {
                    DeploymentStatus::Healthy
                } else {
                    DeploymentStatus::Failed
                };
                self.ledger
                    .update_status_locked(&guard, deployment_id, status)
                    .await?;
            } else {
                debug!(
                    "Deployment {} moved to {} while polling, leaving it",
                    deployment_id, current.status
                );
            }
        }
        Ok(result)
    }

    /// Stop a deployment's container: `healthy -> stopped`, `pending -> failed`
    pub async fn stop_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentRecord, AgentError> {
        validation::validate_deployment_id(deployment_id)?;
        let record = self.ledger.get(deployment_id).await?;
        let guard = self.ledger.lock(&record.service_name).await;
        let current = self.ledger.get(deployment_id).await?;

        let next = match current.status {
            DeploymentStatus::Healthy => DeploymentStatus::Stopped,
            DeploymentStatus::Pending => DeploymentStatus::Failed,
            from => {
                return Err(AgentError::InvalidTransition {
                    deployment_id: deployment_id.to_string(),
                    from,
                    to: DeploymentStatus::Stopped,
                })
            }
        };

        self.runtime.stop(&current.container_name).await?;
        self.ledger
            .update_status_locked(&guard, deployment_id, next)
            .await
    }

    /// Records of a service in creation order
    pub async fn get_history(
        &self,
        service_name: &str,
    ) -> Result<Vec<DeploymentRecord>, AgentError> {
        validation::validate_service_name(service_name)?;
        self.ledger.history(service_name).await
    }

    pub async fn get_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentRecord, AgentError> {
        validation::validate_deployment_id(deployment_id)?;
        self.ledger.get(deployment_id).await
    }

    /// Tail container output, addressed by deployment ID or container name
    pub async fn container_logs(&self, target: &str, tail: Option<u32>) -> Result<String, AgentError> {
        let container_name = if validation::validate_deployment_id(target).is_ok() {
            self.ledger.get(target).await?.container_name
        } else {
            validation::validate_container_name(target)?;
            target.to_string()
        };
        self.runtime
            .logs(&container_name, validation::clamp_tail(tail))
            .await
    }

    pub async fn prepare_repository(
        &self,
        repo_url: &str,
        reference: &str,
    ) -> Result<PreparedRepository, AgentError> {
        self.vcs.prepare(repo_url, reference).await
    }

    pub async fn build_image(&self, request: BuildImage) -> Result<BuiltImage, AgentError> {
        let tag = validation::validate_image_tag(&request.tag)?;
        validation::validate_env_vars(&request.build_args)?;
        let dockerfile = validation::validate_dockerfile_path(
            request.dockerfile.as_deref().unwrap_or("Dockerfile"),
            &request.context_path,
        )
        .await?;

        self.runtime
            .build(&BuildRequest {
                context_path: request.context_path,
                tag,
                dockerfile: Some(dockerfile),
                build_args: request.build_args,
            })
            .await
    }

    /// Retire an active record so a new one can be appended
    pub(super) async fn supersede(
        &self,
        guard: &ServiceGuard,
        active: &DeploymentRecord,
    ) -> Result<(), AgentError> {
        match active.status {
            DeploymentStatus::Healthy => {
                info!("Stopping {} to make way for a new deployment", active.deployment_id);
                self.runtime.stop(&active.container_name).await?;
                self.ledger
                    .update_status_locked(guard, &active.deployment_id, DeploymentStatus::Stopped)
                    .await?;
            }
            _ => {
                warn!(
                    "Superseding unverified deployment {} of {}",
                    active.deployment_id, active.service_name
                );
                self.stop_best_effort(&active.container_name).await;
                self.ledger
                    .update_status_locked(guard, &active.deployment_id, DeploymentStatus::Failed)
                    .await?;
            }
        }
        Ok(())
    }

    /// Reserve a port, start the container and append its record while the
    /// reservation is held. `retiring` is superseded between the start and the
    /// append. A lost bind race is retried once with a fresh reservation.
    pub(super) async fn launch<F>(
        &self,
        guard: &ServiceGuard,
        preferred: Option<u16>,
        retiring: Option<&DeploymentRecord>,
        mut prepare: F,
    ) -> Result<DeploymentRecord, AgentError>
    where
        F: FnMut(u16) -> Result<(ContainerSpec, NewDeployment), AgentError>,
    {
        let mut retried = false;
        loop {
            let reservation = self.allocator.reserve(preferred).await?;
            let (spec, mut draft) = prepare(reservation.port())?;

            match self.runtime.start(&spec).await {
                Ok(started) => {
                    draft.container_id = Some(started.container_id);
                    if let Some(active) = retiring {
                        if let Err(e) = self.supersede(guard, active).await {
                            self.stop_best_effort(&spec.container_name).await;
                            return Err(e);
                        }
                    }
                    return match self.ledger.append_locked(guard, draft).await {
                        Ok(record) => Ok(record),
                        Err(e) => {
                            // Unrecorded containers would hold the port forever
                            self.stop_best_effort(&spec.container_name).await;
                            Err(e)
                        }
                    };
                }
                Err(AgentError::PortBindError {
                    port,
                    container_name,
                }) if !retried => {
                    warn!(
                        "Port {} was claimed before {} could bind it, allocating again",
                        port, container_name
                    );
                    retried = true;
                    drop(reservation);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) async fn stop_best_effort(&self, container_name: &str) {
        if let Err(e) = self.runtime.stop(container_name).await {
            warn!("Failed to stop container {}: {}", container_name, e);
        }
    }
}
