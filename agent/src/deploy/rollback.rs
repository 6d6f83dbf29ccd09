//! Rollback orchestration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::deploy::fsm::{RollbackEvent, RollbackFsm};
use crate::deploy::manager::DeploymentManager;
use crate::deploy::runtime::ContainerSpec;
use crate::errors::AgentError;
use crate::ledger::ServiceGuard;
use crate::models::deployment::{DeploymentRecord, DeploymentStatus, NewDeployment};
use crate::validation;

/// What to roll back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTarget {
    /// A specific failed deployment
    Deployment(String),

    /// The most recent failed deployment of a service
    Service(String),
}

fn fsm_error(e: String) -> AgentError {
    AgentError::Internal(e)
}

impl DeploymentManager {
    /// Restore the last known-good deployment preceding a failed one.
    ///
    /// Creates a new record linked to both the failed and the restored
    /// record. Repeating a completed rollback returns the existing record.
    pub async fn rollback(&self, target: RollbackTarget) -> Result<DeploymentRecord, AgentError> {
        let mut fsm = RollbackFsm::new();
        let result = self.run_rollback(&mut fsm, &target).await;

        if let Err(e) = &result {
            if !fsm.state().is_terminal() {
                let _ = fsm.process(RollbackEvent::Abort(e.to_string()));
            }
            error!(
                "Rollback of {:?} aborted while {:?}: {}",
                target,
                fsm.aborted_in(),
                e
            );
        }
        result
    }

    async fn run_rollback(
        &self,
        fsm: &mut RollbackFsm,
        target: &RollbackTarget,
    ) -> Result<DeploymentRecord, AgentError> {
        // Locating
        let service = match target {
            RollbackTarget::Deployment(id) => {
                validation::validate_deployment_id(id)?;
                self.ledger.get(id).await?.service_name
            }
            RollbackTarget::Service(name) => {
                validation::validate_service_name(name)?;
                name.clone()
            }
        };

        let guard = self.ledger.lock(&service).await;
        let failed = self.resolve_failed(&service, target).await?;

        if failed.status == DeploymentStatus::RolledBack {
            let existing = self
                .ledger
                .rollback_of(&failed.deployment_id)
                .await?
                .ok_or_else(|| AgentError::NoRestorableDeployment {
                    service: service.clone(),
                    deployment_id: failed.deployment_id.clone(),
                })?;
            fsm.process(RollbackEvent::AlreadyRestored {
                deployment_id: existing.deployment_id.clone(),
            })
            .map_err(fsm_error)?;
            info!(
                "{} was already rolled back by {}",
                failed.deployment_id, existing.deployment_id
            );
            return Ok(existing);
        }

        let restore = self
            .ledger
            .last_healthy_before(&service, &failed.deployment_id)
            .await?
            .ok_or_else(|| AgentError::NoRestorableDeployment {
                service: service.clone(),
                deployment_id: failed.deployment_id.clone(),
            })?;
        fsm.process(RollbackEvent::Located {
            failed_id: failed.deployment_id.clone(),
            restore_id: restore.deployment_id.clone(),
        })
        .map_err(fsm_error)?;
        info!(
            "Rolling back {} of {} to {} ({})",
            failed.deployment_id,
            service,
            restore.deployment_id,
            restore.short_sha()
        );

        self.clear_for_restore(&guard, &failed).await?;

        // Reserving + Restoring
        let restored = self
            .launch(&guard, None, None, |port| {
                fsm.process(RollbackEvent::PortReserved(port))
                    .map_err(fsm_error)?;
                let container_name =
                    format!("{}-rollback-{}-p{}", service, restore.short_sha(), port);
                validation::validate_container_name(&container_name)?;
                let spec = ContainerSpec {
                    image_tag: restore.image_tag.clone(),
                    container_name: container_name.clone(),
                    host_port: port,
                    container_port: restore.container_port,
                    env: BTreeMap::new(),
                };
                let draft = NewDeployment {
                    service_name: service.clone(),
                    image_tag: restore.image_tag.clone(),
                    commit_sha: restore.commit_sha.clone(),
                    container_name,
                    container_id: None,
                    host_port: port,
                    container_port: restore.container_port,
                    previous_deployment_id: Some(restore.deployment_id.clone()),
                    original_deployment_id: Some(failed.deployment_id.clone()),
                    repo_url: restore.repo_url.clone(),
                    branch: restore.branch.clone(),
                    env_keys: Vec::new(),
                };
                Ok((spec, draft))
            })
            .await?;
        fsm.process(RollbackEvent::Restored {
            deployment_id: restored.deployment_id.clone(),
        })
        .map_err(fsm_error)?;

        // Verifying
        let check = self.default_health_check();
        let url = restored.url(&self.options.bind_host, &check.path);
        let result = self.poller.poll(&url, &check.poll).await?;

        if !result.healthy {
            self.ledger
                .update_status_locked(&guard, &restored.deployment_id, DeploymentStatus::Failed)
                .await?;
            return Err(AgentError::RollbackHealthCheckFailed {
                service,
                deployment_id: restored.deployment_id,
                message: result.message,
            });
        }

        let restored = self
            .ledger
            .update_status_locked(&guard, &restored.deployment_id, DeploymentStatus::Healthy)
            .await?;
        self.ledger
            .update_status_locked(&guard, &failed.deployment_id, DeploymentStatus::RolledBack)
            .await?;
        fsm.process(RollbackEvent::Verified).map_err(fsm_error)?;

        info!(
            "Rollback of {} completed: {} is healthy on port {}",
            failed.deployment_id, restored.deployment_id, restored.host_port
        );
        Ok(restored)
    }

    /// The record a rollback starts from: the named deployment, or the newest
    /// failed or rolled back record of the service
    async fn resolve_failed(
        &self,
        service: &str,
        target: &RollbackTarget,
    ) -> Result<DeploymentRecord, AgentError> {
        let is_target =
            |s: DeploymentStatus| matches!(s, DeploymentStatus::Failed | DeploymentStatus::RolledBack);

        match target {
            RollbackTarget::Deployment(id) => {
                let record = self.ledger.get(id).await?;
                if !is_target(record.status) {
                    return Err(AgentError::InvalidTransition {
                        deployment_id: id.clone(),
                        from: record.status,
                        to: DeploymentStatus::RolledBack,
                    });
                }
                Ok(record)
            }
            RollbackTarget::Service(_) => self
                .ledger
                .history(service)
                .await?
                .into_iter()
                .rev()
                .find(|r| is_target(r.status))
                .ok_or_else(|| {
                    AgentError::NotFound(format!("Failed deployment of service {}", service))
                }),
        }
    }

    /// Make sure nothing else is live for the service before restoring.
    ///
    /// A `pending` record left behind by an abandoned deploy or rollback is
    /// superseded; a `healthy` one means there is nothing to roll back.
    async fn clear_for_restore(
        &self,
        guard: &ServiceGuard,
        failed: &DeploymentRecord,
    ) -> Result<(), AgentError> {
        if let Some(active) = self.ledger.active(guard.service_name()).await? {
            if active.status == DeploymentStatus::Healthy {
                return Err(AgentError::ActiveDeployment {
                    service: active.service_name,
                    deployment_id: active.deployment_id,
                });
            }
            warn!(
                "Superseding orphaned pending deployment {} of {}",
                active.deployment_id, active.service_name
            );
            self.stop_best_effort(&active.container_name).await;
            self.ledger
                .update_status_locked(guard, &active.deployment_id, DeploymentStatus::Failed)
                .await?;
        }

        self.stop_best_effort(&failed.container_name).await;
        Ok(())
    }
}
