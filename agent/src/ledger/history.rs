//! Deployment ledger: ordered, append-biased history per service

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::try_join_all;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::errors::AgentError;
use crate::ledger::store::RecordStore;
use crate::models::deployment::{DeploymentRecord, DeploymentStatus, NewDeployment};

/// Proof that the caller holds the per-service lock
pub struct ServiceGuard {
    service_name: String,
    _guard: OwnedMutexGuard<()>,
}

impl ServiceGuard {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl std::fmt::Debug for ServiceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceGuard")
            .field("service_name", &self.service_name)
            .finish()
    }
}

/// The deployment ledger.
///
/// The store is the single source of truth; nothing about ports or statuses
/// is cached between calls. Mutations of one service are serialized by a
/// per-service lock, different services proceed concurrently.
pub struct Ledger {
    store: Arc<dyn RecordStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock of `service_name`
    pub async fn lock(&self, service_name: &str) -> ServiceGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(service_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        ServiceGuard {
            service_name: service_name.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Append a new `pending` record, taking the service lock
    pub async fn append(&self, draft: NewDeployment) -> Result<DeploymentRecord, AgentError> {
        let guard = self.lock(&draft.service_name).await;
        self.append_locked(&guard, draft).await
    }

    /// Append a new `pending` record under an already held service lock.
    ///
    /// The record is written before the service index, so a crash in between
    /// leaves an unindexed record that readers never see.
    pub async fn append_locked(
        &self,
        guard: &ServiceGuard,
        draft: NewDeployment,
    ) -> Result<DeploymentRecord, AgentError> {
        check_guard(guard, &draft.service_name)?;

        let mut ids = self.store.get_index(&draft.service_name).await?;
        let history = self.load(&ids).await?;

        if let Some(active) = history.iter().find(|r| r.is_active()) {
            return Err(AgentError::ActiveDeployment {
                service: draft.service_name,
                deployment_id: active.deployment_id.clone(),
            });
        }

        if self.active_port_set().await?.contains(&draft.host_port) {
            return Err(AgentError::PortConflict {
                port: draft.host_port,
            });
        }

        let mut created_at = Utc::now();
        if let Some(last) = history.last() {
            if created_at <= last.created_at {
                created_at = last.created_at + ChronoDuration::microseconds(1);
            }
        }

        let record = draft.into_record(created_at);
        self.store.put_record(&record).await?;
        ids.push(record.deployment_id.clone());
        self.store.put_index(&record.service_name, &ids).await?;

        info!(
            "Recorded deployment {} for {} on port {}",
            record.deployment_id, record.service_name, record.host_port
        );
        Ok(record)
    }

    /// Transition the status of a record, taking the service lock
    pub async fn update_status(
        &self,
        deployment_id: &str,
        new_status: DeploymentStatus,
    ) -> Result<DeploymentRecord, AgentError> {
        let record = self.get(deployment_id).await?;
        let guard = self.lock(&record.service_name).await;
        self.update_status_locked(&guard, deployment_id, new_status)
            .await
    }

    /// Transition the status of a record under an already held service lock
    pub async fn update_status_locked(
        &self,
        guard: &ServiceGuard,
        deployment_id: &str,
        new_status: DeploymentStatus,
    ) -> Result<DeploymentRecord, AgentError> {
        // Re-read under the lock, the status may have moved since
        let mut record = self.get(deployment_id).await?;
        check_guard(guard, &record.service_name)?;

        if !record.status.can_transition_to(new_status) {
            return Err(AgentError::InvalidTransition {
                deployment_id: deployment_id.to_string(),
                from: record.status,
                to: new_status,
            });
        }

        let from = record.status;
        record.status = new_status;
        self.store.put_record(&record).await?;

        info!("Deployment {} {} -> {}", deployment_id, from, new_status);
        Ok(record)
    }

    /// Look up a single record
    pub async fn get(&self, deployment_id: &str) -> Result<DeploymentRecord, AgentError> {
        self.store
            .get_record(deployment_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("Deployment {}", deployment_id)))
    }

    /// All records of a service in creation order
    pub async fn history(&self, service_name: &str) -> Result<Vec<DeploymentRecord>, AgentError> {
        let ids = self.store.get_index(service_name).await?;
        self.load(&ids).await
    }

    /// The most recent known-good record created before `before_id`.
    ///
    /// `stopped` counts as known-good: it is only reachable from `healthy`.
    pub async fn last_healthy_before(
        &self,
        service_name: &str,
        before_id: &str,
    ) -> Result<Option<DeploymentRecord>, AgentError> {
        let before = self.get(before_id).await?;
        if before.service_name != service_name {
            return Err(AgentError::NotFound(format!(
                "Deployment {} in service {}",
                before_id, service_name
            )));
        }

        let history = self.history(service_name).await?;
        Ok(history
            .into_iter()
            .filter(|r| r.created_at < before.created_at && r.status.is_known_good())
            .next_back())
    }

    /// Host ports held by `pending` or `healthy` records across all services
    pub async fn active_port_set(&self) -> Result<HashSet<u16>, AgentError> {
        let services = self.store.list_services().await?;
        let histories = try_join_all(services.iter().map(|s| self.history(s))).await?;
        Ok(histories
            .into_iter()
            .flatten()
            .filter(|r| r.is_active())
            .map(|r| r.host_port)
            .collect())
    }

    /// The active record of a service, if any
    pub async fn active(&self, service_name: &str) -> Result<Option<DeploymentRecord>, AgentError> {
        let history = self.history(service_name).await?;
        Ok(history.into_iter().rev().find(|r| r.is_active()))
    }

    /// The most recent record of a service with the given status
    pub async fn latest_with_status(
        &self,
        service_name: &str,
        status: DeploymentStatus,
    ) -> Result<Option<DeploymentRecord>, AgentError> {
        let history = self.history(service_name).await?;
        Ok(history.into_iter().rev().find(|r| r.status == status))
    }

    /// The newest rollback record created on behalf of `original_id`
    pub async fn rollback_of(
        &self,
        original_id: &str,
    ) -> Result<Option<DeploymentRecord>, AgentError> {
        let original = self.get(original_id).await?;
        let history = self.history(&original.service_name).await?;
        Ok(history
            .into_iter()
            .rev()
            .find(|r| r.original_deployment_id.as_deref() == Some(original_id)))
    }

    /// All `pending` records across services
    pub async fn orphaned_pending(&self) -> Result<Vec<DeploymentRecord>, AgentError> {
        let services = self.store.list_services().await?;
        let histories = try_join_all(services.iter().map(|s| self.history(s))).await?;
        Ok(histories
            .into_iter()
            .flatten()
            .filter(|r| r.status == DeploymentStatus::Pending)
            .collect())
    }

    /// Names of all services with at least one record
    pub async fn services(&self) -> Result<Vec<String>, AgentError> {
        self.store.list_services().await
    }

    async fn load(&self, ids: &[String]) -> Result<Vec<DeploymentRecord>, AgentError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_record(id).await? {
                Some(record) => records.push(record),
                None => warn!("Index references missing record {}", id),
            }
        }
        Ok(records)
    }
}

fn check_guard(guard: &ServiceGuard, service_name: &str) -> Result<(), AgentError> {
    if guard.service_name == service_name {
        Ok(())
    } else {
        Err(AgentError::Internal(format!(
            "Lock for service {} used to mutate service {}",
            guard.service_name, service_name
        )))
    }
}
