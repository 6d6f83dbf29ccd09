//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::deploy::docker::DockerCli;
use crate::deploy::git::GitCli;
use crate::deploy::{DeploymentManager, ManagerOptions};
use crate::errors::AgentError;
use crate::health::{HealthPoller, HttpProbe};
use crate::ledger::{FileStore, Ledger};
use crate::ports::{OsPortProbe, PortAllocator};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application state
pub struct AppState {
    /// Deployment ledger
    pub ledger: Arc<Ledger>,

    /// Deployment operations
    pub manager: Arc<DeploymentManager>,
}

impl AppState {
    /// Wire the file-backed ledger and the host collaborators together
    pub async fn init(layout: &StorageLayout, settings: &Settings) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        layout.setup().await?;

        let store = Arc::new(FileStore::from_layout(layout));
        let ledger = Arc::new(Ledger::new(store));

        let allocator = Arc::new(PortAllocator::new(
            ledger.clone(),
            Arc::new(OsPortProbe::new(settings.bind_host.clone())),
            settings.port_range,
        ));

        let probe = HttpProbe::new(Duration::from_secs(settings.health.probe_timeout_secs))?;
        let poller = HealthPoller::new(Arc::new(probe));

        let runtime = Arc::new(DockerCli::new(
            settings.bind_host.clone(),
            settings.container.memory_limit.clone(),
        ));
        let vcs = Arc::new(GitCli::new(
            layout.workspaces_dir(),
            settings.git.allowed_hosts.clone(),
            settings.git.token.clone(),
        ));

        let manager = Arc::new(DeploymentManager::new(
            ledger.clone(),
            allocator,
            poller,
            runtime,
            vcs,
            ManagerOptions::from(settings),
        ));

        let state = Self { ledger, manager };
        state.report_orphans().await?;
        Ok(state)
    }

    /// Pending records surviving a restart were never verified. They keep
    /// their ports until superseded or stopped.
    async fn report_orphans(&self) -> Result<(), AgentError> {
        for record in self.ledger.orphaned_pending().await? {
            warn!(
                "Deployment {} of {} is still pending on port {} from a previous run",
                record.deployment_id, record.service_name, record.host_port
            );
        }
        Ok(())
    }
}
