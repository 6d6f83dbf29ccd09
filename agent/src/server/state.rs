//! Server state

use std::sync::Arc;

use crate::deploy::DeploymentManager;

/// Server state shared across handlers
pub struct ServerState {
    pub manager: Arc<DeploymentManager>,

    /// Host deployment URLs are reported on
    pub bind_host: String,
}

impl ServerState {
    pub fn new(manager: Arc<DeploymentManager>, bind_host: impl Into<String>) -> Self {
        Self {
            manager,
            bind_host: bind_host.into(),
        }
    }
}
