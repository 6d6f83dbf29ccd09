//! Deployment models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Container started, verification not finished
    Pending,

    /// Passed health verification
    Healthy,

    /// Failed verification or was superseded while pending
    Failed,

    /// Explicitly stopped after being healthy
    Stopped,

    /// Replaced by a rollback
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Healthy => "healthy",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    /// Active records own their host port and count as "live"
    pub fn is_active(&self) -> bool {
        matches!(self, DeploymentStatus::Pending | DeploymentStatus::Healthy)
    }

    /// Records that passed verification at some point. `Stopped` is only
    /// reachable from `Healthy`.
    pub fn is_known_good(&self) -> bool {
        matches!(self, DeploymentStatus::Healthy | DeploymentStatus::Stopped)
    }

    /// Check whether `self -> next` is an allowed status transition
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, Healthy)
                | (Pending, Failed)
                | (Healthy, Stopped)
                | (Failed, RolledBack)
                | (Healthy, RolledBack)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "healthy" => Ok(DeploymentStatus::Healthy),
            "failed" => Ok(DeploymentStatus::Failed),
            "stopped" => Ok(DeploymentStatus::Stopped),
            "rolled_back" => Ok(DeploymentStatus::RolledBack),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// A deployment attempt as stored in the ledger.
///
/// Everything but `status` is fixed once the record is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unique deployment ID
    pub deployment_id: String,

    /// Logical service the record belongs to
    pub service_name: String,

    /// Image that was started
    pub image_tag: String,

    /// Commit the image was built from
    pub commit_sha: String,

    /// Container name given to the runtime
    pub container_name: String,

    /// Runtime container ID, when the runtime reported one
    #[serde(default)]
    pub container_id: Option<String>,

    /// Host side of the port binding
    pub host_port: u16,

    /// Container side of the port binding
    pub container_port: u16,

    /// Current status
    pub status: DeploymentStatus,

    /// Creation time, strictly increasing within a service
    pub created_at: DateTime<Utc>,

    /// Record this one supersedes or restores
    #[serde(default)]
    pub previous_deployment_id: Option<String>,

    /// For rollback records: the failed record that triggered the rollback
    #[serde(default)]
    pub original_deployment_id: Option<String>,

    /// Source repository, if known
    #[serde(default)]
    pub repo_url: Option<String>,

    /// Branch, tag or ref, if known
    #[serde(default)]
    pub branch: Option<String>,

    /// Names of the environment variables passed to the container
    #[serde(default)]
    pub env_keys: Vec<String>,
}

impl DeploymentRecord {
    pub fn short_sha(&self) -> &str {
        short_sha(&self.commit_sha)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_rollback(&self) -> bool {
        self.original_deployment_id.is_some()
    }

    /// URL the deployment answers on from the host
    pub fn url(&self, host: &str, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        format!("http://{}:{}{}", host, self.host_port, path)
    }
}

/// Fields of a record before the ledger stamps its ID and creation time
#[derive(Debug, Clone, Default)]
pub struct NewDeployment {
    pub service_name: String,
    pub image_tag: String,
    pub commit_sha: String,
    pub container_name: String,
    pub container_id: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub previous_deployment_id: Option<String>,
    pub original_deployment_id: Option<String>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub env_keys: Vec<String>,
}

impl NewDeployment {
    /// Build the `pending` record created at `created_at`
    pub fn into_record(self, created_at: DateTime<Utc>) -> DeploymentRecord {
        DeploymentRecord {
            deployment_id: deployment_id(&self.service_name, created_at),
            service_name: self.service_name,
            image_tag: self.image_tag,
            commit_sha: self.commit_sha,
            container_name: self.container_name,
            container_id: self.container_id,
            host_port: self.host_port,
            container_port: self.container_port,
            status: DeploymentStatus::Pending,
            created_at,
            previous_deployment_id: self.previous_deployment_id,
            original_deployment_id: self.original_deployment_id,
            repo_url: self.repo_url,
            branch: self.branch,
            env_keys: self.env_keys,
        }
    }
}

/// Derive a deployment ID from the service name, creation time and a short
/// random suffix, e.g. `dep-api-20250101120000123456-3f9a1c`.
pub fn deployment_id(service_name: &str, created_at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "dep-{}-{}-{}",
        service_name,
        created_at.format("%Y%m%d%H%M%S%6f"),
        &suffix[..6]
    )
}

/// First seven characters of a commit SHA
pub fn short_sha(commit_sha: &str) -> &str {
    commit_sha.get(..7).unwrap_or(commit_sha)
}

/// Outcome of a health poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub url: String,
    pub response_code: Option<u16>,
    pub attempts: u32,
    pub elapsed_seconds: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
