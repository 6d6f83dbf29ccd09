//! Container runtime contract

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// Label put on every container the agent starts
pub const MANAGED_BY_LABEL: &str = "managed-by=deploy-agent";

/// Environment variables never forwarded to containers; the image decides
/// which user it runs as
pub const STRIPPED_ENV: &[&str] = &["RUN_AS_USER"];

/// What to run
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image_tag: String,
    pub container_name: String,
    pub host_port: u16,
    pub container_port: u16,
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// Environment with stripped keys removed
    pub fn forwarded_env(&self) -> impl Iterator<Item = (&String, &String)> {
        self.env
            .iter()
            .filter(|(key, _)| !STRIPPED_ENV.contains(&key.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedContainer {
    pub container_id: String,
}

/// Image build request
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context_path: PathBuf,
    pub tag: String,
    pub dockerfile: Option<PathBuf>,
    pub build_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltImage {
    pub image_id: String,
    pub tag: String,
    pub build_logs: String,
    pub size_bytes: Option<u64>,
}

/// Container engine operations used by the deployment manager.
///
/// `start` fails with `PortBindError` when the host port was claimed after
/// allocation, and with `ContainerRuntimeError` otherwise. `stop` succeeds
/// when the container does not exist.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self, spec: &ContainerSpec) -> Result<StartedContainer, AgentError>;

    async fn stop(&self, container_name: &str) -> Result<(), AgentError>;

    async fn logs(&self, container_name: &str, tail: u32) -> Result<String, AgentError>;

    async fn is_running(&self, container_name: &str) -> Result<bool, AgentError>;

    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, AgentError>;
}
