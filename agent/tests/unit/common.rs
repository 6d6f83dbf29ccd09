//! Fakes and builders shared by the test suite

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use deploy_agent::deploy::git::{PreparedRepository, Vcs};
use deploy_agent::deploy::runtime::{
    BuildRequest, BuiltImage, ContainerRuntime, ContainerSpec, StartedContainer,
};
use deploy_agent::deploy::{DeploymentManager, HealthCheck, ManagerOptions, StartDeployment};
use deploy_agent::errors::AgentError;
use deploy_agent::health::{HealthPoller, PollOptions, Probe};
use deploy_agent::ledger::{Ledger, MemoryStore};
use deploy_agent::models::deployment::NewDeployment;
use deploy_agent::ports::{PortAllocator, PortProbe};
use deploy_agent::storage::settings::PortRangeSettings;

pub const SHA_A: &str = "aaaaaaa1111111111111111111111111111111aa";
pub const SHA_B: &str = "bbbbbbb2222222222222222222222222222222bb";
pub const SHA_C: &str = "ccccccc3333333333333333333333333333333cc";

/// Ports listed as busy are reported as bound by another process
#[derive(Default)]
pub struct FakePortProbe {
    busy: Mutex<HashSet<u16>>,
}

impl FakePortProbe {
    pub fn occupy(&self, port: u16) {
        self.busy.lock().unwrap().insert(port);
    }
}

impl PortProbe for FakePortProbe {
    fn is_free(&self, port: u16) -> bool {
        !self.busy.lock().unwrap().contains(&port)
    }
}

/// Records container operations instead of running them
#[derive(Default)]
pub struct FakeRuntime {
    pub started: Mutex<Vec<ContainerSpec>>,
    pub stopped: Mutex<Vec<String>>,
    /// Number of upcoming starts that lose the bind race
    pub bind_failures: AtomicU32,
    /// Image tags that refuse to start
    pub broken_images: Mutex<HashSet<String>>,
}

impl FakeRuntime {
    pub fn started_names(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.container_name.clone())
            .collect()
    }

    pub fn stopped_names(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<StartedContainer, AgentError> {
        if self.broken_images.lock().unwrap().contains(&spec.image_tag) {
            return Err(AgentError::ContainerRuntimeError(format!(
                "image {} not found",
                spec.image_tag
            )));
        }
        let pending_failures = self.bind_failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.bind_failures.store(pending_failures - 1, Ordering::SeqCst);
            return Err(AgentError::PortBindError {
                port: spec.host_port,
                container_name: spec.container_name.clone(),
            });
        }
        self.started.lock().unwrap().push(spec.clone());
        Ok(StartedContainer {
            container_id: format!("cid-{}", spec.container_name),
        })
    }

    async fn stop(&self, container_name: &str) -> Result<(), AgentError> {
        self.stopped.lock().unwrap().push(container_name.to_string());
        Ok(())
    }

    async fn logs(&self, container_name: &str, tail: u32) -> Result<String, AgentError> {
        Ok(format!("{} last {} lines", container_name, tail))
    }

    async fn is_running(&self, container_name: &str) -> Result<bool, AgentError> {
        let started = self.started_names().contains(&container_name.to_string());
        let stopped = self.stopped_names().contains(&container_name.to_string());
        Ok(started && !stopped)
    }

    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, AgentError> {
        Ok(BuiltImage {
            image_id: "sha256:0123456789ab".to_string(),
            tag: request.tag.clone(),
            build_logs: "built".to_string(),
            size_bytes: Some(1024),
        })
    }
}

/// Answers per host port; unknown ports refuse connections
#[derive(Default)]
pub struct FakeHealthProbe {
    responses: Mutex<HashMap<u16, u16>>,
    pub calls: AtomicU32,
}

impl FakeHealthProbe {
    pub fn respond(&self, port: u16, status: u16) {
        self.responses.lock().unwrap().insert(port, status);
    }
}

#[async_trait]
impl Probe for FakeHealthProbe {
    async fn probe(&self, url: &str) -> Result<u16, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let port = url::Url::parse(url)
            .map_err(|e| e.to_string())?
            .port()
            .ok_or_else(|| "no port".to_string())?;
        self.responses
            .lock()
            .unwrap()
            .get(&port)
            .copied()
            .ok_or_else(|| "connection refused".to_string())
    }
}

pub struct FakeVcs;

#[async_trait]
impl Vcs for FakeVcs {
    async fn prepare(
        &self,
        repo_url: &str,
        reference: &str,
    ) -> Result<PreparedRepository, AgentError> {
        Ok(PreparedRepository {
            workspace_path: PathBuf::from("/tmp/workspaces").join(reference),
            commit_sha: format!("{}{}", &SHA_A[..7], repo_url.len() % 10),
            reference: reference.to_string(),
            author: "Dev <dev@example.com>".to_string(),
            message: "Initial commit".to_string(),
        })
    }
}

pub fn range(start: u16, end: u16) -> PortRangeSettings {
    PortRangeSettings { start, end }
}

pub fn health_check() -> HealthCheck {
    HealthCheck {
        poll: PollOptions {
            timeout: Duration::from_secs(10),
            initial_interval: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            expected_status: 200,
        },
        path: "/".to_string(),
    }
}

/// A manager over an in-memory ledger with every collaborator faked
pub struct Harness {
    pub ledger: Arc<Ledger>,
    pub ports: Arc<FakePortProbe>,
    pub runtime: Arc<FakeRuntime>,
    pub health: Arc<FakeHealthProbe>,
    pub manager: Arc<DeploymentManager>,
}

impl Harness {
    pub fn new(port_range: PortRangeSettings) -> Self {
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryStore::new())));
        let ports = Arc::new(FakePortProbe::default());
        let runtime = Arc::new(FakeRuntime::default());
        let health = Arc::new(FakeHealthProbe::default());

        let allocator = Arc::new(PortAllocator::new(ledger.clone(), ports.clone(), port_range));
        let manager = Arc::new(DeploymentManager::new(
            ledger.clone(),
            allocator,
            HealthPoller::new(health.clone()),
            runtime.clone(),
            Arc::new(FakeVcs),
            ManagerOptions {
                bind_host: "127.0.0.1".to_string(),
                default_container_port: 8000,
                health: health_check(),
            },
        ));

        Self {
            ledger,
            ports,
            runtime,
            health,
            manager,
        }
    }
}

pub fn start_request(service: &str, image_tag: &str, commit_sha: &str) -> StartDeployment {
    StartDeployment {
        service_name: service.to_string(),
        image_tag: image_tag.to_string(),
        commit_sha: commit_sha.to_string(),
        ..Default::default()
    }
}

pub fn draft(service: &str, commit_sha: &str, port: u16) -> NewDeployment {
    NewDeployment {
        service_name: service.to_string(),
        image_tag: format!("{}:{}", service, &commit_sha[..7]),
        commit_sha: commit_sha.to_string(),
        container_name: format!("{}-{}-p{}", service, &commit_sha[..7], port),
        host_port: port,
        container_port: 8000,
        ..Default::default()
    }
}
