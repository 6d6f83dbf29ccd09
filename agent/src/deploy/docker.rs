//! Docker CLI container runtime

use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::runtime::{
    BuildRequest, BuiltImage, ContainerRuntime, ContainerSpec, StartedContainer, MANAGED_BY_LABEL,
};
use crate::errors::AgentError;

/// Runs containers through the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    bind_host: String,
    memory_limit: String,
}

impl DockerCli {
    pub fn new(bind_host: impl Into<String>, memory_limit: impl Into<String>) -> Self {
        Self {
            bind_host: bind_host.into(),
            memory_limit: memory_limit.into(),
        }
    }

    async fn docker(&self, args: &[String]) -> Result<Output, AgentError> {
        let verb = args.first().map(String::as_str).unwrap_or("");
        Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| {
                AgentError::ContainerRuntimeError(format!("Failed to run docker {}: {}", verb, e))
            })
    }

    /// Arguments of `docker run` for a spec
    pub fn run_args(&self, spec: &ContainerSpec) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            spec.container_name.clone(),
            "-p".into(),
            format!("{}:{}:{}/tcp", self.bind_host, spec.host_port, spec.container_port),
            "--memory".into(),
            self.memory_limit.clone(),
            "--security-opt".into(),
            "no-new-privileges:true".into(),
            "--restart".into(),
            "unless-stopped".into(),
            "--label".into(),
            MANAGED_BY_LABEL.into(),
            "--label".into(),
            format!("app={}", spec.container_name),
        ];
        for (key, value) in spec.forwarded_env() {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(spec.image_tag.clone());
        args
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.to_lowercase().contains("no such container")
}

/// Map a failed `docker run` to the error the manager acts on
pub fn classify_run_failure(spec: &ContainerSpec, stderr: &str) -> AgentError {
    let lower = stderr.to_lowercase();
    if lower.contains("port is already allocated") || lower.contains("address already in use") {
        AgentError::PortBindError {
            port: spec.host_port,
            container_name: spec.container_name.clone(),
        }
    } else {
        AgentError::ContainerRuntimeError(format!(
            "Failed to start container {} from {}: {}",
            spec.container_name, spec.image_tag, stderr
        ))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn start(&self, spec: &ContainerSpec) -> Result<StartedContainer, AgentError> {
        // A leftover container with the same name would make run fail
        debug!("Removing stale container: {}", spec.container_name);
        let _ = self
            .docker(&["rm".into(), "-f".into(), spec.container_name.clone()])
            .await;

        info!(
            "Starting container {} from {} on {}:{}",
            spec.container_name, spec.image_tag, self.bind_host, spec.host_port
        );
        let output = self.docker(&self.run_args(spec)).await?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            // Don't leave a created-but-unstarted container behind
            let _ = self
                .docker(&["rm".into(), "-f".into(), spec.container_name.clone()])
                .await;
            return Err(classify_run_failure(spec, &stderr));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Started container {} ({})", spec.container_name, container_id);
        Ok(StartedContainer { container_id })
    }

    async fn stop(&self, container_name: &str) -> Result<(), AgentError> {
        debug!("Stopping container: {}", container_name);
        let output = self.docker(&["stop".into(), container_name.into()]).await?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_missing_container(&stderr) {
                debug!("Container {} already gone", container_name);
                return Ok(());
            }
            return Err(AgentError::ContainerRuntimeError(format!(
                "Failed to stop container {}: {}",
                container_name, stderr
            )));
        }

        let output = self.docker(&["rm".into(), container_name.into()]).await?;
        if !output.status.success() && !is_missing_container(&stderr_of(&output)) {
            warn!(
                "Stopped container {} but could not remove it: {}",
                container_name,
                stderr_of(&output)
            );
        }
        info!("Stopped container {}", container_name);
        Ok(())
    }

    async fn logs(&self, container_name: &str, tail: u32) -> Result<String, AgentError> {
        let output = self
            .docker(&[
                "logs".into(),
                "--timestamps".into(),
                "--tail".into(),
                tail.to_string(),
                container_name.into(),
            ])
            .await?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_missing_container(&stderr) {
                return Err(AgentError::NotFound(format!("Container {}", container_name)));
            }
            return Err(AgentError::ContainerRuntimeError(format!(
                "Failed to read logs of {}: {}",
                container_name, stderr
            )));
        }

        // docker logs replays the container's stderr on its own stderr
        let mut logs = String::from_utf8_lossy(&output.stdout).to_string();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    async fn is_running(&self, container_name: &str) -> Result<bool, AgentError> {
        let output = self
            .docker(&[
                "inspect".into(),
                "-f".into(),
                "{{.State.Running}}".into(),
                container_name.into(),
            ])
            .await?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_missing_container(&stderr) || stderr.to_lowercase().contains("no such object") {
                return Ok(false);
            }
            return Err(AgentError::ContainerRuntimeError(format!(
                "Failed to inspect {}: {}",
                container_name, stderr
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, AgentError> {
        let mut args: Vec<String> = vec!["build".into(), "-t".into(), request.tag.clone()];
        if let Some(dockerfile) = &request.dockerfile {
            args.push("-f".into());
            args.push(dockerfile.to_string_lossy().to_string());
        }
        for (key, value) in &request.build_args {
            args.push("--build-arg".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(request.context_path.to_string_lossy().to_string());

        info!("Building image {} from {}", request.tag, request.context_path.display());
        let output = self.docker(&args).await.map_err(|e| AgentError::BuildError(e.to_string()))?;
        let mut build_logs = String::from_utf8_lossy(&output.stdout).to_string();
        build_logs.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(AgentError::BuildError(format!(
                "docker build failed for {}: {}",
                request.tag,
                build_logs.lines().last().unwrap_or("no output")
            )));
        }

        let output = self
            .docker(&[
                "image".into(),
                "inspect".into(),
                "-f".into(),
                "{{.Id}} {{.Size}}".into(),
                request.tag.clone(),
            ])
            .await?;
        if !output.status.success() {
            return Err(AgentError::BuildError(format!(
                "Built image {} could not be inspected: {}",
                request.tag,
                stderr_of(&output)
            )));
        }
        let inspect = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let mut parts = inspect.split_whitespace();
        let image_id = parts.next().unwrap_or_default().to_string();
        let size_bytes = parts.next().and_then(|s| s.parse().ok());

        info!("Built image {} ({})", request.tag, image_id);
        Ok(BuiltImage {
            image_id,
            tag: request.tag.clone(),
            build_logs,
            size_bytes,
        })
    }
}
