//! Git working tree preparation

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::validation::validate_git_ref;

/// A checked-out working tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedRepository {
    pub workspace_path: PathBuf,
    pub commit_sha: String,
    pub reference: String,
    pub author: String,
    pub message: String,
}

/// Version control collaborator
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Clone or update `repo_url` at `reference` and report the commit
    async fn prepare(&self, repo_url: &str, reference: &str)
        -> Result<PreparedRepository, AgentError>;
}

/// Check scheme, host allow list and path shape of a repository URL
pub fn validate_repo_url(repo_url: &str, allowed_hosts: &[String]) -> Result<Url, AgentError> {
    let url = Url::parse(repo_url)
        .map_err(|e| AgentError::VcsError(format!("Invalid repository URL {}: {}", repo_url, e)))?;

    if url.scheme() != "https" {
        return Err(AgentError::VcsError(format!(
            "Repository URL must use https: {}",
            repo_url
        )));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(AgentError::VcsError(
            "Repository URL must not carry credentials".to_string(),
        ));
    }
    let host = url.host_str().unwrap_or_default();
    if !allowed_hosts.iter().any(|allowed| allowed == host) {
        return Err(AgentError::VcsError(format!(
            "Git host {} not in allowed list",
            host
        )));
    }
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    if segments.len() < 2 {
        return Err(AgentError::VcsError(format!(
            "Repository URL must name an owner and a repository: {}",
            repo_url
        )));
    }
    Ok(url)
}

/// Last path segment without `.git`, reduced to `[a-z0-9-]`
pub fn repo_name(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|s| s.filter(|p| !p.is_empty()).last())
        .unwrap_or("repo");
    last.trim_end_matches(".git")
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

fn ref_slug(reference: &str) -> String {
    reference.replace('/', "_")
}

/// Runs the `git` binary inside the agent's workspaces directory
pub struct GitCli {
    workspaces: Dir,
    allowed_hosts: Vec<String>,
    token: Option<SecretString>,
}

impl GitCli {
    pub fn new(workspaces: Dir, allowed_hosts: Vec<String>, token: Option<SecretString>) -> Self {
        Self {
            workspaces,
            allowed_hosts,
            token,
        }
    }

    pub fn workspace_path(&self, url: &Url, reference: &str) -> PathBuf {
        self.workspaces
            .subdir(&repo_name(url))
            .subdir(&ref_slug(reference))
            .path()
            .to_path_buf()
    }

    /// URL handed to git; carries the token for github.com only
    fn remote_url(&self, url: &Url) -> Result<SecretString, AgentError> {
        let mut remote = url.clone();
        if let (Some(token), Some("github.com")) = (&self.token, url.host_str()) {
            remote
                .set_username("x-access-token")
                .and_then(|_| remote.set_password(Some(token.expose_secret())))
                .map_err(|_| AgentError::VcsError("Could not attach credentials".to_string()))?;
        }
        Ok(SecretString::from(remote.to_string()))
    }

    async fn git(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, AgentError> {
        let verb = args.first().copied().unwrap_or("");
        let mut command = Command::new("git");
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        let output = command
            .env("GIT_TERMINAL_PROMPT", "0")
            .args(args)
            .output()
            .await
            .map_err(|e| AgentError::VcsError(format!("Failed to run git {}: {}", verb, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Never echo a remote URL back, it may contain the token
            let first_line = stderr
                .lines()
                .find(|l| !l.contains("x-access-token"))
                .unwrap_or("no output");
            return Err(AgentError::VcsError(format!("git {} failed: {}", verb, first_line)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn prepare(
        &self,
        repo_url: &str,
        reference: &str,
    ) -> Result<PreparedRepository, AgentError> {
        let url = validate_repo_url(repo_url, &self.allowed_hosts)?;
        validate_git_ref(reference).map_err(|e| AgentError::VcsError(e.to_string()))?;

        let path = self.workspace_path(&url, reference);
        let remote = self.remote_url(&url)?;
        let path_str = path.to_string_lossy().to_string();

        if path.join(".git").exists() {
            info!("Updating {} ({}) in {}", url, reference, path.display());
            self.git(
                Some(&path),
                &["fetch", "--depth", "1", remote.expose_secret(), reference],
            )
            .await?;
            self.git(Some(&path), &["checkout", "--force", "FETCH_HEAD"])
                .await?;
        } else {
            info!("Cloning {} ({}) into {}", url, reference, path.display());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            self.git(
                None,
                &[
                    "clone",
                    "--depth",
                    "1",
                    "--branch",
                    reference,
                    remote.expose_secret(),
                    &path_str,
                ],
            )
            .await?;
            // Keep the token out of .git/config
            self.git(Some(&path), &["remote", "set-url", "origin", url.as_str()])
                .await?;
        }

        let log = self
            .git(Some(&path), &["log", "-1", "--format=%H%n%an%n%s"])
            .await?;
        let mut lines = log.lines();
        let commit_sha = lines.next().unwrap_or_default().to_string();
        let author = lines.next().unwrap_or_default().to_string();
        let message = lines.next().unwrap_or_default().to_string();
        debug!("{} at {} is {}", url, reference, commit_sha);

        Ok(PreparedRepository {
            workspace_path: path,
            commit_sha,
            reference: reference.to_string(),
            author,
            message,
        })
    }
}
