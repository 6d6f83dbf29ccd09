//! Project type detection from repository markers

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AgentError;

const COMPOSE_FILES: &[&str] = &["docker-compose.yml", "docker-compose.yaml", "compose.yml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    DockerCompose,
    Docker,
    Nodejs,
    Python,
    Go,
    Rust,
    Unknown,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::DockerCompose => "docker-compose",
            ProjectType::Docker => "docker",
            ProjectType::Nodejs => "nodejs",
            ProjectType::Python => "python",
            ProjectType::Go => "go",
            ProjectType::Rust => "rust",
            ProjectType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection rules in priority order
const RULES: &[(&[&str], ProjectType)] = &[
    (COMPOSE_FILES, ProjectType::DockerCompose),
    (&["Dockerfile"], ProjectType::Docker),
    (&["package.json"], ProjectType::Nodejs),
    (&["requirements.txt", "pyproject.toml", "setup.py"], ProjectType::Python),
    (&["go.mod"], ProjectType::Go),
    (&["Cargo.toml"], ProjectType::Rust),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_type: ProjectType,
    pub dockerfile_path: Option<String>,
    pub compose_file: Option<String>,
    pub exposed_ports: Vec<u16>,
    pub has_docker: bool,
    pub has_compose: bool,
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

/// Detect the build system of a checked-out repository
pub async fn detect_project_type(repo_path: &Path) -> Result<ProjectInfo, AgentError> {
    if !exists(repo_path).await {
        return Err(AgentError::NotFound(format!(
            "Repository path {}",
            repo_path.display()
        )));
    }

    let mut project_type = ProjectType::Unknown;
    let mut marker_found = None;
    'rules: for (markers, kind) in RULES {
        for marker in markers.iter() {
            if exists(&repo_path.join(marker)).await {
                project_type = *kind;
                marker_found = Some(marker.to_string());
                break 'rules;
            }
        }
    }

    let mut info = ProjectInfo {
        project_type,
        dockerfile_path: None,
        compose_file: None,
        exposed_ports: Vec::new(),
        has_docker: exists(&repo_path.join("Dockerfile")).await,
        has_compose: false,
    };
    for compose in COMPOSE_FILES {
        if exists(&repo_path.join(compose)).await {
            info.has_compose = true;
            break;
        }
    }

    match project_type {
        ProjectType::DockerCompose => info.compose_file = marker_found,
        ProjectType::Docker => {
            match tokio::fs::read_to_string(repo_path.join("Dockerfile")).await {
                Ok(contents) => info.exposed_ports = parse_exposed_ports(&contents),
                Err(e) => warn!("Failed to read Dockerfile in {}: {}", repo_path.display(), e),
            }
            info.dockerfile_path = marker_found;
        }
        _ => {}
    }

    info!("Detected {:?} project in {}", project_type, repo_path.display());
    Ok(info)
}

/// Ports named by `EXPOSE` instructions, protocol suffixes dropped
pub fn parse_exposed_ports(dockerfile: &str) -> Vec<u16> {
    dockerfile
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.get(..6)
                .map(|kw| kw.eq_ignore_ascii_case("EXPOSE"))
                .unwrap_or(false)
        })
        .flat_map(|line| line.split_whitespace().skip(1))
        .filter_map(|part| part.split('/').next()?.parse().ok())
        .collect()
}
