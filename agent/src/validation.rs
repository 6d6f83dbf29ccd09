//! Input validation for caller-supplied names, refs and environment

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::errors::AgentError;

pub const MAX_SERVICE_NAME_LEN: usize = 32;
pub const MAX_CONTAINER_NAME_LEN: usize = 63;
pub const MIN_PORT: u16 = 1024;
pub const MAX_LOG_TAIL: u32 = 1000;

fn invalid(message: String) -> AgentError {
    AgentError::ValidationError(message)
}

/// Service names: lowercase letters, digits and hyphens, starting with a
/// letter or digit
pub fn validate_service_name(name: &str) -> Result<(), AgentError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_start = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);

    if !valid_chars || !valid_start {
        return Err(invalid(format!("Invalid service name: {:?}", name)));
    }
    if name.len() > MAX_SERVICE_NAME_LEN {
        return Err(invalid(format!(
            "Service name too long (max {} characters): {}",
            MAX_SERVICE_NAME_LEN, name
        )));
    }
    Ok(())
}

pub fn validate_container_name(name: &str) -> Result<(), AgentError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if !valid_start || !valid_rest || name.len() < 2 {
        return Err(invalid(format!("Invalid container name: {:?}", name)));
    }
    if name.len() > MAX_CONTAINER_NAME_LEN {
        return Err(invalid(format!(
            "Container name too long (max {} characters): {}",
            MAX_CONTAINER_NAME_LEN, name
        )));
    }
    Ok(())
}

/// Validate `name[:version]` and return it with the version made explicit
pub fn validate_image_tag(tag: &str) -> Result<String, AgentError> {
    let (name, version) = tag.split_once(':').unwrap_or((tag, "latest"));

    let name_ok = name
        .chars()
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false)
        && name.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/')
        });
    if !name_ok {
        return Err(invalid(format!("Invalid image name: {:?}", name)));
    }

    let version_ok = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !version_ok {
        return Err(invalid(format!("Invalid image version: {:?}", version)));
    }

    Ok(format!("{}:{}", name, version))
}

/// Hex commit identifier of 7 to 40 characters, returned lowercased
pub fn validate_commit_sha(sha: &str) -> Result<String, AgentError> {
    if !(7..=40).contains(&sha.len()) || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid(format!("Invalid commit sha: {:?}", sha)));
    }
    Ok(sha.to_ascii_lowercase())
}

pub fn validate_port(port: u16) -> Result<(), AgentError> {
    if port < MIN_PORT {
        return Err(invalid(format!(
            "Port must be between {} and 65535, got {}",
            MIN_PORT, port
        )));
    }
    Ok(())
}

/// Branch, tag or ref name
pub fn validate_git_ref(reference: &str) -> Result<(), AgentError> {
    let valid_chars = !reference.is_empty()
        && reference.len() <= 255
        && reference
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
    if !valid_chars {
        return Err(invalid(format!("Invalid branch name: {:?}", reference)));
    }
    if reference.contains("..") {
        return Err(invalid("Branch name cannot contain '..'".to_string()));
    }
    // Would be read as an option by git
    if reference.starts_with('-') {
        return Err(invalid("Branch name cannot start with '-'".to_string()));
    }
    Ok(())
}

/// Names must look like `UPPER_SNAKE`; values may not carry shell
/// metacharacters
pub fn validate_env_vars(env: &BTreeMap<String, String>) -> Result<(), AgentError> {
    for (key, value) in env {
        let valid_key = key
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase() || c == '_')
            .unwrap_or(false)
            && key
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        if !valid_key {
            return Err(invalid(format!("Invalid environment variable name: {}", key)));
        }
        if value.chars().any(|c| matches!(c, ';' | '&' | '|' | '`' | '$')) {
            return Err(invalid(format!(
                "Environment variable contains dangerous characters: {}",
                key
            )));
        }
    }
    Ok(())
}

/// Deployment IDs as produced by the ledger
pub fn validate_deployment_id(deployment_id: &str) -> Result<(), AgentError> {
    let valid = deployment_id.starts_with("dep-")
        && deployment_id.len() <= 128
        && deployment_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(invalid(format!("Invalid deployment ID: {:?}", deployment_id)));
    }
    Ok(())
}

/// Resolve a Dockerfile path relative to `base_dir`, refusing anything that
/// escapes it
pub async fn validate_dockerfile_path(path: &str, base_dir: &Path) -> Result<PathBuf, AgentError> {
    let relative = Path::new(path);
    let lexically_safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !lexically_safe {
        return Err(invalid(format!(
            "Dockerfile path is outside repository directory: {}",
            path
        )));
    }

    let base = tokio::fs::canonicalize(base_dir)
        .await
        .map_err(|e| invalid(format!("Build context {} not found: {}", base_dir.display(), e)))?;
    let resolved = tokio::fs::canonicalize(base.join(relative))
        .await
        .map_err(|_| invalid(format!("Dockerfile not found: {}", path)))?;

    // Symlinks may still point outside
    if !resolved.starts_with(&base) {
        return Err(invalid(format!(
            "Dockerfile path is outside repository directory: {}",
            path
        )));
    }
    if !tokio::fs::metadata(&resolved).await?.is_file() {
        return Err(invalid(format!("Dockerfile path is not a file: {}", path)));
    }
    Ok(resolved)
}

/// Clamp a requested log tail to `1..=1000`
pub fn clamp_tail(tail: Option<u32>) -> u32 {
    tail.unwrap_or(100).clamp(1, MAX_LOG_TAIL)
}
