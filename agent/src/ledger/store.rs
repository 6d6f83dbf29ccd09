//! Durable key-value storage for deployment records and service indexes

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::DeploymentRecord;
use crate::storage::layout::StorageLayout;

/// Storage backend of the ledger.
///
/// Every write must be atomic: a reader sees either the previous value or the
/// new one, never a partial write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put_record(&self, record: &DeploymentRecord) -> Result<(), AgentError>;

    async fn get_record(&self, deployment_id: &str)
        -> Result<Option<DeploymentRecord>, AgentError>;

    /// Ordered deployment IDs of a service, empty when unknown
    async fn get_index(&self, service_name: &str) -> Result<Vec<String>, AgentError>;

    async fn put_index(&self, service_name: &str, ids: &[String]) -> Result<(), AgentError>;

    async fn list_services(&self) -> Result<Vec<String>, AgentError>;
}

/// Keys end up as file names, so only a conservative charset is accepted
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Filesystem store: `records/<deployment_id>.json` and `index/<service>.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    records_dir: Dir,
    index_dir: Dir,
}

impl FileStore {
    pub fn new(records_dir: Dir, index_dir: Dir) -> Self {
        Self {
            records_dir,
            index_dir,
        }
    }

    pub fn from_layout(layout: &StorageLayout) -> Self {
        Self::new(layout.records_dir(), layout.index_dir())
    }

    fn record_file(&self, deployment_id: &str) -> File {
        self.records_dir.file(&format!("{}.json", deployment_id))
    }

    fn index_file(&self, service_name: &str) -> File {
        self.index_dir.file(&format!("{}.json", service_name))
    }

    fn check_key(operation: &'static str, key: &str) -> Result<(), AgentError> {
        if is_safe_key(key) {
            Ok(())
        } else {
            Err(AgentError::persistence(operation, key, "key contains unsupported characters"))
        }
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn put_record(&self, record: &DeploymentRecord) -> Result<(), AgentError> {
        let key = record.deployment_id.as_str();
        Self::check_key("write record", key)?;
        self.record_file(key)
            .write_json(record)
            .await
            .map_err(|e| AgentError::persistence("write record", key, e))?;
        debug!("Wrote record {} ({})", key, record.status);
        Ok(())
    }

    async fn get_record(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentRecord>, AgentError> {
        if !is_safe_key(deployment_id) {
            return Ok(None);
        }
        self.record_file(deployment_id)
            .read_json_opt()
            .await
            .map_err(|e| AgentError::persistence("read record", deployment_id, e))
    }

    async fn get_index(&self, service_name: &str) -> Result<Vec<String>, AgentError> {
        if !is_safe_key(service_name) {
            return Ok(Vec::new());
        }
        let ids = self
            .index_file(service_name)
            .read_json_opt()
            .await
            .map_err(|e| AgentError::persistence("read index", service_name, e))?;
        Ok(ids.unwrap_or_default())
    }

    async fn put_index(&self, service_name: &str, ids: &[String]) -> Result<(), AgentError> {
        Self::check_key("write index", service_name)?;
        self.index_file(service_name)
            .write_json(&ids)
            .await
            .map_err(|e| AgentError::persistence("write index", service_name, e))
    }

    async fn list_services(&self) -> Result<Vec<String>, AgentError> {
        let files = self
            .index_dir
            .list_files()
            .await
            .map_err(|e| AgentError::persistence("list services", "index", e))?;

        let services = files
            .iter()
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()))
            .map(str::to_string)
            .collect();
        Ok(services)
    }
}

/// Process-local store for tests and throwaway runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, DeploymentRecord>>,
    indexes: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put_record(&self, record: &DeploymentRecord) -> Result<(), AgentError> {
        self.records
            .write()
            .await
            .insert(record.deployment_id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentRecord>, AgentError> {
        Ok(self.records.read().await.get(deployment_id).cloned())
    }

    async fn get_index(&self, service_name: &str) -> Result<Vec<String>, AgentError> {
        Ok(self
            .indexes
            .read()
            .await
            .get(service_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_index(&self, service_name: &str, ids: &[String]) -> Result<(), AgentError> {
        self.indexes
            .write()
            .await
            .insert(service_name.to_string(), ids.to_vec());
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<String>, AgentError> {
        let mut services: Vec<String> = self.indexes.read().await.keys().cloned().collect();
        services.sort();
        Ok(services)
    }
}
