//! Deployment ledger unit tests

use std::sync::Arc;

use deploy_agent::errors::AgentError;
use deploy_agent::ledger::{FileStore, Ledger, MemoryStore};
use deploy_agent::models::deployment::DeploymentStatus;
use deploy_agent::storage::layout::StorageLayout;

use crate::common::{draft, SHA_A, SHA_B, SHA_C};

fn memory_ledger() -> Ledger {
    Ledger::new(Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn test_append_then_get() {
    let ledger = memory_ledger();
    let record = ledger.append(draft("api", SHA_A, 8000)).await.unwrap();

    assert_eq!(record.status, DeploymentStatus::Pending);
    assert!(record.deployment_id.starts_with("dep-api-"));

    let loaded = ledger.get(&record.deployment_id).await.unwrap();
    assert_eq!(loaded, record);
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let ledger = memory_ledger();
    let err = ledger.get("dep-api-missing").await.unwrap_err();
    assert!(matches!(err, AgentError::NotFound(_)));
}

#[tokio::test]
async fn test_history_is_ordered_by_creation() {
    let ledger = memory_ledger();
    let mut ids = Vec::new();
    for (sha, port) in [(SHA_A, 8000), (SHA_B, 8001), (SHA_C, 8002)] {
        let record = ledger.append(draft("api", sha, port)).await.unwrap();
        ledger
            .update_status(&record.deployment_id, DeploymentStatus::Failed)
            .await
            .unwrap();
        ids.push(record.deployment_id);
    }

    let history = ledger.history("api").await.unwrap();
    let history_ids: Vec<_> = history.iter().map(|r| r.deployment_id.clone()).collect();
    assert_eq!(history_ids, ids);
    assert!(history
        .windows(2)
        .all(|pair| pair[0].created_at < pair[1].created_at));
}

#[tokio::test]
async fn test_second_active_record_is_rejected() {
    let ledger = memory_ledger();
    let first = ledger.append(draft("api", SHA_A, 8000)).await.unwrap();

    let err = ledger.append(draft("api", SHA_B, 8001)).await.unwrap_err();
    match err {
        AgentError::ActiveDeployment { deployment_id, .. } => {
            assert_eq!(deployment_id, first.deployment_id)
        }
        other => panic!("unexpected error: {other}"),
    }

    // Other services are unaffected
    assert!(ledger.append(draft("web", SHA_B, 8001)).await.is_ok());
}

#[tokio::test]
async fn test_active_port_cannot_be_recorded_twice() {
    let ledger = memory_ledger();
    ledger.append(draft("api", SHA_A, 8000)).await.unwrap();

    let err = ledger.append(draft("web", SHA_B, 8000)).await.unwrap_err();
    assert!(matches!(err, AgentError::PortConflict { port: 8000 }));
}

#[tokio::test]
async fn test_status_transitions() {
    let ledger = memory_ledger();
    let record = ledger.append(draft("api", SHA_A, 8000)).await.unwrap();
    let id = record.deployment_id;

    let healthy = ledger
        .update_status(&id, DeploymentStatus::Healthy)
        .await
        .unwrap();
    assert_eq!(healthy.status, DeploymentStatus::Healthy);

    // healthy -> pending is not allowed
    let err = ledger
        .update_status(&id, DeploymentStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::InvalidTransition {
            from: DeploymentStatus::Healthy,
            to: DeploymentStatus::Pending,
            ..
        }
    ));

    ledger
        .update_status(&id, DeploymentStatus::Stopped)
        .await
        .unwrap();

    // stopped is terminal
    assert!(ledger
        .update_status(&id, DeploymentStatus::Healthy)
        .await
        .is_err());
    assert_eq!(
        ledger.get(&id).await.unwrap().status,
        DeploymentStatus::Stopped
    );
}

#[tokio::test]
async fn test_active_port_set_follows_statuses() {
    let ledger = memory_ledger();
    let api = ledger.append(draft("api", SHA_A, 8000)).await.unwrap();
    let web = ledger.append(draft("web", SHA_B, 8001)).await.unwrap();

    let ports = ledger.active_port_set().await.unwrap();
    assert!(ports.contains(&8000) && ports.contains(&8001));

    ledger
        .update_status(&api.deployment_id, DeploymentStatus::Failed)
        .await
        .unwrap();
    ledger
        .update_status(&web.deployment_id, DeploymentStatus::Healthy)
        .await
        .unwrap();

    let ports = ledger.active_port_set().await.unwrap();
    assert!(!ports.contains(&8000));
    assert!(ports.contains(&8001));
}

#[tokio::test]
async fn test_last_healthy_before() {
    let ledger = memory_ledger();

    let first = ledger.append(draft("api", SHA_A, 8000)).await.unwrap();
    ledger
        .update_status(&first.deployment_id, DeploymentStatus::Healthy)
        .await
        .unwrap();
    ledger
        .update_status(&first.deployment_id, DeploymentStatus::Stopped)
        .await
        .unwrap();

    let second = ledger.append(draft("api", SHA_B, 8001)).await.unwrap();
    ledger
        .update_status(&second.deployment_id, DeploymentStatus::Failed)
        .await
        .unwrap();

    let third = ledger.append(draft("api", SHA_C, 8002)).await.unwrap();
    ledger
        .update_status(&third.deployment_id, DeploymentStatus::Failed)
        .await
        .unwrap();

    // Stopped counts as known-good, failed records are skipped
    let found = ledger
        .last_healthy_before("api", &third.deployment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.deployment_id, first.deployment_id);

    // Nothing precedes the first record
    assert!(ledger
        .last_healthy_before("api", &first.deployment_id)
        .await
        .unwrap()
        .is_none());

    // The reference must belong to the service
    assert!(ledger
        .last_healthy_before("web", &third.deployment_id)
        .await
        .is_err());
}

#[tokio::test]
async fn test_latest_with_status_and_rollback_links() {
    let ledger = memory_ledger();
    let first = ledger.append(draft("api", SHA_A, 8000)).await.unwrap();
    ledger
        .update_status(&first.deployment_id, DeploymentStatus::Failed)
        .await
        .unwrap();
    let second = ledger.append(draft("api", SHA_B, 8001)).await.unwrap();
    ledger
        .update_status(&second.deployment_id, DeploymentStatus::Failed)
        .await
        .unwrap();

    let latest = ledger
        .latest_with_status("api", DeploymentStatus::Failed)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.deployment_id, second.deployment_id);
    assert!(ledger
        .latest_with_status("api", DeploymentStatus::Healthy)
        .await
        .unwrap()
        .is_none());

    let mut restore = draft("api", SHA_A, 8002);
    restore.original_deployment_id = Some(second.deployment_id.clone());
    let restored = ledger.append(restore).await.unwrap();

    let found = ledger.rollback_of(&second.deployment_id).await.unwrap();
    assert_eq!(found.map(|r| r.deployment_id), Some(restored.deployment_id));
    assert!(ledger
        .rollback_of(&first.deployment_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_orphaned_pending_and_services() {
    let ledger = memory_ledger();
    let api = ledger.append(draft("api", SHA_A, 8000)).await.unwrap();
    let web = ledger.append(draft("web", SHA_B, 8001)).await.unwrap();
    ledger
        .update_status(&web.deployment_id, DeploymentStatus::Healthy)
        .await
        .unwrap();

    let orphans = ledger.orphaned_pending().await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].deployment_id, api.deployment_id);

    let mut services = ledger.services().await.unwrap();
    services.sort();
    assert_eq!(services, vec!["api".to_string(), "web".to_string()]);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(tmp.path());
    layout.setup().await.unwrap();

    let id = {
        let ledger = Ledger::new(Arc::new(FileStore::from_layout(&layout)));
        let record = ledger.append(draft("api", SHA_A, 8000)).await.unwrap();
        ledger
            .update_status(&record.deployment_id, DeploymentStatus::Healthy)
            .await
            .unwrap();
        record.deployment_id
    };

    let reopened = Ledger::new(Arc::new(FileStore::from_layout(&layout)));
    let history = reopened.history("api").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].deployment_id, id);
    assert_eq!(history[0].status, DeploymentStatus::Healthy);
    assert!(reopened.active_port_set().await.unwrap().contains(&8000));
}
