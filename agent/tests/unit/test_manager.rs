//! Deployment manager and rollback tests against faked collaborators

use std::sync::atomic::Ordering;

use deploy_agent::deploy::{BuildImage, RollbackTarget};
use deploy_agent::errors::AgentError;
use deploy_agent::models::deployment::{DeploymentRecord, DeploymentStatus};

use crate::common::{health_check, range, start_request, Harness, SHA_A, SHA_B, SHA_C};

/// Deploy and health check a revision of `api`
async fn deploy(
    harness: &Harness,
    image_tag: &str,
    commit_sha: &str,
    preferred_port: Option<u16>,
    healthy: bool,
) -> DeploymentRecord {
    let mut request = start_request("api", image_tag, commit_sha);
    request.preferred_port = preferred_port;
    let record = harness.manager.start_deployment(request).await.unwrap();

    harness
        .health
        .respond(record.host_port, if healthy { 200 } else { 503 });
    let result = harness
        .manager
        .check_health(&record.deployment_id, &health_check())
        .await
        .unwrap();
    assert_eq!(result.healthy, healthy);

    harness.ledger.get(&record.deployment_id).await.unwrap()
}

async fn active_count(harness: &Harness, service: &str) -> usize {
    harness
        .ledger
        .history(service)
        .await
        .unwrap()
        .iter()
        .filter(|r| r.is_active())
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_rollback_restores_last_healthy_deployment() {
    let harness = Harness::new(range(8000, 9000));

    let first = deploy(&harness, "api:1", SHA_A, None, true).await;
    assert_eq!(first.host_port, 8000);
    assert_eq!(first.status, DeploymentStatus::Healthy);

    let second = deploy(&harness, "api:2", SHA_B, Some(8001), false).await;
    assert_eq!(second.host_port, 8001);
    assert_eq!(second.status, DeploymentStatus::Failed);
    assert_eq!(
        second.previous_deployment_id.as_deref(),
        Some(first.deployment_id.as_str())
    );
    // The failed container still holds its port
    harness.ports.occupy(8001);

    // Deploying #2 stopped #1
    let first = harness.ledger.get(&first.deployment_id).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Stopped);

    let third = harness
        .manager
        .rollback(RollbackTarget::Service("api".to_string()))
        .await
        .unwrap();

    assert_eq!(third.status, DeploymentStatus::Healthy);
    assert_eq!(
        third.previous_deployment_id.as_deref(),
        Some(first.deployment_id.as_str())
    );
    assert_eq!(
        third.original_deployment_id.as_deref(),
        Some(second.deployment_id.as_str())
    );
    assert_ne!(third.host_port, 8001);
    assert_eq!(third.image_tag, "api:1");
    assert_eq!(third.commit_sha, SHA_A);
    assert!(third.container_name.starts_with("api-rollback-aaaaaaa-p"));
    assert!(third.is_rollback());

    let second = harness.ledger.get(&second.deployment_id).await.unwrap();
    assert_eq!(second.status, DeploymentStatus::RolledBack);
    assert!(harness
        .runtime
        .stopped_names()
        .contains(&second.container_name));
    assert_eq!(active_count(&harness, "api").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_rollback_returns_existing_record() {
    let harness = Harness::new(range(8000, 9000));
    deploy(&harness, "api:1", SHA_A, None, true).await;
    let failed = deploy(&harness, "api:2", SHA_B, Some(8001), false).await;

    let restored = harness
        .manager
        .rollback(RollbackTarget::Deployment(failed.deployment_id.clone()))
        .await
        .unwrap();
    let starts = harness.runtime.started_names().len();

    let again = harness
        .manager
        .rollback(RollbackTarget::Deployment(failed.deployment_id.clone()))
        .await
        .unwrap();
    let by_service = harness
        .manager
        .rollback(RollbackTarget::Service("api".to_string()))
        .await
        .unwrap();

    assert_eq!(again.deployment_id, restored.deployment_id);
    assert_eq!(by_service.deployment_id, restored.deployment_id);
    assert_eq!(harness.runtime.started_names().len(), starts);
    assert_eq!(harness.ledger.history("api").await.unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_rollback_is_reported() {
    let harness = Harness::new(range(8000, 9000));
    deploy(&harness, "api:1", SHA_A, None, true).await;
    let failed = deploy(&harness, "api:2", SHA_B, Some(8001), false).await;

    // The restored image no longer answers
    harness.health.respond(8000, 503);

    let err = harness
        .manager
        .rollback(RollbackTarget::Service("api".to_string()))
        .await
        .unwrap_err();
    let restored_id = match err {
        AgentError::RollbackHealthCheckFailed {
            ref deployment_id, ..
        } => deployment_id.clone(),
        other => panic!("unexpected error: {other}"),
    };
    assert!(!err.is_retryable());

    let restored = harness.ledger.get(&restored_id).await.unwrap();
    assert_eq!(restored.status, DeploymentStatus::Failed);
    let failed = harness.ledger.get(&failed.deployment_id).await.unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert_eq!(active_count(&harness, "api").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rollback_without_known_good_predecessor() {
    let harness = Harness::new(range(8000, 9000));
    let failed = deploy(&harness, "api:1", SHA_A, None, false).await;

    let err = harness
        .manager
        .rollback(RollbackTarget::Deployment(failed.deployment_id))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::NoRestorableDeployment { .. }));

    let err = harness
        .manager
        .rollback(RollbackTarget::Service("web".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn test_rollback_refuses_healthy_target_and_live_service() {
    let harness = Harness::new(range(8000, 9000));
    let first = deploy(&harness, "api:1", SHA_A, None, true).await;

    let err = harness
        .manager
        .rollback(RollbackTarget::Deployment(first.deployment_id.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::InvalidTransition { .. }));

    let failed = deploy(&harness, "api:2", SHA_B, None, false).await;
    deploy(&harness, "api:3", SHA_C, None, true).await;

    let err = harness
        .manager
        .rollback(RollbackTarget::Deployment(failed.deployment_id))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ActiveDeployment { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_rollback_supersedes_orphaned_pending() {
    let harness = Harness::new(range(8000, 9000));
    deploy(&harness, "api:1", SHA_A, None, true).await;
    deploy(&harness, "api:2", SHA_B, None, false).await;

    // Started but never checked
    let orphan = harness
        .manager
        .start_deployment(start_request("api", "api:3", SHA_C))
        .await
        .unwrap();
    harness.health.respond(8000, 200);

    let restored = harness
        .manager
        .rollback(RollbackTarget::Service("api".to_string()))
        .await
        .unwrap();
    assert_eq!(restored.status, DeploymentStatus::Healthy);

    let orphan_now = harness.ledger.get(&orphan.deployment_id).await.unwrap();
    assert_eq!(orphan_now.status, DeploymentStatus::Failed);
    assert!(harness
        .runtime
        .stopped_names()
        .contains(&orphan.container_name));
    assert_eq!(active_count(&harness, "api").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_active_record_per_service() {
    let harness = Harness::new(range(8000, 9000));

    for sha in [SHA_A, SHA_B, SHA_C] {
        harness
            .manager
            .start_deployment(start_request("api", "api:1", sha))
            .await
            .unwrap();
        assert_eq!(active_count(&harness, "api").await, 1);
    }

    let history = harness.ledger.history("api").await.unwrap();
    let statuses: Vec<_> = history.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            DeploymentStatus::Failed,
            DeploymentStatus::Failed,
            DeploymentStatus::Pending
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_deploys() {
    let harness = Harness::new(range(8000, 9000));
    let manager = &harness.manager;

    let (a, b) = tokio::join!(
        manager.start_deployment(start_request("api", "api:1", SHA_A)),
        manager.start_deployment(start_request("api", "api:2", SHA_B)),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(active_count(&harness, "api").await, 1);

    let (web, worker) = tokio::join!(
        manager.start_deployment(start_request("web", "web:1", SHA_A)),
        manager.start_deployment(start_request("worker", "worker:1", SHA_B)),
    );
    let (web, worker) = (web.unwrap(), worker.unwrap());
    assert_ne!(web.host_port, worker.host_port);

    let ports = harness.ledger.active_port_set().await.unwrap();
    assert_eq!(ports.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_lost_bind_race_is_retried_once() {
    let harness = Harness::new(range(8000, 9000));
    harness.runtime.bind_failures.store(1, Ordering::SeqCst);

    let record = harness
        .manager
        .start_deployment(start_request("api", "api:1", SHA_A))
        .await
        .unwrap();
    assert_eq!(record.status, DeploymentStatus::Pending);
    assert_eq!(harness.runtime.started_names().len(), 1);

    harness.runtime.bind_failures.store(2, Ordering::SeqCst);
    let err = harness
        .manager
        .start_deployment(start_request("web", "web:1", SHA_B))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::PortBindError { .. }));
    assert!(harness.ledger.history("web").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_records_nothing() {
    let harness = Harness::new(range(8000, 9000));
    harness
        .runtime
        .broken_images
        .lock()
        .unwrap()
        .insert("api:404".to_string());

    let err = harness
        .manager
        .start_deployment(start_request("api", "api:404", SHA_A))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ContainerRuntimeError(_)));
    assert!(harness.ledger.history("api").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_keeps_previous_deployment() {
    let harness = Harness::new(range(8000, 9000));
    let first = deploy(&harness, "api:1", SHA_A, None, true).await;
    harness
        .runtime
        .broken_images
        .lock()
        .unwrap()
        .insert("api:2".to_string());

    let err = harness
        .manager
        .start_deployment(start_request("api", "api:2", SHA_B))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ContainerRuntimeError(_)));

    let active = harness.ledger.active("api").await.unwrap().unwrap();
    assert_eq!(active.deployment_id, first.deployment_id);
    assert_eq!(active.status, DeploymentStatus::Healthy);
    assert!(harness.runtime.stopped_names().is_empty());
    assert_eq!(harness.ledger.history("api").await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_range_keeps_previous_deployment() {
    let harness = Harness::new(range(8000, 8001));
    let first = deploy(&harness, "api:1", SHA_A, None, true).await;

    let err = harness
        .manager
        .start_deployment(start_request("api", "api:2", SHA_B))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::PortRangeExhausted { .. }));

    let first = harness.ledger.get(&first.deployment_id).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Healthy);
    assert!(harness.runtime.stopped_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_new_deployment_starts_before_previous_stops() {
    let harness = Harness::new(range(8000, 9000));
    let first = deploy(&harness, "api:1", SHA_A, None, true).await;

    let second = harness
        .manager
        .start_deployment(start_request("api", "api:2", SHA_B))
        .await
        .unwrap();
    // Both containers were live while the new one started
    assert_eq!(second.host_port, 8001);
    assert_eq!(
        second.previous_deployment_id.as_deref(),
        Some(first.deployment_id.as_str())
    );
    let first = harness.ledger.get(&first.deployment_id).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Stopped);
    assert_eq!(harness.runtime.stopped_names(), vec![first.container_name]);
    assert_eq!(active_count(&harness, "api").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_redeploy_on_the_active_port() {
    let harness = Harness::new(range(8000, 9000));
    let first = deploy(&harness, "api:1", SHA_A, Some(8000), true).await;

    let second = harness
        .manager
        .start_deployment({
            let mut request = start_request("api", "api:2", SHA_B);
            request.preferred_port = Some(8000);
            request
        })
        .await
        .unwrap();
    assert_eq!(second.host_port, 8000);
    let first = harness.ledger.get(&first.deployment_id).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Stopped);
    assert_eq!(active_count(&harness, "api").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_requests_are_rejected() {
    let harness = Harness::new(range(8000, 9000));

    let cases = [
        start_request("API", "api:1", SHA_A),
        start_request("api", "api:1;rm -rf", SHA_A),
        start_request("api", "api:1", "not-a-sha"),
    ];
    for request in cases {
        let err = harness.manager.start_deployment(request).await.unwrap_err();
        assert!(matches!(err, AgentError::ValidationError(_)));
    }

    let mut request = start_request("api", "api:1", SHA_A);
    request.preferred_port = Some(80);
    assert!(harness.manager.start_deployment(request).await.is_err());

    assert!(harness.runtime.started_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_check_health_settles_pending_only() {
    let harness = Harness::new(range(8000, 9000));
    let record = harness
        .manager
        .start_deployment(start_request("api", "api:1", SHA_A))
        .await
        .unwrap();

    let result = harness
        .manager
        .check_health(&record.deployment_id, &health_check())
        .await
        .unwrap();
    assert!(!result.healthy);
    assert!(result.attempts > 1);
    assert_eq!(result.error.as_deref(), Some("connection refused"));
    assert_eq!(
        harness.ledger.get(&record.deployment_id).await.unwrap().status,
        DeploymentStatus::Failed
    );

    // A later healthy probe does not resurrect a failed record
    harness.health.respond(record.host_port, 200);
    let result = harness
        .manager
        .check_health(&record.deployment_id, &health_check())
        .await
        .unwrap();
    assert!(result.healthy);
    assert_eq!(
        harness.ledger.get(&record.deployment_id).await.unwrap().status,
        DeploymentStatus::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_deployment() {
    let harness = Harness::new(range(8000, 9000));
    let record = deploy(&harness, "api:1", SHA_A, None, true).await;

    let stopped = harness
        .manager
        .stop_deployment(&record.deployment_id)
        .await
        .unwrap();
    assert_eq!(stopped.status, DeploymentStatus::Stopped);
    assert!(harness
        .runtime
        .stopped_names()
        .contains(&record.container_name));

    let err = harness
        .manager
        .stop_deployment(&record.deployment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::InvalidTransition { .. }));

    // Polling a stopped deployment reports the dead container
    harness.health.respond(record.host_port, 503);
    let result = harness
        .manager
        .check_health(&record.deployment_id, &health_check())
        .await
        .unwrap();
    assert!(!result.healthy);
    assert!(result.message.contains("is not running"));

    let pending = harness
        .manager
        .start_deployment(start_request("api", "api:2", SHA_B))
        .await
        .unwrap();
    let stopped = harness
        .manager
        .stop_deployment(&pending.deployment_id)
        .await
        .unwrap();
    assert_eq!(stopped.status, DeploymentStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_container_logs() {
    let harness = Harness::new(range(8000, 9000));
    let record = harness
        .manager
        .start_deployment(start_request("api", "api:1", SHA_A))
        .await
        .unwrap();

    let logs = harness
        .manager
        .container_logs(&record.deployment_id, Some(5000))
        .await
        .unwrap();
    assert_eq!(logs, format!("{} last 1000 lines", record.container_name));

    let logs = harness
        .manager
        .container_logs(&record.container_name, None)
        .await
        .unwrap();
    assert!(logs.ends_with("last 100 lines"));

    assert!(harness
        .manager
        .container_logs("dep-api-missing", None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_build_image_checks_dockerfile() {
    let harness = Harness::new(range(8000, 9000));
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("Dockerfile"), "FROM scratch\n").unwrap();

    let image = harness
        .manager
        .build_image(BuildImage {
            context_path: tmp.path().to_path_buf(),
            tag: "api".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(image.tag, "api:latest");

    let err = harness
        .manager
        .build_image(BuildImage {
            context_path: tmp.path().to_path_buf(),
            tag: "api:1".to_string(),
            dockerfile: Some("../Dockerfile".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ValidationError(_)));
}
