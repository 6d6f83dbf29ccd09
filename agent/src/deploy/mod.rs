//! Deployment module

pub mod docker;
pub mod fsm;
pub mod git;
pub mod manager;
pub mod project;
pub mod rollback;
pub mod runtime;

pub use manager::{BuildImage, DeploymentManager, HealthCheck, ManagerOptions, StartDeployment};
pub use rollback::RollbackTarget;
