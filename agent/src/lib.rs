//! Deploy Agent Library
//!
//! Deployment lifecycle management for a single container host: an
//! append-only deployment ledger, host port allocation, HTTP health polling
//! and automatic rollback to the last known-good deployment.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod ledger;
pub mod logs;
pub mod models;
pub mod ports;
pub mod server;
pub mod storage;
pub mod utils;
pub mod validation;
