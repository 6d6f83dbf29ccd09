//! Deployment ledger module

pub mod history;
pub mod store;

pub use history::{Ledger, ServiceGuard};
pub use store::{FileStore, MemoryStore, RecordStore};
