//! Health polling module

pub mod poller;

pub use poller::{HealthPoller, HttpProbe, PollOptions, Probe};
