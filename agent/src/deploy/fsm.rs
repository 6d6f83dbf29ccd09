//! Finite State Machine for a single rollback invocation

use serde::{Deserialize, Serialize};

/// Rollback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackState {
    /// Resolving the failed record and the record to restore
    Locating,

    /// Choosing a host port for the restored container
    Reserving,

    /// Starting the restored image and recording it
    Restoring,

    /// Health checking the restored deployment
    Verifying,

    /// Restored deployment is healthy
    Completed,

    /// Rollback gave up
    Aborted,
}

impl RollbackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RollbackState::Completed | RollbackState::Aborted)
    }
}

/// Rollback event
#[derive(Debug, Clone)]
pub enum RollbackEvent {
    /// Failed record and its known-good predecessor were found
    Located { failed_id: String, restore_id: String },

    /// The failed record was already rolled back
    AlreadyRestored { deployment_id: String },

    /// A host port was reserved
    PortReserved(u16),

    /// The restored container is running and recorded
    Restored { deployment_id: String },

    /// The restored deployment passed its health check
    Verified,

    /// The rollback cannot proceed
    Abort(String),
}

/// Rollback FSM
#[derive(Debug, Clone)]
pub struct RollbackFsm {
    state: RollbackState,
    failed_id: Option<String>,
    restore_id: Option<String>,
    port: Option<u16>,
    new_id: Option<String>,
    error: Option<String>,
    aborted_in: Option<RollbackState>,
}

impl RollbackFsm {
    /// Create a new FSM in locating state
    pub fn new() -> Self {
        Self {
            state: RollbackState::Locating,
            failed_id: None,
            restore_id: None,
            port: None,
            new_id: None,
            error: None,
            aborted_in: None,
        }
    }

    pub fn state(&self) -> RollbackState {
        self.state
    }

    pub fn failed_id(&self) -> Option<&str> {
        self.failed_id.as_deref()
    }

    pub fn restore_id(&self) -> Option<&str> {
        self.restore_id.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// ID of the rollback record, once restoring succeeded
    pub fn new_id(&self) -> Option<&str> {
        self.new_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// State the rollback was in when it aborted
    pub fn aborted_in(&self) -> Option<RollbackState> {
        self.aborted_in
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: RollbackEvent) -> Result<(), String> {
        let new_state = match (self.state, event) {
            (RollbackState::Locating, RollbackEvent::Located { failed_id, restore_id }) => {
                self.failed_id = Some(failed_id);
                self.restore_id = Some(restore_id);
                RollbackState::Reserving
            }
            (RollbackState::Locating, RollbackEvent::AlreadyRestored { deployment_id }) => {
                self.new_id = Some(deployment_id);
                RollbackState::Completed
            }

            (RollbackState::Reserving, RollbackEvent::PortReserved(port)) => {
                self.port = Some(port);
                RollbackState::Restoring
            }

            // Bind race lost, a fresh port was reserved
            (RollbackState::Restoring, RollbackEvent::PortReserved(port)) => {
                self.port = Some(port);
                RollbackState::Restoring
            }
            (RollbackState::Restoring, RollbackEvent::Restored { deployment_id }) => {
                self.new_id = Some(deployment_id);
                RollbackState::Verifying
            }

            (RollbackState::Verifying, RollbackEvent::Verified) => RollbackState::Completed,

            (state, RollbackEvent::Abort(reason)) if !state.is_terminal() => {
                self.error = Some(reason);
                self.aborted_in = Some(state);
                RollbackState::Aborted
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for RollbackFsm {
    fn default() -> Self {
        Self::new()
    }
}
