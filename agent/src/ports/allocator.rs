//! Host port allocation

use std::net::TcpListener;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::errors::AgentError;
use crate::ledger::Ledger;
use crate::storage::settings::PortRangeSettings;

/// OS-level port availability check
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Checks availability by binding a listener.
///
/// A port counts as free only if both the bind host and the wildcard address
/// accept a bind; some platforms let the specific address bind while the
/// wildcard one is taken.
#[derive(Debug, Clone)]
pub struct OsPortProbe {
    bind_host: String,
}

impl OsPortProbe {
    pub fn new(bind_host: impl Into<String>) -> Self {
        Self {
            bind_host: bind_host.into(),
        }
    }
}

impl Default for OsPortProbe {
    fn default() -> Self {
        Self::new("127.0.0.1")
    }
}

impl PortProbe for OsPortProbe {
    fn is_free(&self, port: u16) -> bool {
        // Listeners are dropped between binds so they don't block each other
        let host_free = TcpListener::bind((self.bind_host.as_str(), port)).is_ok();
        if !host_free {
            return false;
        }
        TcpListener::bind(("0.0.0.0", port)).is_ok()
    }
}

/// A chosen port plus the process-wide allocation lock.
///
/// While the reservation is alive no other allocation can run, so the caller
/// can start the container and record the port in the ledger before anyone
/// else scans the range.
pub struct PortReservation {
    port: u16,
    _guard: OwnedMutexGuard<()>,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Debug for PortReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortReservation")
            .field("port", &self.port)
            .finish()
    }
}

/// Assigns host ports from a half-open range, skipping ports held by active
/// ledger records and ports bound at the OS level.
pub struct PortAllocator {
    ledger: Arc<Ledger>,
    probe: Arc<dyn PortProbe>,
    range: PortRangeSettings,
    lock: Arc<Mutex<()>>,
}

impl PortAllocator {
    pub fn new(ledger: Arc<Ledger>, probe: Arc<dyn PortProbe>, range: PortRangeSettings) -> Self {
        Self {
            ledger,
            probe,
            range,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Choose a port and keep the allocation lock until the reservation drops.
    ///
    /// With a preference the preferred port is returned or `PortConflict` is
    /// raised. Without one the range is scanned in ascending order and the
    /// first free port wins.
    pub async fn reserve(&self, preferred: Option<u16>) -> Result<PortReservation, AgentError> {
        let guard = self.lock.clone().lock_owned().await;
        let active = self.ledger.active_port_set().await?;

        let port = match preferred {
            Some(port) => {
                if active.contains(&port) || !self.probe.is_free(port) {
                    return Err(AgentError::PortConflict { port });
                }
                port
            }
            None => {
                let found = (self.range.start..self.range.end)
                    .filter(|port| !active.contains(port))
                    .find(|port| self.probe.is_free(*port));
                match found {
                    Some(port) => port,
                    None => {
                        return Err(AgentError::PortRangeExhausted {
                            start: self.range.start,
                            end: self.range.end,
                        })
                    }
                }
            }
        };

        debug!("Reserved port {} (preferred: {:?})", port, preferred);
        Ok(PortReservation {
            port,
            _guard: guard,
        })
    }

    /// Choose a port and release the allocation lock immediately
    pub async fn allocate(&self, preferred: Option<u16>) -> Result<u16, AgentError> {
        let reservation = self.reserve(preferred).await?;
        Ok(reservation.port())
    }
}
