//! Wireless link to the LED controller.
//!
//! The controller exposes one writable characteristic; each message is a
//! single [`AlertLevel`](crate::alert::AlertLevel) byte with no
//! acknowledgment. [`LinkSupervisor`] owns the connection state machine and
//! [`AlertTransmitter`] performs the best-effort writes.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::config::LinkSettings;
use crate::error::PipelineError;

#[cfg(feature = "ble-btleplug")]
mod btle;
mod simulated;
mod supervisor;
mod transmitter;

#[cfg(feature = "ble-btleplug")]
pub use btle::BtleLink;
pub use simulated::{SimulatedLink, SimulatedPeer};
pub use supervisor::LinkSupervisor;
pub use transmitter::AlertTransmitter;

/// A connected session with one peer.
pub trait PeerSession: Send {
    fn is_connected(&self) -> bool;

    /// Write `bytes` to the characteristic identified by `target`.
    fn write(&mut self, target: &str, bytes: &[u8]) -> Result<(), PipelineError>;
}

/// Radio access: discovery and session establishment.
pub trait LinkBackend: Send {
    fn name(&self) -> &'static str;

    /// Addresses of peers seen during a scan of at most `duration`.
    fn scan(&mut self, duration: Duration) -> Result<Vec<String>, PipelineError>;

    fn connect(&mut self, address: &str) -> Result<Box<dyn PeerSession>, PipelineError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Outcome of a health check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Health {
    Ready,
    NotReady,
}

/// An established session and the peer it belongs to.
///
/// Handles are never repaired in place: a lost session is dropped and a new
/// handle is produced by the next successful connect.
pub struct LinkHandle {
    address: String,
    session: Box<dyn PeerSession>,
}

impl LinkHandle {
    pub fn new(address: impl Into<String>, session: Box<dyn PeerSession>) -> Self {
        Self {
            address: address.into(),
            session,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn write(&mut self, target: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        self.session.write(target, bytes)
    }
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Build the link backend named in the configuration.
///
/// `stub://...` selects the in-process simulated controller (`stub://absent`
/// starts with the peer out of range); `ble` selects the radio.
pub fn build_link_backend(settings: &LinkSettings) -> Result<Box<dyn LinkBackend>> {
    let backend = settings.backend.trim();
    if backend.starts_with("stub://") {
        return Ok(Box::new(SimulatedLink::from_url(backend, &settings.peer_address)));
    }
    match backend {
        "ble" | "btle" => build_btle(settings),
        other => Err(anyhow!("unknown link backend '{}'", other)),
    }
}

#[cfg(feature = "ble-btleplug")]
fn build_btle(settings: &LinkSettings) -> Result<Box<dyn LinkBackend>> {
    Ok(Box::new(BtleLink::new(&settings.service_uuid)?))
}

#[cfg(not(feature = "ble-btleplug"))]
fn build_btle(_settings: &LinkSettings) -> Result<Box<dyn LinkBackend>> {
    Err(anyhow!("ble link backend requires the ble-btleplug feature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_is_selected_by_url() {
        let settings = LinkSettings::default();
        let backend = build_link_backend(&settings).unwrap();
        assert_eq!(backend.name(), "simulated");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let settings = LinkSettings {
            backend: "zigbee".to_string(),
            ..LinkSettings::default()
        };
        assert!(build_link_backend(&settings).is_err());
    }

    #[cfg(not(feature = "ble-btleplug"))]
    #[test]
    fn ble_requires_feature() {
        let settings = LinkSettings {
            backend: "ble".to_string(),
            ..LinkSettings::default()
        };
        let err = build_link_backend(&settings).err().unwrap();
        assert!(err.to_string().contains("ble-btleplug"));
    }
}
