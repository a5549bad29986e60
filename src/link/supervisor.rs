use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::{Health, LinkBackend, LinkHandle, LinkState};
use crate::alert::AlertLevel;
use crate::config::LinkSettings;
use crate::error::PipelineError;

/// Keeps a session with the configured peer alive.
///
/// `Disconnected --connect--> Connecting --> Connected | Disconnected`.
/// A connect is blocking: it scans for the configured duration, connects to
/// the matching peer and primes the session with the GREEN byte.
pub struct LinkSupervisor {
    backend: Box<dyn LinkBackend>,
    settings: LinkSettings,
    state: LinkState,
    last_health_check: Instant,
}

impl LinkSupervisor {
    pub fn new(backend: Box<dyn LinkBackend>, settings: &LinkSettings) -> Self {
        Self {
            backend,
            settings: settings.clone(),
            state: LinkState::Disconnected,
            last_health_check: Instant::now(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Record that the session was dropped outside a health check, e.g. after
    /// a failed alert write. The next due check reconnects.
    pub fn mark_lost(&mut self) {
        if self.state != LinkState::Disconnected {
            log::warn!("session with {} marked lost", self.settings.peer_address);
        }
        self.state = LinkState::Disconnected;
    }

    /// One scan and connect attempt. On failure the state is left
    /// `Disconnected` and the call may simply be repeated.
    pub fn connect(&mut self) -> Result<LinkHandle, PipelineError> {
        self.state = LinkState::Connecting;
        let result = self.establish();
        self.state = match &result {
            Ok(_) => LinkState::Connected,
            Err(_) => LinkState::Disconnected,
        };
        result
    }

    fn establish(&mut self) -> Result<LinkHandle, PipelineError> {
        let target = self.settings.peer_address.clone();
        let seen = self.backend.scan(self.settings.scan_duration)?;
        if !seen.iter().any(|address| address.eq_ignore_ascii_case(&target)) {
            return Err(PipelineError::LinkConnect {
                message: format!(
                    "peer {} not found ({} device(s) seen in {:?})",
                    target,
                    seen.len(),
                    self.settings.scan_duration
                ),
            });
        }

        let session = self.backend.connect(&target)?;
        let mut handle = LinkHandle::new(target, session);
        handle
            .write(
                &self.settings.characteristic_uuid,
                &[AlertLevel::Green.as_byte()],
            )
            .map_err(|e| PipelineError::LinkConnect {
                message: format!("priming write failed: {}", e),
            })?;
        log::info!(
            "connected to {} via {} backend",
            handle.address(),
            self.backend.name()
        );
        Ok(handle)
    }

    /// Ready when `handle` holds a live session. Otherwise the stale handle
    /// is discarded, one reconnect is attempted, and `NotReady` is reported
    /// whatever its outcome.
    pub fn check_health(&mut self, handle: &mut Option<LinkHandle>) -> Health {
        self.last_health_check = Instant::now();
        if handle.as_ref().is_some_and(LinkHandle::is_connected) {
            self.state = LinkState::Connected;
            return Health::Ready;
        }

        if handle.take().is_some() {
            log::warn!("link to {} lost; reconnecting", self.settings.peer_address);
        }
        match self.connect() {
            Ok(fresh) => *handle = Some(fresh),
            Err(e) => log::warn!("reconnect failed: {}", e),
        }
        Health::NotReady
    }

    /// Run [`check_health`](Self::check_health) if the configured interval
    /// has elapsed since the previous check.
    pub fn poll_health(&mut self, handle: &mut Option<LinkHandle>, now: Instant) -> Option<Health> {
        if now.saturating_duration_since(self.last_health_check) < self.settings.health_interval {
            return None;
        }
        Some(self.check_health(handle))
    }

    /// Startup loop: connect until a session is established, the configured
    /// attempt bound is reached, or `shutdown` is raised. The flag is only
    /// observed between attempts.
    ///
    /// Without a bound this blocks for as long as the peer stays absent.
    pub fn connect_until_ready(&mut self, shutdown: &AtomicBool) -> Option<LinkHandle> {
        let mut attempts = 0u32;
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return None;
            }
            attempts += 1;
            match self.connect() {
                Ok(handle) => {
                    self.last_health_check = Instant::now();
                    return Some(handle);
                }
                Err(e) => log::warn!("connect attempt {} failed: {}", attempts, e),
            }
            if let Some(limit) = self.settings.connect_attempts {
                if attempts >= limit {
                    log::error!(
                        "giving up on {} after {} attempt(s); health checks will keep retrying",
                        self.settings.peer_address,
                        attempts
                    );
                    self.last_health_check = Instant::now();
                    return None;
                }
            }
            if !self.settings.retry_delay.is_zero() {
                std::thread::sleep(self.settings.retry_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SimulatedLink;
    use std::time::Duration;

    fn supervisor(in_range: bool) -> (LinkSupervisor, crate::link::SimulatedPeer) {
        let settings = LinkSettings::default();
        let link = SimulatedLink::new(settings.peer_address.clone(), in_range);
        let peer = link.peer();
        (LinkSupervisor::new(Box::new(link), &settings), peer)
    }

    #[test]
    fn starts_disconnected() {
        let (sup, _) = supervisor(true);
        assert_eq!(sup.state(), LinkState::Disconnected);
    }

    #[test]
    fn connect_primes_with_green() {
        let (mut sup, peer) = supervisor(true);
        let handle = sup.connect().unwrap();
        assert_eq!(sup.state(), LinkState::Connected);
        assert!(handle.is_connected());
        assert_eq!(peer.written_bytes(), vec![3]);
        assert_eq!(peer.writes()[0].0, sup.settings().characteristic_uuid);
    }

    #[test]
    fn connect_without_peer_is_retriable() {
        let (mut sup, peer) = supervisor(false);
        for _ in 0..3 {
            let err = sup.connect().unwrap_err();
            assert_eq!(err.code(), "LINK_CONNECT_FAILED");
            assert_eq!(sup.state(), LinkState::Disconnected);
        }
        peer.set_in_range(true);
        assert!(sup.connect().is_ok());
        assert_eq!(peer.scans(), 4);
    }

    #[test]
    fn failed_priming_write_is_a_connect_failure() {
        let (mut sup, peer) = supervisor(true);
        peer.set_fail_writes(true);
        assert!(sup.connect().is_err());
        assert_eq!(sup.state(), LinkState::Disconnected);
    }

    #[test]
    fn healthy_handle_is_ready_without_side_effects() {
        let (mut sup, peer) = supervisor(true);
        let mut handle = Some(sup.connect().unwrap());
        assert_eq!(sup.check_health(&mut handle), Health::Ready);
        assert_eq!(peer.connects(), 1);
        assert_eq!(peer.scans(), 1);
    }

    #[test]
    fn lost_handle_is_replaced() {
        let (mut sup, peer) = supervisor(true);
        let mut handle = Some(sup.connect().unwrap());
        peer.drop_connection();
        assert_eq!(sup.check_health(&mut handle), Health::NotReady);
        assert!(handle.as_ref().unwrap().is_connected());
        assert_eq!(peer.connects(), 2);
        assert_eq!(sup.check_health(&mut handle), Health::Ready);
    }

    #[test]
    fn absent_handle_stays_absent_when_peer_is_gone() {
        let (mut sup, _) = supervisor(false);
        let mut handle = None;
        assert_eq!(sup.check_health(&mut handle), Health::NotReady);
        assert!(handle.is_none());
    }

    #[test]
    fn poll_health_respects_interval() {
        let (mut sup, peer) = supervisor(false);
        let mut handle = None;
        let start = Instant::now();
        sup.last_health_check = start;
        assert_eq!(sup.poll_health(&mut handle, start + Duration::from_millis(4_999)), None);
        assert_eq!(peer.scans(), 0);
        assert_eq!(
            sup.poll_health(&mut handle, start + Duration::from_millis(5_000)),
            Some(Health::NotReady)
        );
        assert_eq!(peer.scans(), 1);
    }

    #[test]
    fn marked_lost_session_reconnects_on_next_check() {
        let (mut sup, peer) = supervisor(true);
        let _ = sup.connect().unwrap();
        sup.mark_lost();
        assert_eq!(sup.state(), LinkState::Disconnected);

        let mut handle = None;
        assert_eq!(sup.check_health(&mut handle), Health::NotReady);
        assert_eq!(sup.state(), LinkState::Connected);
        assert!(handle.is_some());
        assert_eq!(peer.connects(), 2);
    }

    #[test]
    fn bounded_startup_gives_up() {
        let settings = LinkSettings {
            connect_attempts: Some(3),
            ..LinkSettings::default()
        };
        let link = SimulatedLink::new(settings.peer_address.clone(), false);
        let peer = link.peer();
        let mut sup = LinkSupervisor::new(Box::new(link), &settings);
        let shutdown = AtomicBool::new(false);
        assert!(sup.connect_until_ready(&shutdown).is_none());
        assert_eq!(peer.scans(), 3);
    }

    #[test]
    fn startup_stops_on_shutdown_flag() {
        let (mut sup, peer) = supervisor(false);
        let shutdown = AtomicBool::new(true);
        assert!(sup.connect_until_ready(&shutdown).is_none());
        assert_eq!(peer.scans(), 0);
    }

    #[test]
    fn startup_connects_once_peer_appears() {
        let (mut sup, peer) = supervisor(true);
        let shutdown = AtomicBool::new(false);
        let handle = sup.connect_until_ready(&shutdown).unwrap();
        assert_eq!(handle.address(), peer.address());
    }
}
