use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{LinkBackend, PeerSession};
use crate::error::PipelineError;

#[derive(Debug)]
struct PeerState {
    address: String,
    in_range: bool,
    fail_writes: bool,
    /// Bumped whenever the live session is severed; older sessions see a
    /// stale generation and report disconnected.
    generation: u64,
    scans: u32,
    connects: u32,
    writes: Vec<(String, Vec<u8>)>,
}

/// Test-side controls and observations for a [`SimulatedLink`].
#[derive(Clone, Debug)]
pub struct SimulatedPeer {
    state: Arc<Mutex<PeerState>>,
}

impl SimulatedPeer {
    fn lock(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address(&self) -> String {
        self.lock().address.clone()
    }

    /// Bring the peer into or out of range. Leaving range severs any session.
    pub fn set_in_range(&self, in_range: bool) {
        let mut state = self.lock();
        if state.in_range && !in_range {
            state.generation += 1;
        }
        state.in_range = in_range;
    }

    /// Sever the current session while leaving the peer discoverable.
    pub fn drop_connection(&self) {
        self.lock().generation += 1;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn scans(&self) -> u32 {
        self.lock().scans
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    /// Every byte written so far, in order, across all sessions.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.lock()
            .writes
            .iter()
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }

    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().writes.clone()
    }
}

/// In-process LED controller. Scans return immediately.
#[derive(Debug)]
pub struct SimulatedLink {
    peer: SimulatedPeer,
}

impl SimulatedLink {
    pub fn new(address: impl Into<String>, in_range: bool) -> Self {
        Self {
            peer: SimulatedPeer {
                state: Arc::new(Mutex::new(PeerState {
                    address: address.into(),
                    in_range,
                    fail_writes: false,
                    generation: 0,
                    scans: 0,
                    connects: 0,
                    writes: Vec::new(),
                })),
            },
        }
    }

    /// `stub://absent` starts with the peer out of range; any other
    /// `stub://` URL starts with it advertising.
    pub fn from_url(url: &str, address: &str) -> Self {
        let in_range = url.trim_start_matches("stub://") != "absent";
        Self::new(address, in_range)
    }

    pub fn peer(&self) -> SimulatedPeer {
        self.peer.clone()
    }
}

impl LinkBackend for SimulatedLink {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn scan(&mut self, _duration: Duration) -> Result<Vec<String>, PipelineError> {
        let mut state = self.peer.lock();
        state.scans += 1;
        if state.in_range {
            Ok(vec![state.address.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    fn connect(&mut self, address: &str) -> Result<Box<dyn PeerSession>, PipelineError> {
        let mut state = self.peer.lock();
        if !state.in_range || !state.address.eq_ignore_ascii_case(address) {
            return Err(PipelineError::LinkConnect {
                message: format!("peer {} is not reachable", address),
            });
        }
        state.connects += 1;
        state.generation += 1;
        Ok(Box::new(SimulatedSession {
            peer: self.peer.clone(),
            generation: state.generation,
        }))
    }
}

struct SimulatedSession {
    peer: SimulatedPeer,
    generation: u64,
}

impl PeerSession for SimulatedSession {
    fn is_connected(&self) -> bool {
        let state = self.peer.lock();
        state.in_range && state.generation == self.generation
    }

    fn write(&mut self, target: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        let mut state = self.peer.lock();
        if !state.in_range || state.generation != self.generation {
            return Err(PipelineError::LinkWrite {
                message: "session is no longer connected".to_string(),
            });
        }
        if state.fail_writes {
            return Err(PipelineError::LinkWrite {
                message: format!("write to {} rejected by peer", target),
            });
        }
        state.writes.push((target.to_string(), bytes.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_reports_peer_only_when_in_range() {
        let mut link = SimulatedLink::new("AA:BB", false);
        let peer = link.peer();
        assert!(link.scan(Duration::ZERO).unwrap().is_empty());
        peer.set_in_range(true);
        assert_eq!(link.scan(Duration::ZERO).unwrap(), vec!["AA:BB".to_string()]);
        assert_eq!(peer.scans(), 2);
    }

    #[test]
    fn reconnect_invalidates_previous_session() {
        let mut link = SimulatedLink::new("AA:BB", true);
        let first = link.connect("aa:bb").unwrap();
        assert!(first.is_connected());
        let second = link.connect("AA:BB").unwrap();
        assert!(!first.is_connected());
        assert!(second.is_connected());
    }

    #[test]
    fn dropped_session_rejects_writes() {
        let mut link = SimulatedLink::new("AA:BB", true);
        let peer = link.peer();
        let mut session = link.connect("AA:BB").unwrap();
        session.write("char", &[3]).unwrap();
        peer.drop_connection();
        assert!(!session.is_connected());
        let err = session.write("char", &[1]).unwrap_err();
        assert_eq!(err.code(), "LINK_WRITE_FAILED");
        assert_eq!(peer.written_bytes(), vec![3]);
    }

    #[test]
    fn failing_writes_keep_session_alive() {
        let mut link = SimulatedLink::new("AA:BB", true);
        let peer = link.peer();
        let mut session = link.connect("AA:BB").unwrap();
        peer.set_fail_writes(true);
        assert!(session.write("char", &[2]).is_err());
        assert!(session.is_connected());
        assert!(peer.writes().is_empty());
    }

    #[test]
    fn absent_url_starts_out_of_range() {
        let mut link = SimulatedLink::from_url("stub://absent", "AA:BB");
        assert!(link.scan(Duration::ZERO).unwrap().is_empty());
        assert!(link.connect("AA:BB").is_err());
    }
}
