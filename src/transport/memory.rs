//! Deterministic in-memory transport used by tests: records every sent
//! frame in send order and lets the test decide reachability per peer,
//! rather than actually moving bytes anywhere.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{Reachability, Transport, TransportError};
use crate::types::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub to: PeerId,
    pub frame: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<SentFrame>>,
    attempted: Mutex<Vec<SentFrame>>,
    connected: Mutex<HashSet<PeerId>>,
    reachable: Mutex<HashSet<PeerId>>,
    /// Peers simulating pre-handshake backpressure: `send_frame` is called
    /// (and recorded as an attempt) but reports failure without the frame
    /// landing in `sent`, matching a transport that must queue externally.
    backpressured: Mutex<HashSet<PeerId>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, peer: PeerId, connected: bool) {
        let mut set = self.connected.lock().unwrap();
        if connected {
            set.insert(peer);
        } else {
            set.remove(&peer);
        }
    }

    pub fn set_reachable(&self, peer: PeerId, reachable: bool) {
        let mut set = self.reachable.lock().unwrap();
        if reachable {
            set.insert(peer);
        } else {
            set.remove(&peer);
        }
    }

    /// Simulates a connected-but-not-yet-ready transport (e.g. pre-handshake):
    /// `send_frame` still records the attempt but returns an error instead of
    /// accepting the frame.
    pub fn set_backpressured(&self, peer: PeerId, backpressured: bool) {
        let mut set = self.backpressured.lock().unwrap();
        if backpressured {
            set.insert(peer);
        } else {
            set.remove(&peer);
        }
    }

    /// All frames accepted so far, in send order.
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap().clone()
    }

    /// Every `send_frame` call observed, whether accepted or backpressured.
    pub fn attempted_frames(&self) -> Vec<SentFrame> {
        self.attempted.lock().unwrap().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for MemoryTransport {
    fn send_frame(&self, to: PeerId, frame: &[u8]) -> Result<(), TransportError> {
        if self.reachability(&to) == Reachability::Unreachable {
            return Err(TransportError::NotConnected(to));
        }
        self.attempted.lock().unwrap().push(SentFrame { to, frame: frame.to_vec() });
        if self.backpressured.lock().unwrap().contains(&to) {
            return Err(TransportError::SendFailed("backpressure".into()));
        }
        self.sent.lock().unwrap().push(SentFrame { to, frame: frame.to_vec() });
        Ok(())
    }

    fn reachability(&self, peer: &PeerId) -> Reachability {
        if self.connected.lock().unwrap().contains(peer) {
            Reachability::Connected
        } else if self.reachable.lock().unwrap().contains(peer) {
            Reachability::Reachable
        } else {
            Reachability::Unreachable
        }
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.lock().unwrap().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_sent_frames_in_order() {
        let transport = MemoryTransport::new();
        let peer = PeerId::random();
        transport.set_connected(peer, true);

        transport.send_frame(peer, b"one").unwrap();
        transport.send_frame(peer, b"two").unwrap();

        let sent = transport.sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].frame, b"one");
        assert_eq!(sent[1].frame, b"two");
    }

    #[test]
    fn send_to_unreachable_peer_fails() {
        let transport = MemoryTransport::new();
        let peer = PeerId::random();
        assert!(transport.send_frame(peer, b"x").is_err());
    }
}
