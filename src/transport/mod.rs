//! Transport abstraction: anything that can move framed bytes to a peer
//! (BLE, a relay socket, or — in tests — an in-memory double) implements
//! this trait. The router is transport-agnostic; it only asks "is this
//! peer connected" and "send these bytes".

pub mod memory;

pub use memory::MemoryTransport;

use crate::types::PeerId;

/// Connectivity class the router uses to choose where to send, ordered
/// strongest-first: prefer an open connection, fall back to a peer we
/// merely know how to reach (e.g. via relay), else queue in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Connected,
    Reachable,
    Unreachable,
}

/// Event surfaced by a transport as connectivity changes or bytes arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    FrameReceived { from: PeerId, frame: Vec<u8> },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// A concrete medium for moving packet frames between peers.
///
/// Implementations own their own connection bookkeeping; the router only
/// ever calls `send_frame` and consults `reachability`.
pub trait Transport: Send + Sync {
    fn send_frame(&self, to: PeerId, frame: &[u8]) -> Result<(), TransportError>;

    fn reachability(&self, peer: &PeerId) -> Reachability;

    fn connected_peers(&self) -> Vec<PeerId>;
}
