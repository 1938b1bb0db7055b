//! Flat error taxonomy for the core.
//!
//! Every fallible boundary returns one of these instead of panicking.
//! Transient failures (decrypt failure, transport backpressure) are
//! recoverable and handled by callers; only a narrow subset is meant to
//! surface to the embedding application (see [`CoreError::is_user_visible`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("value too large to encode: {0}")]
    Oversize(String),
}

#[derive(Debug, Error)]
pub enum NoiseError {
    #[error("handshake is not in the expected step (expected {expected}, state is {actual})")]
    OutOfOrder { expected: &'static str, actual: &'static str },

    #[error("noise handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("record decryption failed")]
    DecryptFailed,

    #[error("nonce monotonicity violated: saw {seen}, expected > {last}")]
    NonceReplay { seen: u64, last: u64 },

    #[error("session is not established")]
    NotEstablished,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no established session with peer")]
    NoSession,

    #[error(transparent)]
    Noise(#[from] NoiseError),

    #[error("handshake message rejected: session already established and healthy")]
    DowngradeRejected,

    #[error("peer unreachable after repeated handshake failures")]
    PeerUnreachable,

    #[error("handshake timed out before completion")]
    HandshakeTimeout,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("packet dropped: duplicate")]
    Duplicate,

    #[error("packet dropped: ttl expired")]
    TtlExpired,

    #[error("reassembly buffer timed out for transfer {0}")]
    ReassemblyTimeout(String),
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Top-level error surfaced across the public API.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    #[error("keystore error: {0}")]
    KeyStore(String),

    #[error("peer {0} unreachable")]
    PeerUnreachable(PeerTag),

    /// The transport accepted the call but could not move the frame yet
    /// (e.g. pre-handshake). Per the spec's error taxonomy this is
    /// absorbed silently: the message stays queued in the outbox with
    /// `sent_at` unset and the next flush retries without delay.
    #[error("transport backpressure for peer {0}")]
    TransportBackpressure(PeerTag),
}

/// Newtype so `CoreError::PeerUnreachable` prints a hex peer id without
/// pulling `types` into `error`'s public surface.
#[derive(Debug)]
pub struct PeerTag(pub String);

impl std::fmt::Display for PeerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl CoreError {
    /// Only a narrow set of conditions is user-visible; everything else is
    /// absorbed and retried internally.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            CoreError::PeerUnreachable(_)
                | CoreError::Outbox(OutboxError::Persistence(_))
                | CoreError::Session(SessionError::PeerUnreachable)
        )
    }
}
