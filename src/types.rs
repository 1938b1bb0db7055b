//! Core identifiers shared across modules.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque 8-byte peer address, ephemeral per process launch. `Serialize`
/// is derived via the newtype's inner array so it can be persisted
/// directly as an outbox entry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 8]);

impl PeerId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let raw = hex::decode(s).ok()?;
        let bytes: [u8; 8] = raw.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Milliseconds since the Unix epoch, used for packet timestamps and
/// outbox bookkeeping. Saturates rather than panics on clock anomalies.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 16-byte identifier for fragment/binary-transfer correlation.
pub type TransferId = [u8; 16];

pub fn random_transfer_id() -> TransferId {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_hex_round_trip() {
        let id = PeerId::random();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 16);
        assert_eq!(PeerId::from_hex(&hex), Some(id));
    }

    #[test]
    fn peer_id_rejects_wrong_length_hex() {
        assert_eq!(PeerId::from_hex("abcd"), None);
    }
}
