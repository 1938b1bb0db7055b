//! Durable per-peer outbox: messages that could not be delivered
//! immediately are persisted here and retried as connectivity allows.
//!
//! Persisted via `sled` (load-on-open, flush-on-write) as an embedded KV
//! store rather than a flat bincode file, since entries are mutated
//! individually rather than rewritten as one blob.

use serde::{Deserialize, Serialize};

use crate::error::OutboxError;
use crate::types::PeerId;

/// Point-in-time snapshot of outbox occupancy, for ambient instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutboxStats {
    pub pending_total: usize,
    pub peers_with_pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub message_id: String,
    pub peer_id: PeerId,
    pub payload: Vec<u8>,
    pub created_at_ms: u64,
    pub sent_at_ms: Option<u64>,
    pub attempt_count: u32,
}

/// Sled-backed outbox, keyed by `peer_id || message_id` so
/// `pending_for_peer` can range-scan a single peer's queue in FIFO order.
pub struct Outbox {
    db: sled::Db,
}

impl Outbox {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, OutboxError> {
        let db = sled::open(path).map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn open_in_memory() -> Result<Self, OutboxError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(Self { db })
    }

    fn key(peer_id: &PeerId, message_id: &str) -> Vec<u8> {
        let mut key = peer_id.as_bytes().to_vec();
        key.push(0); // separator; message ids never contain raw nul bytes once UTF-8
        key.extend_from_slice(message_id.as_bytes());
        key
    }

    pub fn enqueue(&self, entry: &OutboxEntry) -> Result<(), OutboxError> {
        let key = Self::key(&entry.peer_id, &entry.message_id);
        let value = bincode::serialize(entry).map_err(|e| OutboxError::Persistence(e.to_string()))?;
        self.db.insert(key, value).map_err(|e| OutboxError::Persistence(e.to_string()))?;
        self.db.flush().map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(())
    }

    /// Idempotent: removing an already-removed entry is not an error, so
    /// callers can fire `confirm_delivery` speculatively on every ack.
    pub fn confirm_delivery(&self, peer_id: &PeerId, message_id: &str) -> Result<(), OutboxError> {
        let key = Self::key(peer_id, message_id);
        self.db.remove(key).map_err(|e| OutboxError::Persistence(e.to_string()))?;
        self.db.flush().map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(())
    }

    pub fn record_attempt(&self, peer_id: &PeerId, message_id: &str, sent_at_ms: u64) -> Result<(), OutboxError> {
        let key = Self::key(peer_id, message_id);
        if let Some(raw) = self.db.get(&key).map_err(|e| OutboxError::Persistence(e.to_string()))? {
            let mut entry: OutboxEntry =
                bincode::deserialize(&raw).map_err(|e| OutboxError::Persistence(e.to_string()))?;
            entry.attempt_count += 1;
            entry.sent_at_ms = Some(sent_at_ms);
            let value = bincode::serialize(&entry).map_err(|e| OutboxError::Persistence(e.to_string()))?;
            self.db.insert(key, value).map_err(|e| OutboxError::Persistence(e.to_string()))?;
            self.db.flush().map_err(|e| OutboxError::Persistence(e.to_string()))?;
        }
        Ok(())
    }

    /// Entries for one peer, oldest first.
    pub fn pending_for_peer(&self, peer_id: &PeerId) -> Result<Vec<OutboxEntry>, OutboxError> {
        let mut prefix = peer_id.as_bytes().to_vec();
        prefix.push(0);
        let mut entries: Vec<OutboxEntry> = self
            .db
            .scan_prefix(prefix)
            .values()
            .map(|v| {
                let raw = v.map_err(|e| OutboxError::Persistence(e.to_string()))?;
                bincode::deserialize(&raw).map_err(|e| OutboxError::Persistence(e.to_string()))
            })
            .collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.created_at_ms);
        Ok(entries)
    }

    /// Distinct peers with at least one pending entry.
    pub fn pending_peer_ids(&self) -> Result<Vec<PeerId>, OutboxError> {
        let mut peers = Vec::new();
        for key in self.db.iter().keys() {
            let key = key.map_err(|e| OutboxError::Persistence(e.to_string()))?;
            if key.len() >= 8 {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&key[..8]);
                let peer = PeerId(bytes);
                if !peers.contains(&peer) {
                    peers.push(peer);
                }
            }
        }
        Ok(peers)
    }

    /// Snapshot of total pending entries and distinct peers with at least
    /// one, computed by scanning the store rather than tracked incrementally.
    pub fn stats(&self) -> Result<OutboxStats, OutboxError> {
        let peers = self.pending_peer_ids()?;
        let pending_total = self.db.len();
        Ok(OutboxStats { pending_total, peers_with_pending: peers.len() })
    }
}
