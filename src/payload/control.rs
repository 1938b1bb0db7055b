//! Control-plane payloads: liveness probes, delivery/favorite signaling,
//! and presence announcements.

use crate::codec::{Reader, Writer};
use crate::error::CodecError;
use crate::types::{now_ms, PeerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub ping_id: String,
    pub sender_id: PeerId,
    pub sender_nickname: String,
    pub target_id: PeerId,
    pub target_nickname: String,
    pub timestamp_ms: u64,
}

impl Ping {
    pub fn new(
        ping_id: String,
        sender_id: PeerId,
        sender_nickname: String,
        target_id: PeerId,
        target_nickname: String,
    ) -> Self {
        Self {
            ping_id,
            sender_id,
            sender_nickname,
            target_id,
            target_nickname,
            timestamp_ms: now_ms(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::new();
        w.write_str_u8(&self.ping_id)?;
        w.write_bytes(self.sender_id.as_bytes());
        w.write_str_u8(&self.sender_nickname)?;
        w.write_bytes(self.target_id.as_bytes());
        w.write_str_u8(&self.target_nickname)?;
        w.write_u64(self.timestamp_ms);
        Ok(w.into_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        let ping_id = r.read_str_u8()?;
        let sender_id = PeerId(r.read_array()?);
        let sender_nickname = r.read_str_u8()?;
        let target_id = PeerId(r.read_array()?);
        let target_nickname = r.read_str_u8()?;
        let timestamp_ms = r.read_u64()?;
        Ok(Self { ping_id, sender_id, sender_nickname, target_id, target_nickname, timestamp_ms })
    }

    /// Builds the matching pong, carrying the ping's timestamp through so the
    /// originator can compute round-trip time on receipt.
    pub fn to_pong(&self) -> Pong {
        Pong {
            ping_id: self.ping_id.clone(),
            sender_id: self.target_id,
            sender_nickname: self.target_nickname.clone(),
            target_id: self.sender_id,
            target_nickname: self.sender_nickname.clone(),
            ping_timestamp_ms: self.timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    pub ping_id: String,
    pub sender_id: PeerId,
    pub sender_nickname: String,
    pub target_id: PeerId,
    pub target_nickname: String,
    pub ping_timestamp_ms: u64,
}

impl Pong {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::new();
        w.write_str_u8(&self.ping_id)?;
        w.write_bytes(self.sender_id.as_bytes());
        w.write_str_u8(&self.sender_nickname)?;
        w.write_bytes(self.target_id.as_bytes());
        w.write_str_u8(&self.target_nickname)?;
        w.write_u64(self.ping_timestamp_ms);
        Ok(w.into_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        let ping_id = r.read_str_u8()?;
        let sender_id = PeerId(r.read_array()?);
        let sender_nickname = r.read_str_u8()?;
        let target_id = PeerId(r.read_array()?);
        let target_nickname = r.read_str_u8()?;
        let ping_timestamp_ms = r.read_u64()?;
        Ok(Self { ping_id, sender_id, sender_nickname, target_id, target_nickname, ping_timestamp_ms })
    }

    /// Round-trip time from this pong back to its ping, in milliseconds.
    /// Saturates to zero rather than underflowing if clocks disagree.
    pub fn rtt_ms(&self, received_at_ms: u64) -> u64 {
        received_at_ms.saturating_sub(self.ping_timestamp_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub original_message_id: String,
}

impl ReadReceipt {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::new();
        w.write_str_u8(&self.original_message_id)?;
        Ok(w.into_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        Ok(Self { original_message_id: r.read_str_u8()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FavoriteNotification {
    pub is_favorite: bool,
}

impl FavoriteNotification {
    pub fn encode(&self) -> Vec<u8> {
        vec![self.is_favorite as u8]
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != 1 {
            return Err(CodecError::Malformed(format!(
                "favorite notification must be 1 byte, got {}",
                data.len()
            )));
        }
        Ok(Self { is_favorite: data[0] != 0 })
    }
}

/// Periodic presence broadcast; carries the public key material a peer
/// needs to address a noise handshake back at the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub nickname: String,
    pub static_public_key: Vec<u8>,
}

impl Announce {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::new();
        w.write_str_u8(&self.nickname)?;
        w.write_str_u16(&hex::encode(&self.static_public_key))?;
        Ok(w.into_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        let nickname = r.read_str_u8()?;
        let key_hex = r.read_str_u16()?;
        let static_public_key = hex::decode(&key_hex)
            .map_err(|e| CodecError::Malformed(format!("invalid key hex: {e}")))?;
        Ok(Self { nickname, static_public_key })
    }
}
