//! Mesh packet framing.

use super::{Reader, Writer};
use crate::error::CodecError;
use crate::types::PeerId;

pub const PACKET_VERSION: u8 = 1;

const FLAG_RECIPIENT_PRESENT: u8 = 1 << 0;
const FLAG_SIGNATURE_PRESENT: u8 = 1 << 1;

/// Closed set of packet types. Wire values are a design decision made
/// here and must stay stable once deployed; unknown values
/// decode to `Err(CodecError::Malformed)` rather than a catch-all variant,
/// so a version bump is required to introduce a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Announce = 0x01,
    NoiseHandshake = 0x02,
    NoiseEncrypted = 0x03,
    PrivateMessage = 0x04,
    PublicMessage = 0x05,
    FileMetadata = 0x06,
    FileChunk = 0x07,
    BinaryMetadata = 0x08,
    BinaryChunk = 0x09,
    ReadReceipt = 0x0a,
    FavoriteNotification = 0x0b,
    Ping = 0x0c,
    Pong = 0x0d,
    Fragment = 0x0e,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Result<Self, CodecError> {
        Ok(match v {
            0x01 => Self::Announce,
            0x02 => Self::NoiseHandshake,
            0x03 => Self::NoiseEncrypted,
            0x04 => Self::PrivateMessage,
            0x05 => Self::PublicMessage,
            0x06 => Self::FileMetadata,
            0x07 => Self::FileChunk,
            0x08 => Self::BinaryMetadata,
            0x09 => Self::BinaryChunk,
            0x0a => Self::ReadReceipt,
            0x0b => Self::FavoriteNotification,
            0x0c => Self::Ping,
            0x0d => Self::Pong,
            0x0e => Self::Fragment,
            other => return Err(CodecError::Malformed(format!("unknown packet type 0x{other:02x}"))),
        })
    }
}

/// A framed mesh packet. `recipient_id` absent means broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub packet_type: PacketType,
    pub sender_id: PeerId,
    pub recipient_id: Option<PeerId>,
    pub timestamp_ms: u64,
    pub ttl: u8,
    pub payload: Vec<u8>,
    pub signature: Option<Vec<u8>>,
}

impl Packet {
    pub fn new_broadcast(
        packet_type: PacketType,
        sender_id: PeerId,
        ttl: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PACKET_VERSION,
            packet_type,
            sender_id,
            recipient_id: None,
            timestamp_ms: crate::types::now_ms(),
            ttl,
            payload,
            signature: None,
        }
    }

    pub fn new_unicast(
        packet_type: PacketType,
        sender_id: PeerId,
        recipient_id: PeerId,
        ttl: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PACKET_VERSION,
            packet_type,
            sender_id,
            recipient_id: Some(recipient_id),
            timestamp_ms: crate::types::now_ms(),
            ttl,
            payload,
            signature: None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient_id.is_none()
    }

    /// Returns a copy with `ttl` decremented by one; never underflows.
    pub fn forwarded(&self, ttl: u8) -> Self {
        let mut clone = self.clone();
        clone.ttl = ttl;
        clone
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.payload.len() > u16::MAX as usize {
            return Err(CodecError::Oversize(format!(
                "packet payload of {} bytes exceeds u16 frame length",
                self.payload.len()
            )));
        }
        if let Some(sig) = &self.signature {
            if sig.len() > u16::MAX as usize {
                return Err(CodecError::Oversize(format!(
                    "signature of {} bytes exceeds u16 frame length",
                    sig.len()
                )));
            }
        }

        let mut w = Writer::new();
        w.write_u8(self.version);
        w.write_u8(self.packet_type as u8);
        w.write_bytes(self.sender_id.as_bytes());

        let mut flags = 0u8;
        if self.recipient_id.is_some() {
            flags |= FLAG_RECIPIENT_PRESENT;
        }
        if self.signature.is_some() {
            flags |= FLAG_SIGNATURE_PRESENT;
        }
        w.write_u8(flags);

        if let Some(recipient) = &self.recipient_id {
            w.write_bytes(recipient.as_bytes());
        }

        w.write_u64(self.timestamp_ms);
        w.write_u8(self.ttl);
        w.write_u16(self.payload.len() as u16);
        w.write_bytes(&self.payload);

        if let Some(sig) = &self.signature {
            w.write_u16(sig.len() as u16);
            w.write_bytes(sig);
        }

        Ok(w.into_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        let version = r.read_u8()?;
        let packet_type = PacketType::from_u8(r.read_u8()?)?;
        let sender_id = PeerId(r.read_array()?);
        let flags = r.read_u8()?;

        let recipient_id = if flags & FLAG_RECIPIENT_PRESENT != 0 {
            Some(PeerId(r.read_array()?))
        } else {
            None
        };

        let timestamp_ms = r.read_u64()?;
        let ttl = r.read_u8()?;
        if ttl > 7 {
            return Err(CodecError::Malformed(format!("ttl {ttl} out of range 0..=7")));
        }

        let payload_len = r.read_u16()? as usize;
        let payload = r.read_bytes(payload_len)?.to_vec();

        let signature = if flags & FLAG_SIGNATURE_PRESENT != 0 {
            let sig_len = r.read_u16()? as usize;
            Some(r.read_bytes(sig_len)?.to_vec())
        } else {
            None
        };

        Ok(Self {
            version,
            packet_type,
            sender_id,
            recipient_id,
            timestamp_ms,
            ttl,
            payload,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> PeerId {
        PeerId([1, 2, 3, 4, 5, 6, 7, 8])
    }

    #[test]
    fn broadcast_round_trip() {
        let p = Packet::new_broadcast(PacketType::PublicMessage, sender(), 7, b"hello".to_vec());
        let encoded = p.encode().unwrap();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn unicast_with_signature_round_trip() {
        let mut p = Packet::new_unicast(
            PacketType::PrivateMessage,
            sender(),
            PeerId([9; 8]),
            3,
            b"secret".to_vec(),
        );
        p.signature = Some(vec![0xAB; 64]);
        let encoded = p.encode().unwrap();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(p, decoded);
        assert!(!decoded.is_broadcast());
    }

    #[test]
    fn truncated_frame_is_malformed_not_panic() {
        let p = Packet::new_broadcast(PacketType::Ping, sender(), 1, vec![1, 2, 3]);
        let mut encoded = p.encode().unwrap();
        encoded.truncate(encoded.len() - 2);
        assert!(matches!(Packet::decode(&encoded), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn ttl_out_of_range_is_rejected() {
        let p = Packet::new_broadcast(PacketType::Ping, sender(), 1, vec![]);
        let mut encoded = p.encode().unwrap();
        // ttl is byte index 18 for a broadcast header with no signature:
        // version(1)+type(1)+sender(8)+flags(1)+timestamp(8) = 19, ttl at 19
        encoded[19] = 9;
        assert!(matches!(Packet::decode(&encoded), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn forward_decrements_ttl_and_keeps_other_fields() {
        let p = Packet::new_broadcast(PacketType::Ping, sender(), 5, vec![1]);
        let forwarded = p.forwarded(4);
        assert_eq!(forwarded.ttl, 4);
        assert_eq!(forwarded.sender_id, p.sender_id);
        assert_eq!(forwarded.payload, p.payload);
    }
}
