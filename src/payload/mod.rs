//! Typed payload codecs carried inside a [`crate::codec::Packet`].
//!
//! Each packet's `packet_type` selects which of these a decoder should
//! reach for; [`TypedPayload::decode`] centralizes that dispatch so callers
//! don't have to match on `PacketType` themselves.

pub mod control;
pub mod file_packet;
pub mod private_message;

pub use control::{Announce, FavoriteNotification, Ping, Pong, ReadReceipt};
pub use file_packet::FilePacket;
pub use private_message::PrivateMessage;

use crate::codec::PacketType;
use crate::error::CodecError;

#[derive(Debug, Clone, PartialEq)]
pub enum TypedPayload {
    Announce(Announce),
    PrivateMessage(PrivateMessage),
    PublicMessage(String),
    FilePacket(FilePacket),
    ReadReceipt(ReadReceipt),
    FavoriteNotification(FavoriteNotification),
    Ping(Ping),
    Pong(Pong),
}

impl TypedPayload {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Announce(_) => PacketType::Announce,
            Self::PrivateMessage(_) => PacketType::PrivateMessage,
            Self::PublicMessage(_) => PacketType::PublicMessage,
            Self::FilePacket(_) => PacketType::FileMetadata,
            Self::ReadReceipt(_) => PacketType::ReadReceipt,
            Self::FavoriteNotification(_) => PacketType::FavoriteNotification,
            Self::Ping(_) => PacketType::Ping,
            Self::Pong(_) => PacketType::Pong,
        }
    }

    pub fn encode(&self, max_message_size: usize) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Announce(a) => a.encode(),
            Self::PrivateMessage(m) => m.encode(),
            Self::PublicMessage(s) => {
                if s.len() > max_message_size {
                    return Err(CodecError::Oversize(format!(
                        "public message of {} bytes exceeds max_message_size {max_message_size}",
                        s.len()
                    )));
                }
                Ok(s.as_bytes().to_vec())
            }
            Self::FilePacket(f) => f.encode(max_message_size),
            Self::ReadReceipt(r) => r.encode(),
            Self::FavoriteNotification(f) => Ok(f.encode()),
            Self::Ping(p) => p.encode(),
            Self::Pong(p) => p.encode(),
        }
    }

    pub fn decode(packet_type: PacketType, data: &[u8], max_message_size: usize) -> Result<Self, CodecError> {
        if data.len() > max_message_size {
            return Err(CodecError::Oversize(format!(
                "payload of {} bytes exceeds max_message_size {max_message_size}",
                data.len()
            )));
        }
        Ok(match packet_type {
            PacketType::Announce => Self::Announce(Announce::decode(data)?),
            PacketType::PrivateMessage => Self::PrivateMessage(PrivateMessage::decode(data)?),
            PacketType::PublicMessage => Self::PublicMessage(
                String::from_utf8(data.to_vec())
                    .map_err(|e| CodecError::Malformed(format!("invalid utf8: {e}")))?,
            ),
            PacketType::FileMetadata | PacketType::FileChunk => {
                Self::FilePacket(FilePacket::decode(data, max_message_size)?)
            }
            PacketType::ReadReceipt => Self::ReadReceipt(ReadReceipt::decode(data)?),
            PacketType::FavoriteNotification => {
                Self::FavoriteNotification(FavoriteNotification::decode(data)?)
            }
            PacketType::Ping => Self::Ping(Ping::decode(data)?),
            PacketType::Pong => Self::Pong(Pong::decode(data)?),
            other => {
                return Err(CodecError::Malformed(format!(
                    "packet type {other:?} has no typed payload decoder"
                )))
            }
        })
    }
}
