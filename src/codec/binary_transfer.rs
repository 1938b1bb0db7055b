//! Binary transfer metadata + chunk framing.

use super::{Reader, Writer};
use crate::error::CodecError;
use crate::types::TransferId;

pub const BINARY_TRANSFER_VERSION: u8 = 1;
pub const MAX_TOTAL_SIZE: u32 = 2_000_000;
pub const CHECKSUM_LEN: usize = 32;

const FLAG_FILENAME_PRESENT: u8 = 1 << 0;
const FLAG_CHECKSUM_PRESENT: u8 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferKind {
    Image = 0,
    Audio = 1,
}

impl TransferKind {
    fn from_u8(v: u8) -> Result<Self, CodecError> {
        match v {
            0 => Ok(Self::Image),
            1 => Ok(Self::Audio),
            other => Err(CodecError::Malformed(format!("unknown transfer kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryTransferMetadata {
    pub kind: TransferKind,
    pub transfer_id: TransferId,
    pub total_size: u32,
    pub chunk_size: u16,
    pub chunk_count: u16,
    pub mime: String,
    pub filename: Option<String>,
    pub checksum: Option<[u8; CHECKSUM_LEN]>,
}

impl BinaryTransferMetadata {
    /// Builds metadata, computing `chunk_count` as `ceil(total_size / chunk_size)`.
    pub fn new(
        kind: TransferKind,
        transfer_id: TransferId,
        total_size: u32,
        chunk_size: u16,
        mime: String,
        filename: Option<String>,
        checksum: Option<[u8; CHECKSUM_LEN]>,
    ) -> Result<Self, CodecError> {
        if total_size > MAX_TOTAL_SIZE {
            return Err(CodecError::Oversize(format!(
                "total_size {total_size} exceeds {MAX_TOTAL_SIZE}"
            )));
        }
        if !(128..=4096).contains(&chunk_size) {
            return Err(CodecError::Malformed(format!(
                "chunk_size {chunk_size} out of range 128..=4096"
            )));
        }
        let chunk_count = chunk_count_for(total_size, chunk_size);
        Ok(Self { kind, transfer_id, total_size, chunk_size, chunk_count, mime, filename, checksum })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.chunk_count != chunk_count_for(self.total_size, self.chunk_size) {
            return Err(CodecError::Malformed(
                "chunk_count does not match ceil(total_size / chunk_size)".into(),
            ));
        }
        let mut w = Writer::new();
        w.write_u8(BINARY_TRANSFER_VERSION);
        w.write_u8(self.kind as u8);

        let mut flags = 0u8;
        if self.filename.is_some() {
            flags |= FLAG_FILENAME_PRESENT;
        }
        if self.checksum.is_some() {
            flags |= FLAG_CHECKSUM_PRESENT;
        }
        w.write_u8(flags);

        w.write_bytes(&self.transfer_id);
        w.write_u32(self.total_size);
        w.write_u16(self.chunk_size);
        w.write_u16(self.chunk_count);
        w.write_str_u16(&self.mime)?;

        if let Some(name) = &self.filename {
            w.write_str_u16(name)?;
        }
        if let Some(sum) = &self.checksum {
            w.write_bytes(sum);
        }

        Ok(w.into_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        let version = r.read_u8()?;
        if version != BINARY_TRANSFER_VERSION {
            return Err(CodecError::Malformed(format!("unsupported binary transfer version {version}")));
        }
        let kind = TransferKind::from_u8(r.read_u8()?)?;
        let flags = r.read_u8()?;
        let transfer_id: TransferId = r.read_array()?;
        let total_size = r.read_u32()?;
        if total_size > MAX_TOTAL_SIZE {
            return Err(CodecError::Malformed(format!("total_size {total_size} exceeds {MAX_TOTAL_SIZE}")));
        }
        let chunk_size = r.read_u16()?;
        if !(128..=4096).contains(&chunk_size) {
            return Err(CodecError::Malformed(format!("chunk_size {chunk_size} out of range 128..=4096")));
        }
        let chunk_count = r.read_u16()?;
        if chunk_count != chunk_count_for(total_size, chunk_size) {
            return Err(CodecError::Malformed(
                "chunk_count does not match ceil(total_size / chunk_size)".into(),
            ));
        }
        let mime = r.read_str_u16()?;

        let filename = if flags & FLAG_FILENAME_PRESENT != 0 {
            Some(r.read_str_u16()?)
        } else {
            None
        };
        let checksum = if flags & FLAG_CHECKSUM_PRESENT != 0 {
            Some(r.read_array::<CHECKSUM_LEN>()?)
        } else {
            None
        };

        Ok(Self { kind, transfer_id, total_size, chunk_size, chunk_count, mime, filename, checksum })
    }
}

fn chunk_count_for(total_size: u32, chunk_size: u16) -> u16 {
    if total_size == 0 {
        return 0;
    }
    let count = (total_size as u64).div_ceil(chunk_size as u64);
    count.min(u16::MAX as u64) as u16
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryTransferChunk {
    pub transfer_id: TransferId,
    pub sequence_number: u16,
    pub total_chunks: u16,
    pub payload: Vec<u8>,
}

impl BinaryTransferChunk {
    pub fn encode(&self, max_chunk_size: usize) -> Result<Vec<u8>, CodecError> {
        if self.payload.is_empty() {
            return Err(CodecError::Malformed("chunk payload must be non-empty".into()));
        }
        if self.payload.len() > max_chunk_size {
            return Err(CodecError::Oversize(format!(
                "chunk payload of {} bytes exceeds max_chunk_size {max_chunk_size}",
                self.payload.len()
            )));
        }
        if self.sequence_number >= self.total_chunks {
            return Err(CodecError::Malformed(format!(
                "sequence_number {} out of range for total_chunks {}",
                self.sequence_number, self.total_chunks
            )));
        }

        let mut w = Writer::new();
        w.write_u8(BINARY_TRANSFER_VERSION);
        w.write_bytes(&self.transfer_id);
        w.write_u16(self.sequence_number);
        w.write_u16(self.total_chunks);
        w.write_u16(self.payload.len() as u16);
        w.write_bytes(&self.payload);
        Ok(w.into_vec())
    }

    pub fn decode(data: &[u8], max_chunk_size: usize) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        let version = r.read_u8()?;
        if version != BINARY_TRANSFER_VERSION {
            return Err(CodecError::Malformed(format!("unsupported binary transfer version {version}")));
        }
        let transfer_id: TransferId = r.read_array()?;
        let sequence_number = r.read_u16()?;
        let total_chunks = r.read_u16()?;
        if sequence_number >= total_chunks {
            return Err(CodecError::Malformed(format!(
                "sequence_number {sequence_number} out of range for total_chunks {total_chunks}"
            )));
        }
        let payload_len = r.read_u16()? as usize;
        if payload_len == 0 {
            return Err(CodecError::Malformed("chunk payload must be non-empty".into()));
        }
        if payload_len > max_chunk_size {
            return Err(CodecError::Malformed(format!(
                "chunk payload of {payload_len} bytes exceeds max_chunk_size {max_chunk_size}"
            )));
        }
        let payload = r.read_bytes(payload_len)?.to_vec();
        Ok(Self { transfer_id, sequence_number, total_chunks, payload })
    }
}
