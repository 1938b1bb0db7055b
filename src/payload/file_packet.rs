//! File packet payload: a small TLV stream carrying filename, size, mime
//! and content fields for a file shared over a packet (as opposed to the
//! chunked [`super::super::codec::binary_transfer`] path used for larger
//! images/audio).
//!
//! The content field has two wire variants. The canonical one prefixes
//! content with a `u32` length, and may appear more than once — a sender
//! splitting content across several TLVs concatenates their bytes in
//! order. Older senders instead emit exactly one content field, prefixed
//! with a `u16` length, as the last thing in the stream; the decoder
//! recognizes this legacy form by checking whether the first two bytes,
//! read as a `u16`, account for exactly the remaining buffer, which by
//! construction can only be true of a trailing field.

use crate::codec::{Reader, Writer};
use crate::error::CodecError;

const TAG_FILENAME: u8 = 0x01;
const TAG_FILESIZE: u8 = 0x02;
const TAG_MIME: u8 = 0x03;
const TAG_CONTENT: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilePacket {
    pub filename: Option<String>,
    pub filesize: Option<u32>,
    pub mime: Option<String>,
    pub content: Vec<u8>,
}

impl FilePacket {
    pub fn encode(&self, max_message_size: usize) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::new();

        if let Some(name) = &self.filename {
            w.write_u8(TAG_FILENAME);
            w.write_str_u16(name)?;
        }
        if let Some(size) = self.filesize {
            w.write_u8(TAG_FILESIZE);
            w.write_u16(4);
            w.write_u32(size);
        }
        if let Some(mime) = &self.mime {
            w.write_u8(TAG_MIME);
            w.write_str_u16(mime)?;
        }

        w.write_u8(TAG_CONTENT);
        if self.content.len() > u32::MAX as usize {
            return Err(CodecError::Oversize(format!(
                "file content of {} bytes exceeds u32 length",
                self.content.len()
            )));
        }
        w.write_u32(self.content.len() as u32);
        w.write_bytes(&self.content);

        let encoded = w.into_vec();
        if encoded.len() > max_message_size {
            return Err(CodecError::Oversize(format!(
                "file packet of {} bytes exceeds max_message_size {max_message_size}",
                encoded.len()
            )));
        }
        Ok(encoded)
    }

    pub fn decode(data: &[u8], max_message_size: usize) -> Result<Self, CodecError> {
        if data.len() > max_message_size {
            return Err(CodecError::Oversize(format!(
                "file packet of {} bytes exceeds max_message_size {max_message_size}",
                data.len()
            )));
        }

        let mut r = Reader::new(data);
        let mut out = FilePacket::default();

        while !r.is_empty() {
            let tag = r.read_u8()?;
            match tag {
                TAG_FILENAME => out.filename = Some(r.read_str_u16()?),
                TAG_FILESIZE => {
                    let len = r.read_u16()? as usize;
                    if len != 4 {
                        return Err(CodecError::Malformed(format!(
                            "filesize TLV length {len} must be 4"
                        )));
                    }
                    out.filesize = Some(r.read_u32()?);
                }
                TAG_MIME => out.mime = Some(r.read_str_u16()?),
                TAG_CONTENT => {
                    out.content.extend_from_slice(&decode_content(&mut r)?);
                }
                other => return Err(CodecError::Malformed(format!("unknown file TLV tag 0x{other:02x}"))),
            }
        }

        Ok(out)
    }
}

/// Consumes the remainder of `r` as a content field, tolerating both the
/// canonical `u32`-length and legacy `u16`-length encodings.
fn decode_content(r: &mut Reader<'_>) -> Result<Vec<u8>, CodecError> {
    let remaining = r.remaining_slice();
    if remaining.len() >= 2 {
        let candidate_u16_len = u16::from_be_bytes([remaining[0], remaining[1]]) as usize;
        if candidate_u16_len == remaining.len() - 2 {
            r.read_u16()?;
            return Ok(r.read_bytes(candidate_u16_len)?.to_vec());
        }
    }
    let len = r.read_u32()? as usize;
    Ok(r.read_bytes(len)?.to_vec())
}
