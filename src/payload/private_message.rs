//! Private message payload.
//!
//! `{1-byte len}{messageID}{2-byte len}{content}`, both UTF-8.

use crate::codec::{Reader, Writer};
use crate::error::CodecError;

pub const MAX_CONTENT_LEN: usize = 65_535;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage {
    pub message_id: String,
    pub content: String,
}

impl PrivateMessage {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.message_id.len() > u8::MAX as usize {
            return Err(CodecError::Oversize(format!(
                "messageID of {} bytes exceeds u8 length",
                self.message_id.len()
            )));
        }
        if self.content.len() > MAX_CONTENT_LEN {
            return Err(CodecError::Oversize(format!(
                "content of {} bytes exceeds max {}",
                self.content.len(),
                MAX_CONTENT_LEN
            )));
        }
        let mut w = Writer::new();
        w.write_str_u8(&self.message_id)?;
        w.write_str_u16(&self.content)?;
        Ok(w.into_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        let message_id = r.read_str_u8()?;
        let content = r.read_str_u16()?;
        Ok(Self { message_id, content })
    }
}
