//! Binary codec primitives.
//!
//! Wire integers are big-endian; every length field is validated against
//! the remaining buffer before it is used to slice, so a truncated frame
//! fails with [`CodecError::Malformed`] instead of panicking.

pub mod binary_transfer;
pub mod fragment;
pub mod packet;

pub use packet::{Packet, PacketType};

use crate::error::CodecError;

/// A cursor over a byte slice with bounds-checked big-endian reads: every
/// read checks the remaining length before slicing, so a truncated frame
/// produces an error instead of a panic.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn need(&self, n: usize) -> Result<(), CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Malformed(format!(
                "need {} bytes, have {}",
                n,
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.need(2)?;
        let v = u16::from_be_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.need(4)?;
        let v = u32::from_be_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.need(8)?;
        let v = u64::from_be_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.need(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.read_bytes(N)?;
        Ok(slice.try_into().unwrap())
    }

    /// Reads a `u16`-length-prefixed UTF-8 string.
    pub fn read_str_u16(&mut self) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CodecError::Malformed(format!("invalid utf8: {e}")))
    }

    /// Reads a `u8`-length-prefixed UTF-8 string.
    pub fn read_str_u8(&mut self) -> Result<String, CodecError> {
        let len = self.read_u8()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CodecError::Malformed(format!("invalid utf8: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread tail of the buffer, for formats that need to peek ahead
    /// to disambiguate a legacy encoding (see `payload::file_packet`).
    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Small growable writer; kept distinct from `Vec<u8>` directly only so call
/// sites read as symmetric with `Reader`.
#[derive(Default)]
pub struct Writer(pub Vec<u8>);

impl Writer {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn write_u8(&mut self, v: u8) {
        self.0.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    pub fn write_str_u16(&mut self, s: &str) -> Result<(), CodecError> {
        if s.len() > u16::MAX as usize {
            return Err(CodecError::Oversize(format!("string of {} bytes", s.len())));
        }
        self.write_u16(s.len() as u16);
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    pub fn write_str_u8(&mut self, s: &str) -> Result<(), CodecError> {
        if s.len() > u8::MAX as usize {
            return Err(CodecError::Oversize(format!("string of {} bytes", s.len())));
        }
        self.write_u8(s.len() as u8);
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

/// SHA-256 truncated to 16 bytes, used as the dedup key for packets that
/// carry no explicit message id.
pub fn content_hash16(data: &[u8]) -> [u8; 16] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}
