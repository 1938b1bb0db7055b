//! Fragment payload framing.
//!
//! A `Fragment` is carried as the payload of a [`super::PacketType::Fragment`]
//! packet; the router reassembles fragments sharing a `transfer_id` back into
//! the original packet payload once `index`es 0..total have all arrived.

use super::{Reader, Writer};
use crate::error::CodecError;
use crate::types::TransferId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub transfer_id: TransferId,
    pub index: u16,
    pub total: u16,
    pub slice: Vec<u8>,
}

impl Fragment {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.slice.len() > u16::MAX as usize {
            return Err(CodecError::Oversize(format!(
                "fragment slice of {} bytes exceeds u16 length",
                self.slice.len()
            )));
        }
        let mut w = Writer::new();
        w.write_bytes(&self.transfer_id);
        w.write_u16(self.index);
        w.write_u16(self.total);
        w.write_u16(self.slice.len() as u16);
        w.write_bytes(&self.slice);
        Ok(w.into_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        let transfer_id: TransferId = r.read_array()?;
        let index = r.read_u16()?;
        let total = r.read_u16()?;
        if total == 0 || index >= total {
            return Err(CodecError::Malformed(format!(
                "fragment index {index} out of range for total {total}"
            )));
        }
        let slice_len = r.read_u16()? as usize;
        let slice = r.read_bytes(slice_len)?.to_vec();
        Ok(Self { transfer_id, index, total, slice })
    }

    /// Splits `payload` into fragments no larger than `max_slice`, sharing a
    /// fresh `transfer_id`. Returns a single-element vec (no fragment framing
    /// needed) when `payload` already fits.
    pub fn split(payload: &[u8], max_slice: usize, transfer_id: TransferId) -> Vec<Fragment> {
        if payload.is_empty() {
            return vec![Fragment { transfer_id, index: 0, total: 1, slice: Vec::new() }];
        }
        let chunks: Vec<&[u8]> = payload.chunks(max_slice.max(1)).collect();
        let total = chunks.len() as u16;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Fragment {
                transfer_id,
                index: i as u16,
                total,
                slice: chunk.to_vec(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let f = Fragment { transfer_id: [7; 16], index: 1, total: 3, slice: vec![1, 2, 3] };
        let encoded = f.encode().unwrap();
        assert_eq!(Fragment::decode(&encoded).unwrap(), f);
    }

    #[test]
    fn index_past_total_is_malformed() {
        let f = Fragment { transfer_id: [0; 16], index: 3, total: 3, slice: vec![] };
        let encoded = f.encode().unwrap();
        assert!(matches!(Fragment::decode(&encoded), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn split_respects_max_slice_and_rejoins() {
        let payload: Vec<u8> = (0u16..1000).map(|n| (n % 256) as u8).collect();
        let fragments = Fragment::split(&payload, 128, [1; 16]);
        assert!(fragments.len() > 1);
        let mut rejoined = Vec::new();
        for f in &fragments {
            rejoined.extend_from_slice(&f.slice);
        }
        assert_eq!(rejoined, payload);
    }

    #[test]
    fn split_small_payload_is_single_fragment() {
        let fragments = Fragment::split(b"hi", 400, [2; 16]);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].total, 1);
    }
}
