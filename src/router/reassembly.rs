//! Fragment reassembly buffers, keyed by transfer id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::codec::fragment::Fragment;
use crate::types::TransferId;

struct PartialTransfer {
    total: u16,
    slices: HashMap<u16, Vec<u8>>,
    started_at: Instant,
}

/// Buffers fragments until every index 0..total has arrived, or discards
/// them after `timeout` elapses since the first fragment.
pub struct ReassemblyBuffer {
    partials: HashMap<TransferId, PartialTransfer>,
    timeout: Duration,
}

impl ReassemblyBuffer {
    pub fn new(timeout: Duration) -> Self {
        Self { partials: HashMap::new(), timeout }
    }

    /// Feeds a fragment in. Returns the fully reassembled payload once the
    /// final slice arrives, or `None` while the transfer is still partial.
    pub fn accept(&mut self, fragment: Fragment) -> Option<Vec<u8>> {
        self.expire_stale();

        let entry = self.partials.entry(fragment.transfer_id).or_insert_with(|| PartialTransfer {
            total: fragment.total,
            slices: HashMap::new(),
            started_at: Instant::now(),
        });
        entry.slices.insert(fragment.index, fragment.slice);

        if entry.slices.len() < entry.total as usize {
            return None;
        }

        let entry = self.partials.remove(&fragment.transfer_id).unwrap();
        let mut out = Vec::new();
        for i in 0..entry.total {
            out.extend_from_slice(entry.slices.get(&i)?);
        }
        Some(out)
    }

    pub fn pending_count(&self) -> usize {
        self.partials.len()
    }

    fn expire_stale(&mut self) {
        let timeout = self.timeout;
        self.partials.retain(|_, p| p.started_at.elapsed() < timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_once_all_fragments_arrive() {
        let payload: Vec<u8> = (0u16..500).map(|n| (n % 256) as u8).collect();
        let fragments = Fragment::split(&payload, 128, [1; 16]);
        let mut buf = ReassemblyBuffer::new(Duration::from_secs(30));

        let mut result = None;
        for f in fragments {
            result = buf.accept(f);
        }
        assert_eq!(result, Some(payload));
        assert_eq!(buf.pending_count(), 0);
    }

    #[test]
    fn stale_partial_transfer_is_discarded() {
        let mut buf = ReassemblyBuffer::new(Duration::from_millis(1));
        let fragments = Fragment::split(&[1, 2, 3, 4, 5, 6], 2, [2; 16]);
        buf.accept(fragments[0].clone());
        std::thread::sleep(Duration::from_millis(5));
        // Feeding an unrelated fragment triggers expiry of the stale one.
        buf.accept(Fragment { transfer_id: [9; 16], index: 0, total: 1, slice: vec![] });
        assert_eq!(buf.pending_count(), 1);
    }
}
