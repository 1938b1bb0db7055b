//! Inbound packet pipeline: dedup, TTL-gated relay, fragment reassembly.

pub mod dedup;
pub mod reassembly;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dedup::{DedupKey, DedupStore};
use reassembly::ReassemblyBuffer;
use tracing::{debug, trace};

use crate::codec::fragment::Fragment;
use crate::codec::{content_hash16, Packet, PacketType};
use crate::error::RouterError;
use crate::types::PeerId;

/// Point-in-time snapshot of packet routing outcomes, for ambient
/// instrumentation rather than application logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub delivered: u64,
    pub relayed: u64,
    pub dropped_duplicate: u64,
    pub dropped_relay_disabled: u64,
    pub buffered: u64,
    pub reassembled: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    relayed: AtomicU64,
    dropped_duplicate: AtomicU64,
    dropped_relay_disabled: AtomicU64,
    buffered: AtomicU64,
    reassembled: AtomicU64,
}

/// What the router decided to do with an inbound packet.
#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Unicast addressed here, or a ttl-exhausted packet; deliver only.
    Deliver(Packet),
    /// Unicast not addressed here; forward the decremented-ttl copy and do
    /// not deliver locally.
    Relay(Packet),
    /// Broadcast: deliver locally and also forward the decremented-ttl
    /// copy on to other peers, per the flood model.
    DeliverAndRelay { deliver: Packet, relay: Packet },
    /// A fragment was buffered; nothing to deliver yet.
    Buffered,
    /// A fragment completed reassembly into the given payload bytes.
    /// `recipient_id` carries the fragment container's own addressing
    /// (absent for a broadcast original, present for a private one) since
    /// that information lives on the outer `Fragment` packets, not in the
    /// reassembled payload itself.
    Reassembled { recipient_id: Option<PeerId>, payload: Vec<u8> },
    /// Packet was a duplicate of one already processed, or relaying is
    /// disabled and the packet was not addressed here.
    Dropped,
}

pub struct PacketRouter {
    local_peer: PeerId,
    dedup: Mutex<DedupStore>,
    reassembly: Mutex<ReassemblyBuffer>,
    relay_enabled: bool,
    counters: Counters,
}

impl PacketRouter {
    pub fn new(
        local_peer: PeerId,
        dedup_capacity: usize,
        dedup_window: Duration,
        reassembly_timeout: Duration,
        relay_enabled: bool,
    ) -> Self {
        Self {
            local_peer,
            dedup: Mutex::new(DedupStore::new(dedup_capacity, dedup_window)),
            reassembly: Mutex::new(ReassemblyBuffer::new(reassembly_timeout)),
            relay_enabled,
            counters: Counters::default(),
        }
    }

    /// Snapshot of routing outcome counts since construction.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            relayed: self.counters.relayed.load(Ordering::Relaxed),
            dropped_duplicate: self.counters.dropped_duplicate.load(Ordering::Relaxed),
            dropped_relay_disabled: self.counters.dropped_relay_disabled.load(Ordering::Relaxed),
            buffered: self.counters.buffered.load(Ordering::Relaxed),
            reassembled: self.counters.reassembled.load(Ordering::Relaxed),
        }
    }

    fn dedup_key(packet: &Packet) -> DedupKey {
        let hash_input = message_id_bytes(packet.packet_type, &packet.payload).unwrap_or(&packet.payload);
        let content_hash = content_hash16(hash_input);
        let mut key = [0u8; 24];
        key[..8].copy_from_slice(packet.sender_id.as_bytes());
        key[8..].copy_from_slice(&content_hash);
        key
    }

    /// Processes one inbound packet: dedups, reassembles fragments, and
    /// decides whether to deliver it locally, relay it onward, or drop it.
    pub fn handle_inbound(&self, packet: Packet) -> Result<RouteOutcome, RouterError> {
        let key = Self::dedup_key(&packet);
        let is_new = self.dedup.lock().unwrap().insert(key);
        if !is_new {
            self.counters.dropped_duplicate.fetch_add(1, Ordering::Relaxed);
            trace!(sender = %packet.sender_id, packet_type = ?packet.packet_type, "dropping duplicate packet");
            return Ok(RouteOutcome::Dropped);
        }

        if packet.packet_type == PacketType::Fragment {
            let recipient_id = packet.recipient_id;
            let fragment = Fragment::decode(&packet.payload)?;
            let reassembled = self.reassembly.lock().unwrap().accept(fragment);
            return Ok(match reassembled {
                Some(payload) => {
                    self.counters.reassembled.fetch_add(1, Ordering::Relaxed);
                    RouteOutcome::Reassembled { recipient_id, payload }
                }
                None => {
                    self.counters.buffered.fetch_add(1, Ordering::Relaxed);
                    RouteOutcome::Buffered
                }
            });
        }

        let addressed_here = packet.recipient_id.map(|r| r == self.local_peer).unwrap_or(true);

        if !packet.is_broadcast() && addressed_here {
            // Unicast reached its destination; nothing further to relay.
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            return Ok(RouteOutcome::Deliver(packet));
        }

        // Remaining cases: broadcast, or unicast not addressed here. A
        // packet may only be forwarded if decrementing its ttl would leave
        // it above zero, i.e. ttl > 1 — not merely ttl > 0 — so a relayed
        // copy is never itself transmitted with ttl == 0.
        let can_relay = packet.ttl > 1 && self.relay_enabled;

        if packet.is_broadcast() {
            // Broadcasts are always dispatched locally regardless of relay
            // policy; only the onward-forward half is conditional.
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            if can_relay {
                self.counters.relayed.fetch_add(1, Ordering::Relaxed);
                let relay = packet.forwarded(packet.ttl - 1);
                debug!(sender = %packet.sender_id, ttl = relay.ttl, "relaying broadcast packet");
                Ok(RouteOutcome::DeliverAndRelay { deliver: packet, relay })
            } else {
                Ok(RouteOutcome::Deliver(packet))
            }
        } else if can_relay {
            self.counters.relayed.fetch_add(1, Ordering::Relaxed);
            let relay = packet.forwarded(packet.ttl - 1);
            debug!(sender = %relay.sender_id, ttl = relay.ttl, "relaying unicast packet");
            Ok(RouteOutcome::Relay(relay))
        } else if packet.ttl <= 1 {
            debug!(sender = %packet.sender_id, "dropping packet: ttl expired");
            Err(RouterError::TtlExpired)
        } else {
            self.counters.dropped_relay_disabled.fetch_add(1, Ordering::Relaxed);
            trace!(sender = %packet.sender_id, "dropping packet: relay disabled");
            Ok(RouteOutcome::Dropped)
        }
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.lock().unwrap().len()
    }
}

/// Extracts the wire message id for packet types whose payload begins
/// with a `u8`-length-prefixed id string — private messages, read
/// receipts, pings, and pongs all do, since each needs a stable id its
/// peer can reference. Keying dedup on this id rather than a content hash
/// means two distinct messages with identical bodies from the same sender
/// don't collide. Other packet types (public broadcasts, announces, file
/// and binary transfers) carry no such per-message id and fall back to
/// hashing the payload.
fn message_id_bytes(packet_type: PacketType, payload: &[u8]) -> Option<&[u8]> {
    match packet_type {
        PacketType::PrivateMessage | PacketType::ReadReceipt | PacketType::Ping | PacketType::Pong => {
            let len = *payload.first()? as usize;
            payload.get(1..1 + len)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketType;

    fn router() -> PacketRouter {
        PacketRouter::new(PeerId([0; 8]), 1024, Duration::from_secs(60), Duration::from_secs(30), true)
    }

    #[test]
    fn duplicate_broadcast_is_dropped_second_time() {
        let router = router();
        let packet = Packet::new_broadcast(PacketType::PublicMessage, PeerId([1; 8]), 3, b"hi".to_vec());
        assert!(matches!(
            router.handle_inbound(packet.clone()).unwrap(),
            RouteOutcome::DeliverAndRelay { .. }
        ));
        assert_eq!(router.handle_inbound(packet).unwrap(), RouteOutcome::Dropped);
    }

    #[test]
    fn ttl_zero_unicast_not_addressed_here_is_ttl_expired() {
        let router = router();
        let packet = Packet::new_unicast(
            PacketType::PrivateMessage,
            PeerId([1; 8]),
            PeerId([9; 8]),
            0,
            b"hi".to_vec(),
        );
        assert!(matches!(router.handle_inbound(packet), Err(RouterError::TtlExpired)));
    }

    #[test]
    fn unicast_addressed_here_is_delivered_not_relayed() {
        let router = router();
        let packet = Packet::new_unicast(
            PacketType::PrivateMessage,
            PeerId([1; 8]),
            PeerId([0; 8]),
            5,
            b"for me".to_vec(),
        );
        assert!(matches!(router.handle_inbound(packet).unwrap(), RouteOutcome::Deliver(_)));
    }

    #[test]
    fn broadcast_relays_with_decremented_ttl() {
        let router = router();
        let packet = Packet::new_broadcast(PacketType::PublicMessage, PeerId([1; 8]), 4, b"flood".to_vec());
        match router.handle_inbound(packet).unwrap() {
            RouteOutcome::DeliverAndRelay { relay, .. } => assert_eq!(relay.ttl, 3),
            other => panic!("expected DeliverAndRelay, got {other:?}"),
        }
    }

    #[test]
    fn fragment_is_buffered_until_complete() {
        let router = router();
        let fragments = Fragment::split(b"hello fragmented world", 4, [7; 16]);
        let last_index = fragments.len() - 1;
        for (i, fragment) in fragments.into_iter().enumerate() {
            let payload = fragment.encode().unwrap();
            let packet = Packet::new_broadcast(PacketType::Fragment, PeerId([2; 8]), 3, payload);
            let outcome = router.handle_inbound(packet).unwrap();
            if i == last_index {
                match outcome {
                    RouteOutcome::Reassembled { recipient_id, payload } => {
                        assert_eq!(recipient_id, None);
                        assert_eq!(payload, b"hello fragmented world");
                    }
                    other => panic!("expected Reassembled, got {other:?}"),
                }
            } else {
                assert_eq!(outcome, RouteOutcome::Buffered);
            }
        }
    }

    #[test]
    fn reassembled_private_fragment_carries_recipient() {
        let router = router();
        let fragments = Fragment::split(b"a longer ciphertext-shaped blob", 5, [8; 16]);
        let last_index = fragments.len() - 1;
        let mut outcome = None;
        for (i, fragment) in fragments.into_iter().enumerate() {
            let payload = fragment.encode().unwrap();
            let packet =
                Packet::new_unicast(PacketType::Fragment, PeerId([2; 8]), PeerId([0; 8]), 3, payload);
            let out = router.handle_inbound(packet).unwrap();
            if i == last_index {
                outcome = Some(out);
            }
        }
        match outcome.unwrap() {
            RouteOutcome::Reassembled { recipient_id, .. } => assert_eq!(recipient_id, Some(PeerId([0; 8]))),
            other => panic!("expected Reassembled, got {other:?}"),
        }
    }

    #[test]
    fn ttl_one_broadcast_is_delivered_but_not_relayed() {
        let router = router();
        let packet = Packet::new_broadcast(PacketType::PublicMessage, PeerId([1; 8]), 1, b"hi".to_vec());
        let expected = packet.clone();
        assert_eq!(router.handle_inbound(packet).unwrap(), RouteOutcome::Deliver(expected));
    }

    #[test]
    fn ttl_one_unicast_not_addressed_here_is_ttl_expired() {
        let router = router();
        let packet = Packet::new_unicast(
            PacketType::PrivateMessage,
            PeerId([1; 8]),
            PeerId([9; 8]),
            1,
            b"hi".to_vec(),
        );
        assert!(matches!(router.handle_inbound(packet), Err(RouterError::TtlExpired)));
    }

    #[test]
    fn broadcast_still_delivered_locally_when_relay_disabled() {
        let router = PacketRouter::new(PeerId([0; 8]), 1024, Duration::from_secs(60), Duration::from_secs(30), false);
        let packet = Packet::new_broadcast(PacketType::PublicMessage, PeerId([1; 8]), 5, b"hi".to_vec());
        match router.handle_inbound(packet).unwrap() {
            RouteOutcome::Deliver(p) => assert_eq!(p.payload, b"hi"),
            other => panic!("expected Deliver, got {other:?}"),
        }
    }

    #[test]
    fn distinct_private_messages_with_identical_content_both_deliver() {
        let router = router();
        let sender = PeerId([1; 8]);
        let recipient = PeerId([0; 8]);

        let encode_with_id = |id: &str| {
            let mut w = crate::codec::Writer::new();
            w.write_str_u8(id).unwrap();
            w.write_str_u16("same content").unwrap();
            w.into_vec()
        };

        let first = Packet::new_unicast(PacketType::PrivateMessage, sender, recipient, 5, encode_with_id("m1"));
        let second = Packet::new_unicast(PacketType::PrivateMessage, sender, recipient, 5, encode_with_id("m2"));

        assert!(matches!(router.handle_inbound(first).unwrap(), RouteOutcome::Deliver(_)));
        assert!(matches!(router.handle_inbound(second).unwrap(), RouteOutcome::Deliver(_)));
    }

    #[test]
    fn repeated_private_message_with_same_id_is_still_deduped() {
        let router = router();
        let sender = PeerId([1; 8]);
        let recipient = PeerId([0; 8]);

        let mut w = crate::codec::Writer::new();
        w.write_str_u8("m1").unwrap();
        w.write_str_u16("hello").unwrap();
        let payload = w.into_vec();

        let packet = Packet::new_unicast(PacketType::PrivateMessage, sender, recipient, 5, payload);
        assert!(matches!(router.handle_inbound(packet.clone()).unwrap(), RouteOutcome::Deliver(_)));
        assert_eq!(router.handle_inbound(packet).unwrap(), RouteOutcome::Dropped);
    }

    #[test]
    fn stats_reflect_delivered_relayed_and_dropped_counts() {
        let router = router();
        let broadcast = Packet::new_broadcast(PacketType::PublicMessage, PeerId([1; 8]), 3, b"hi".to_vec());
        router.handle_inbound(broadcast.clone()).unwrap();
        router.handle_inbound(broadcast).unwrap(); // duplicate

        let stats = router.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.relayed, 1);
        assert_eq!(stats.dropped_duplicate, 1);
    }
}
