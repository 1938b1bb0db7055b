//! Ties the session, packet router, outbox, and transport together: the
//! entry point an application calls to send a private message and the
//! receiving end calls to feed inbound frames through decrypt + route.
//!
//! The resend cooldown bookkeeping here uses a fixed delay rather than
//! exponential backoff, since a flush pass just needs "don't hammer a
//! peer every tick", not connection-level backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::codec::fragment::Fragment;
use crate::codec::{Packet, PacketType};
use crate::config::Config;
use crate::error::{CoreError, PeerTag, SessionError};
use crate::outbox::{Outbox, OutboxEntry};
use crate::payload::{PrivateMessage, ReadReceipt};
use crate::router::{PacketRouter, RouteOutcome};
use crate::session::SessionManager;
use crate::transport::{Reachability, Transport};
use crate::types::{now_ms, random_transfer_id, PeerId};

pub struct MessageRouter {
    local_peer: PeerId,
    config: Config,
    sessions: Arc<SessionManager>,
    packet_router: Arc<PacketRouter>,
    outbox: Arc<Outbox>,
    transport: Arc<dyn Transport>,
    last_attempt: Mutex<HashMap<(PeerId, String), Instant>>,
    /// Consecutive malformed-frame counts per sender, mirroring the
    /// session layer's handshake-failure escalation to PeerUnreachable.
    malformed_frames: Mutex<HashMap<PeerId, u32>>,
}

impl MessageRouter {
    pub fn new(
        local_peer: PeerId,
        config: Config,
        sessions: Arc<SessionManager>,
        packet_router: Arc<PacketRouter>,
        outbox: Arc<Outbox>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            local_peer,
            config,
            sessions,
            packet_router,
            outbox,
            transport,
            last_attempt: Mutex::new(HashMap::new()),
            malformed_frames: Mutex::new(HashMap::new()),
        }
    }

    /// Sends a private message to `peer`, going out immediately over an
    /// established session if one exists and the transport reports the
    /// peer connected or reachable; otherwise the encoded message is
    /// persisted to the outbox for later delivery.
    ///
    /// Starting a new send for this peer resets any resend cooldown for
    /// its queue, so a fresh message doesn't wait behind a stale timer.
    pub async fn send_private(&self, peer: PeerId, message: PrivateMessage) -> Result<(), CoreError> {
        self.reset_send_state(&peer);

        let plaintext = message.encode()?;
        let entry = OutboxEntry {
            message_id: message.message_id.clone(),
            peer_id: peer,
            payload: plaintext.clone(),
            created_at_ms: now_ms(),
            sent_at_ms: None,
            attempt_count: 0,
        };
        self.outbox.enqueue(&entry).map_err(CoreError::from)?;

        self.try_send_one(&entry).await
    }

    /// Clears resend-cooldown bookkeeping for `peer`. Called on reconnect
    /// or after a fresh handshake so queued sends aren't held back by a
    /// cooldown measured against the old, now-irrelevant connection.
    pub fn reset_send_state(&self, peer: &PeerId) {
        self.last_attempt.lock().unwrap().retain(|(p, _), _| p != peer);
    }

    /// Attempts to flush every pending entry for `peer`, respecting the
    /// per-entry resend cooldown. Entries are sent oldest-first.
    pub async fn flush_outbox(&self, peer: &PeerId) -> Result<usize, CoreError> {
        let pending = self.outbox.pending_for_peer(peer).map_err(CoreError::from)?;
        let mut sent = 0;
        for entry in pending {
            if self.try_send_one(&entry).await.is_ok() {
                sent += 1;
            }
        }
        Ok(sent)
    }

    async fn try_send_one(&self, entry: &OutboxEntry) -> Result<(), CoreError> {
        let key = (entry.peer_id, entry.message_id.clone());
        {
            let last_attempt = self.last_attempt.lock().unwrap();
            if let Some(at) = last_attempt.get(&key) {
                if at.elapsed() < self.config.resend_cooldown {
                    return Err(CoreError::PeerUnreachable(PeerTag(entry.peer_id.to_hex())));
                }
            }
        }

        if self.transport.reachability(&entry.peer_id) == Reachability::Unreachable {
            return Err(CoreError::PeerUnreachable(PeerTag(entry.peer_id.to_hex())));
        }

        let record = match self.sessions.encrypt(&entry.peer_id, &entry.payload).await {
            Ok(record) => record,
            Err(SessionError::NoSession) => {
                // No session yet; kick off a handshake and leave this entry
                // queued so a later flush picks it up once it completes.
                debug!(peer = %entry.peer_id, "no established session, starting handshake");
                self.start_handshake(entry.peer_id).await?;
                return Err(CoreError::PeerUnreachable(PeerTag(entry.peer_id.to_hex())));
            }
            Err(e) => return Err(CoreError::from(e)),
        };

        if record.len() <= self.config.max_fragment_size {
            let packet = Packet::new_unicast(
                PacketType::NoiseEncrypted,
                self.local_peer,
                entry.peer_id,
                self.config.default_ttl,
                record,
            );
            let frame = packet.encode()?;
            self.transport.send_frame(entry.peer_id, &frame).map_err(|_| {
                debug!(peer = %entry.peer_id, message_id = %entry.message_id, "transport backpressure, leaving entry queued");
                CoreError::TransportBackpressure(PeerTag(entry.peer_id.to_hex()))
            })?;
        } else {
            // The encrypted record doesn't fit a single frame; split it
            // into Fragment packets sharing a fresh transfer id. The
            // transport contract forbids reordering same-destination
            // sends, so submitting these in order is sufficient.
            let transfer_id = random_transfer_id();
            for fragment in Fragment::split(&record, self.config.max_fragment_size, transfer_id) {
                let packet = Packet::new_unicast(
                    PacketType::Fragment,
                    self.local_peer,
                    entry.peer_id,
                    self.config.default_ttl,
                    fragment.encode()?,
                );
                let frame = packet.encode()?;
                self.transport
                    .send_frame(entry.peer_id, &frame)
                    .map_err(|_| CoreError::TransportBackpressure(PeerTag(entry.peer_id.to_hex())))?;
            }
        }

        self.last_attempt.lock().unwrap().insert(key, Instant::now());
        self.outbox
            .record_attempt(&entry.peer_id, &entry.message_id, now_ms())
            .map_err(CoreError::from)?;
        Ok(())
    }

    /// Starts a fresh handshake as initiator and sends the first wire
    /// message to `peer`. A failure to transmit is not fatal here: the
    /// handshake message itself will simply need to be retried the next
    /// time a send to this peer is attempted.
    async fn start_handshake(&self, peer: PeerId) -> Result<(), CoreError> {
        let msg0 = self.sessions.initiate_handshake(peer).await.map_err(CoreError::from)?;
        let packet = Packet::new_unicast(PacketType::NoiseHandshake, self.local_peer, peer, self.config.default_ttl, msg0);
        let frame = packet.encode()?;
        let _ = self.transport.send_frame(peer, &frame);
        Ok(())
    }

    /// Feeds an inbound handshake message through the session manager,
    /// replying over the transport when the exchange calls for one, and
    /// flushes any queued outbox entries once the session is established.
    ///
    /// Tries `continue_handshake` (the initiator's own in-progress
    /// exchange) first and falls back to `handle_incoming_handshake` (a
    /// fresh or responder exchange) on `NoSession`, since both are
    /// role-agnostic past the first message and only the no-entry-yet case
    /// needs to distinguish them.
    async fn handle_inbound_handshake(&self, from: PeerId, message: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
        let reply = match self.sessions.continue_handshake(&from, message).await {
            Ok(reply) => reply,
            Err(SessionError::NoSession) => {
                self.sessions.handle_incoming_handshake(from, message).await.map_err(CoreError::from)?
            }
            Err(e) => return Err(CoreError::from(e)),
        };

        if let Some(msg) = reply {
            let packet = Packet::new_unicast(PacketType::NoiseHandshake, self.local_peer, from, self.config.default_ttl, msg);
            let frame = packet.encode()?;
            let _ = self.transport.send_frame(from, &frame);
        }

        if self.sessions.has_established_session(&from).await {
            self.reset_send_state(&from);
            let _ = self.flush_outbox(&from).await;
        }

        Ok(None)
    }

    /// Removes the outbox entry acknowledged by an inbound read receipt.
    pub fn handle_read_receipt(&self, from: PeerId, receipt: &ReadReceipt) -> Result<(), CoreError> {
        self.outbox
            .confirm_delivery(&from, &receipt.original_message_id)
            .map_err(CoreError::from)?;
        Ok(())
    }

    /// Feeds one inbound frame from `from` through decrypt and routing,
    /// returning the decrypted application payload when one was ready for
    /// delivery (fragments still being reassembled yield `None`).
    pub async fn handle_inbound_frame(&self, from: PeerId, frame: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
        let packet = match Packet::decode(frame) {
            Ok(packet) => {
                self.malformed_frames.lock().unwrap().remove(&from);
                packet
            }
            Err(e) => {
                let mut counts = self.malformed_frames.lock().unwrap();
                let count = counts.entry(from).or_insert(0);
                *count += 1;
                debug!(peer = %from, count = *count, error = %e, "dropping malformed frame");
                if *count >= self.config.max_malformed_frames {
                    warn!(peer = %from, "marking peer unreachable after repeated malformed frames");
                    return Err(CoreError::PeerUnreachable(PeerTag(from.to_hex())));
                }
                return Err(CoreError::from(e));
            }
        };

        // NoiseHandshake is point-to-point and never flooded: each message
        // depends on the peer's in-progress handshake state rather than
        // carrying a self-contained id, so a legitimate retry can be
        // bit-identical to the original and must not be dedup-dropped.
        // Everything else — including NoiseEncrypted — goes through the
        // packet router's dedup/recipient/TTL pipeline first, so a
        // duplicate delivery of the same ciphertext is dropped before it
        // ever reaches `sessions.decrypt`, and a unicast frame not
        // addressed to us is relayed untouched instead of decrypted with
        // the wrong peer's session.
        if packet.packet_type == PacketType::NoiseHandshake {
            return self.handle_inbound_handshake(from, &packet.payload).await;
        }

        match self.packet_router.handle_inbound(packet).map_err(CoreError::from)? {
            RouteOutcome::Deliver(p) => self.deliver_or_decrypt(from, p).await,
            RouteOutcome::DeliverAndRelay { deliver, relay } => {
                self.relay_onward(from, &relay)?;
                self.deliver_or_decrypt(from, deliver).await
            }
            RouteOutcome::Relay(relay) => {
                self.relay_onward(from, &relay)?;
                Ok(None)
            }
            RouteOutcome::Reassembled { recipient_id, payload } => {
                match recipient_id {
                    Some(recipient) if recipient != self.local_peer => {
                        // Fragments aren't hop-relayed past reassembly; a
                        // recipient mismatch means this reassembled record
                        // isn't ours to decrypt.
                        debug!(peer = %from, "dropping reassembled fragment not addressed here");
                        Ok(None)
                    }
                    Some(_) => {
                        // Reassembled from Fragment packets carrying an
                        // encrypted record; decrypt before handing it back.
                        let plaintext = self.sessions.decrypt(&from, &payload).await.map_err(CoreError::from)?;
                        Ok(Some(plaintext))
                    }
                    None => Ok(Some(payload)),
                }
            }
            RouteOutcome::Buffered | RouteOutcome::Dropped => Ok(None),
        }
    }

    /// Decrypts `packet`'s payload if it's a `NoiseEncrypted` record,
    /// otherwise returns the (already-plaintext) payload as-is.
    async fn deliver_or_decrypt(&self, from: PeerId, packet: Packet) -> Result<Option<Vec<u8>>, CoreError> {
        if packet.packet_type == PacketType::NoiseEncrypted {
            let plaintext = self.sessions.decrypt(&from, &packet.payload).await.map_err(CoreError::from)?;
            Ok(Some(plaintext))
        } else {
            Ok(Some(packet.payload))
        }
    }

    fn relay_onward(&self, from: PeerId, relay: &Packet) -> Result<(), CoreError> {
        let relay_frame = relay.encode()?;
        for peer in self.transport.connected_peers() {
            if peer != from {
                let _ = self.transport.send_frame(peer, &relay_frame);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    async fn established_pair() -> (Arc<SessionManager>, Arc<SessionManager>, PeerId, PeerId) {
        let alice = Arc::new(SessionManager::new(Arc::new(MemoryKeyStore::default()), 5, Duration::from_secs(5)).unwrap());
        let bob = Arc::new(SessionManager::new(Arc::new(MemoryKeyStore::default()), 5, Duration::from_secs(5)).unwrap());
        let bob_id = PeerId::random();
        let alice_id = PeerId::random();

        let msg0 = alice.initiate_handshake(bob_id).await.unwrap();
        let msg1 = bob.handle_incoming_handshake(alice_id, &msg0).await.unwrap().unwrap();
        let msg2 = alice.continue_handshake(&bob_id, &msg1).await.unwrap().unwrap();
        bob.handle_incoming_handshake(alice_id, &msg2).await.unwrap();

        (alice, bob, bob_id, alice_id)
    }

    #[tokio::test]
    async fn send_private_delivers_immediately_when_connected() {
        let (alice_sessions, bob_sessions, bob_id, alice_id) = established_pair().await;
        let config = Config::default();

        let transport = Arc::new(MemoryTransport::new());
        transport.set_connected(bob_id, true);

        let packet_router =
            Arc::new(PacketRouter::new(alice_id, config.dedup_capacity, config.dedup_window, config.reassembly_timeout, true));
        let outbox = Arc::new(Outbox::open_in_memory().unwrap());
        let router = MessageRouter::new(
            alice_id,
            config,
            alice_sessions,
            packet_router,
            outbox.clone(),
            transport.clone(),
        );

        let message = PrivateMessage { message_id: "m1".into(), content: "hi bob".into() };
        router.send_private(bob_id, message).await.unwrap();

        let sent = transport.sent_frames();
        assert_eq!(sent.len(), 1);

        let packet = Packet::decode(&sent[0].frame).unwrap();
        let plaintext = bob_sessions.decrypt(&alice_id, &packet.payload).await.unwrap();
        assert_eq!(PrivateMessage::decode(&plaintext).unwrap().content, "hi bob");

        // entry still present until a delivery receipt confirms it
        assert!(!outbox.pending_for_peer(&bob_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn large_private_message_is_fragmented_and_reassembles() {
        let (alice_sessions, bob_sessions, bob_id, alice_id) = established_pair().await;
        let mut config = Config::default();
        config.max_fragment_size = 128;

        let transport = Arc::new(MemoryTransport::new());
        transport.set_connected(bob_id, true);

        let packet_router =
            Arc::new(PacketRouter::new(alice_id, config.dedup_capacity, config.dedup_window, config.reassembly_timeout, true));
        let outbox = Arc::new(Outbox::open_in_memory().unwrap());
        let router = MessageRouter::new(alice_id, config, alice_sessions, packet_router, outbox, transport.clone());

        let content: String = std::iter::repeat('x').take(2000).collect();
        let message = PrivateMessage { message_id: "m1".into(), content };
        router.send_private(bob_id, message.clone()).await.unwrap();

        let sent = transport.sent_frames();
        assert!(sent.len() > 1, "expected the record to split into multiple fragment frames");

        let bob_router = PacketRouter::new(bob_id, 1024, Duration::from_secs(60), Duration::from_secs(30), true);
        let mut reassembled = None;
        for frame in &sent {
            let packet = Packet::decode(&frame.frame).unwrap();
            assert_eq!(packet.packet_type, PacketType::Fragment);
            if let RouteOutcome::Reassembled { payload, .. } = bob_router.handle_inbound(packet).unwrap() {
                reassembled = Some(payload);
            }
        }

        let record = reassembled.expect("all fragments delivered, should have reassembled");
        let plaintext = bob_sessions.decrypt(&alice_id, &record).await.unwrap();
        assert_eq!(PrivateMessage::decode(&plaintext).unwrap().content, message.content);
    }

    #[tokio::test]
    async fn send_private_establishes_session_over_the_wire_then_delivers() {
        let alice_id = PeerId::random();
        let bob_id = PeerId::random();
        let config = Config::default();

        let alice_sessions =
            Arc::new(SessionManager::new(Arc::new(MemoryKeyStore::default()), 5, Duration::from_secs(5)).unwrap());
        let bob_sessions =
            Arc::new(SessionManager::new(Arc::new(MemoryKeyStore::default()), 5, Duration::from_secs(5)).unwrap());

        let alice_transport = Arc::new(MemoryTransport::new());
        let bob_transport = Arc::new(MemoryTransport::new());
        alice_transport.set_connected(bob_id, true);
        bob_transport.set_connected(alice_id, true);

        let alice_router = MessageRouter::new(
            alice_id,
            config.clone(),
            alice_sessions,
            Arc::new(PacketRouter::new(alice_id, config.dedup_capacity, config.dedup_window, config.reassembly_timeout, true)),
            Arc::new(Outbox::open_in_memory().unwrap()),
            alice_transport.clone(),
        );
        let bob_router = MessageRouter::new(
            bob_id,
            config.clone(),
            bob_sessions,
            Arc::new(PacketRouter::new(bob_id, config.dedup_capacity, config.dedup_window, config.reassembly_timeout, true)),
            Arc::new(Outbox::open_in_memory().unwrap()),
            bob_transport.clone(),
        );

        let message = PrivateMessage { message_id: "m1".into(), content: "hello over the wire".into() };
        // No session yet: queued, and a handshake is kicked off instead.
        assert!(alice_router.send_private(bob_id, message.clone()).await.is_err());

        let msg0 = alice_transport.sent_frames().remove(0).frame;
        assert!(bob_router.handle_inbound_frame(alice_id, &msg0).await.unwrap().is_none());

        let msg1 = bob_transport.sent_frames().remove(0).frame;
        assert!(alice_router.handle_inbound_frame(bob_id, &msg1).await.unwrap().is_none());

        // Responding to msg1 both finished alice's handshake and flushed her
        // queued message, so alice's transport now holds [msg0, msg2, data].
        let alice_sent = alice_transport.sent_frames();
        assert_eq!(alice_sent.len(), 3);
        let msg2 = alice_sent[1].frame.clone();
        let data_frame = alice_sent[2].frame.clone();

        assert!(bob_router.handle_inbound_frame(alice_id, &msg2).await.unwrap().is_none());

        let delivered = bob_router.handle_inbound_frame(alice_id, &data_frame).await.unwrap();
        let plaintext = delivered.expect("data frame should decrypt once both sides are established");
        assert_eq!(PrivateMessage::decode(&plaintext).unwrap().content, message.content);
    }

    #[tokio::test]
    async fn send_private_queues_when_unreachable_then_flushes() {
        let (alice_sessions, _bob_sessions, bob_id, _alice_id) = established_pair().await;
        let config = Config::default();
        let transport = Arc::new(MemoryTransport::new());

        let packet_router =
            Arc::new(PacketRouter::new(PeerId::random(), config.dedup_capacity, config.dedup_window, config.reassembly_timeout, true));
        let outbox = Arc::new(Outbox::open_in_memory().unwrap());
        let router = MessageRouter::new(
            PeerId::random(),
            config,
            alice_sessions,
            packet_router,
            outbox.clone(),
            transport.clone(),
        );

        let message = PrivateMessage { message_id: "m1".into(), content: "queued".into() };
        let result = router.send_private(bob_id, message).await;
        assert!(result.is_err());
        assert_eq!(outbox.pending_for_peer(&bob_id).unwrap().len(), 1);

        transport.set_connected(bob_id, true);
        let flushed = router.flush_outbox(&bob_id).await.unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(transport.sent_frames().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_encrypted_frame_is_deduped_not_redelivered() {
        let (alice_sessions, bob_sessions, bob_id, alice_id) = established_pair().await;
        let config = Config::default();
        let transport = Arc::new(MemoryTransport::new());

        let packet_router =
            Arc::new(PacketRouter::new(alice_id, config.dedup_capacity, config.dedup_window, config.reassembly_timeout, true));
        let outbox = Arc::new(Outbox::open_in_memory().unwrap());
        let bob_router = MessageRouter::new(alice_id, config, bob_sessions, packet_router, outbox, transport);

        let record = alice_sessions.encrypt(&bob_id, b"hi bob").await.unwrap();
        let packet = Packet::new_unicast(PacketType::NoiseEncrypted, bob_id, alice_id, 5, record);
        let frame = packet.encode().unwrap();

        let first = bob_router.handle_inbound_frame(bob_id, &frame).await.unwrap();
        assert_eq!(first.as_deref(), Some(b"hi bob".as_slice()));

        // Same frame delivered again: deduped before it ever reaches
        // decrypt, so the session survives instead of being torn down by a
        // spurious nonce-replay failure.
        let second = bob_router.handle_inbound_frame(bob_id, &frame).await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn unicast_encrypted_frame_not_addressed_here_is_relayed_not_decrypted() {
        let (_alice_sessions, bob_sessions, _bob_id, _alice_id) = established_pair().await;
        let config = Config::default();
        let relay_node = PeerId::random();
        let actual_recipient = PeerId::random();
        let upstream_sender = PeerId::random();

        let transport = Arc::new(MemoryTransport::new());
        transport.set_connected(upstream_sender, true);
        transport.set_connected(actual_recipient, true);

        let packet_router =
            Arc::new(PacketRouter::new(relay_node, config.dedup_capacity, config.dedup_window, config.reassembly_timeout, true));
        let outbox = Arc::new(Outbox::open_in_memory().unwrap());
        let router = MessageRouter::new(relay_node, config, bob_sessions, packet_router, outbox, transport.clone());

        // Ciphertext addressed to someone other than this relay node; it
        // has no session with the real sender, so decrypting it here would
        // fail and incorrectly tear down state rather than simply relaying.
        let packet = Packet::new_unicast(
            PacketType::NoiseEncrypted,
            PeerId::random(),
            actual_recipient,
            5,
            b"opaque ciphertext".to_vec(),
        );
        let frame = packet.encode().unwrap();

        let delivered = router.handle_inbound_frame(upstream_sender, &frame).await.unwrap();
        assert_eq!(delivered, None);

        let relayed = transport.sent_frames();
        assert_eq!(relayed.len(), 1);
        assert_ne!(relayed[0].to, upstream_sender);
        let relayed_packet = Packet::decode(&relayed[0].frame).unwrap();
        assert_eq!(relayed_packet.packet_type, PacketType::NoiseEncrypted);
        assert_eq!(relayed_packet.payload, b"opaque ciphertext");
        assert_eq!(relayed_packet.ttl, 4);
    }

    #[tokio::test]
    async fn repeated_malformed_frames_mark_sender_unreachable() {
        let (alice_sessions, _bob_sessions, bob_id, _alice_id) = established_pair().await;
        let mut config = Config::default();
        config.max_malformed_frames = 3;

        let packet_router = Arc::new(PacketRouter::new(
            PeerId::random(),
            config.dedup_capacity,
            config.dedup_window,
            config.reassembly_timeout,
            true,
        ));
        let outbox = Arc::new(Outbox::open_in_memory().unwrap());
        let transport = Arc::new(MemoryTransport::new());
        let router = MessageRouter::new(PeerId::random(), config, alice_sessions, packet_router, outbox, transport);

        let mut last = None;
        for _ in 0..3 {
            last = router.handle_inbound_frame(bob_id, b"not a packet").await.err();
        }
        assert!(matches!(last, Some(CoreError::PeerUnreachable(_))));
    }
}
