//! Per-peer Noise session registry.
//!
//! A struct of `tokio::sync::Mutex`-guarded maps exposed through
//! `async fn`s, rather than routing everything through a message-passing
//! actor loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::SessionError;
use crate::keystore::KeyStore;
use crate::noise::{NoiseSession, Role};
use crate::types::PeerId;

/// The local Noise static private key. Not `Copy`/`Clone` so it can't be
/// silently duplicated outside this struct, and zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct StaticPrivateKey([u8; 32]);

impl StaticPrivateKey {
    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

struct PeerEntry {
    session: NoiseSession,
    handshake_failures: u32,
    established_at: Option<Instant>,
    /// Set when this entry enters `Handshaking` and cleared on
    /// establishment; used to expire a handshake that never completes.
    handshake_started_at: Option<Instant>,
}

impl PeerEntry {
    fn fresh_handshaking(session: NoiseSession) -> Self {
        Self { session, handshake_failures: 0, established_at: None, handshake_started_at: Some(Instant::now()) }
    }
}

/// Owns the local static key and every peer's Noise session.
pub struct SessionManager {
    keystore: Arc<dyn KeyStore>,
    local_private_key: StaticPrivateKey,
    sessions: Mutex<HashMap<PeerId, PeerEntry>>,
    max_handshake_failures: u32,
    /// Window after establishing a session during which a fresh handshake
    /// message from the same peer is tolerated as a legitimate restart
    /// rather than rejected as a downgrade attempt.
    downgrade_grace: Duration,
    /// Bound on how long an incomplete handshake is kept around; a stale
    /// one is discarded and treated as if it never started, per spec
    /// §5's cancellation-and-timeouts policy.
    handshake_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        keystore: Arc<dyn KeyStore>,
        max_handshake_failures: u32,
        downgrade_grace: Duration,
    ) -> Result<Self, SessionError> {
        Self::with_handshake_timeout(keystore, max_handshake_failures, downgrade_grace, Duration::from_secs(10))
    }

    pub fn with_handshake_timeout(
        keystore: Arc<dyn KeyStore>,
        max_handshake_failures: u32,
        downgrade_grace: Duration,
        handshake_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let local_private_key = keystore
            .get_or_create_identity_key()
            .map_err(|e| SessionError::Noise(crate::error::NoiseError::HandshakeFailed(e.to_string())))?;
        Ok(Self {
            keystore,
            local_private_key: StaticPrivateKey(local_private_key),
            sessions: Mutex::new(HashMap::new()),
            max_handshake_failures,
            downgrade_grace,
            handshake_timeout,
        })
    }

    /// Whether `entry` is a handshake still in progress past the
    /// configured timeout — callers treat this the same as `Failed`.
    fn is_stale(&self, entry: &PeerEntry) -> bool {
        !entry.session.is_established()
            && entry.handshake_started_at.is_some_and(|at| at.elapsed() >= self.handshake_timeout)
    }

    pub fn local_private_key(&self) -> &[u8; 32] {
        self.local_private_key.as_bytes()
    }

    pub async fn has_established_session(&self, peer: &PeerId) -> bool {
        self.sessions.lock().await.get(peer).is_some_and(|e| e.session.is_established())
    }

    /// Begins a handshake as initiator, returning the first wire message.
    pub async fn initiate_handshake(&self, peer: PeerId) -> Result<Vec<u8>, SessionError> {
        let mut session = NoiseSession::new_initiator(self.local_private_key.as_bytes())?;
        let msg = session.write_handshake_message()?;
        let mut sessions = self.sessions.lock().await;
        sessions.insert(peer, PeerEntry::fresh_handshaking(session));
        Ok(msg)
    }

    /// Handles an inbound handshake message, creating a responder session
    /// if none exists yet for this peer. Returns an outbound reply if the
    /// handshake calls for one.
    ///
    /// Rejects the message outright if a healthy, already-established
    /// session exists and the grace window since it was established has
    /// elapsed — an attempt to downgrade an authenticated peer back to
    /// plaintext handshake state. A handshake that has been in progress
    /// longer than the configured timeout is discarded first and treated
    /// as if this peer had no prior session.
    pub async fn handle_incoming_handshake(
        &self,
        peer: PeerId,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, SessionError> {
        let mut sessions = self.sessions.lock().await;

        if sessions.get(&peer).is_some_and(|e| self.is_stale(e)) {
            debug!(peer = %peer, "discarding stale in-progress handshake");
            sessions.remove(&peer);
        }

        if let Some(entry) = sessions.get(&peer) {
            if entry.session.is_established() {
                let within_grace = entry
                    .established_at
                    .map(|at| at.elapsed() < self.downgrade_grace)
                    .unwrap_or(false);
                if !within_grace {
                    warn!(peer = %peer, "rejecting handshake message: session already established and healthy");
                    return Err(SessionError::DowngradeRejected);
                }
                debug!(peer = %peer, "accepting handshake restart within downgrade grace window");
            }
        }

        let entry = sessions.entry(peer).or_insert_with(|| {
            PeerEntry::fresh_handshaking(
                NoiseSession::new_responder(self.local_private_key.as_bytes())
                    .expect("noise params are a static valid string"),
            )
        });

        match entry.session.read_handshake_message(message) {
            Ok(()) => {}
            Err(e) => {
                entry.handshake_failures += 1;
                warn!(peer = %peer, failures = entry.handshake_failures, error = %e, "handshake message rejected");
                if entry.handshake_failures >= self.max_handshake_failures {
                    warn!(peer = %peer, "marking peer unreachable after repeated handshake failures");
                    return Err(SessionError::PeerUnreachable);
                }
                return Err(SessionError::Noise(e));
            }
        }

        if entry.session.is_established() {
            entry.established_at = Some(Instant::now());
            return Ok(None);
        }

        let reply = match entry.session.role() {
            Role::Responder => Some(entry.session.write_handshake_message()?),
            Role::Initiator => None,
        };
        if entry.session.is_established() {
            entry.established_at = Some(Instant::now());
        }
        Ok(reply)
    }

    /// Continues our own handshake after receiving the peer's reply; used
    /// by the initiator for the XX pattern's middle/final messages.
    pub async fn continue_handshake(&self, peer: &PeerId, message: &[u8]) -> Result<Option<Vec<u8>>, SessionError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(peer).is_some_and(|e| self.is_stale(e)) {
            debug!(peer = %peer, "handshake timed out before completion");
            sessions.remove(peer);
            return Err(SessionError::HandshakeTimeout);
        }
        let entry = sessions.get_mut(peer).ok_or(SessionError::NoSession)?;
        entry.session.read_handshake_message(message)?;
        if entry.session.is_established() {
            entry.established_at = Some(Instant::now());
            return Ok(None);
        }
        let reply = entry.session.write_handshake_message()?;
        if entry.session.is_established() {
            entry.established_at = Some(Instant::now());
        }
        Ok(Some(reply))
    }

    pub async fn encrypt(&self, peer: &PeerId, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(peer).ok_or(SessionError::NoSession)?;
        Ok(entry.session.encrypt(plaintext)?)
    }

    /// Decrypts a record from `peer`. On failure the session is discarded
    /// immediately — the next outbound attempt to this peer triggers a
    /// fresh XX handshake, per the rehandshake-on-failure policy.
    pub async fn decrypt(&self, peer: &PeerId, record: &[u8]) -> Result<Vec<u8>, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(peer).ok_or(SessionError::NoSession)?;
        match entry.session.decrypt(record) {
            Ok(plaintext) => Ok(plaintext),
            Err(e) => {
                warn!(peer = %peer, error = %e, "decrypt failed, dropping session; next send retriggers a handshake");
                sessions.remove(peer);
                Err(SessionError::Noise(e))
            }
        }
    }

    pub async fn remove_session(&self, peer: &PeerId) {
        self.sessions.lock().await.remove(peer);
    }

    pub async fn established_peers(&self) -> Vec<PeerId> {
        self.sessions
            .lock()
            .await
            .iter()
            .filter(|(_, e)| e.session.is_established())
            .map(|(peer, _)| *peer)
            .collect()
    }

    pub fn keystore(&self) -> &Arc<dyn KeyStore> {
        &self.keystore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemoryKeyStore::default()), 5, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn full_handshake_then_encrypt_decrypt() {
        let alice = manager();
        let bob = manager();
        let peer_of_bob_at_alice = PeerId::random();
        let peer_of_alice_at_bob = PeerId::random();

        let msg0 = alice.initiate_handshake(peer_of_bob_at_alice).await.unwrap();
        let msg1 = bob.handle_incoming_handshake(peer_of_alice_at_bob, &msg0).await.unwrap().unwrap();
        let msg2 = alice.continue_handshake(&peer_of_bob_at_alice, &msg1).await.unwrap().unwrap();
        let reply = bob.handle_incoming_handshake(peer_of_alice_at_bob, &msg2).await.unwrap();
        assert!(reply.is_none());

        assert!(alice.has_established_session(&peer_of_bob_at_alice).await);
        assert!(bob.has_established_session(&peer_of_alice_at_bob).await);

        let record = alice.encrypt(&peer_of_bob_at_alice, b"hi bob").await.unwrap();
        let plaintext = bob.decrypt(&peer_of_alice_at_bob, &record).await.unwrap();
        assert_eq!(plaintext, b"hi bob");
    }

    #[tokio::test]
    async fn decrypt_without_session_is_no_session_error() {
        let bob = manager();
        let err = bob.decrypt(&PeerId::random(), b"junk").await.unwrap_err();
        assert!(matches!(err, SessionError::NoSession));
    }
}
