//! Noise_XX session state machine built on `snow`.
//!
//! Drives a three-message Noise_XX_25519_ChaChaPoly_SHA256 exchange to a
//! transport phase, and prefixes every transport record with an explicit
//! 8-byte big-endian nonce so a mesh relay that reorders packets is
//! rejected as a replay rather than silently desynchronizing snow's
//! internal counter.

use snow::{Builder, HandshakeState as SnowHandshakeState, TransportState};

use crate::error::NoiseError;

const NOISE_PARAMS: &str = "Noise_XX_25519_ChaChaPoly_SHA256";
const NONCE_LEN: usize = 8;

/// Role a session plays in the handshake; determines message ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

enum Inner {
    Handshaking(Box<SnowHandshakeState>),
    Established { transport: Box<TransportState>, send_nonce: u64, recv_nonce: Option<u64> },
    Failed,
}

/// One peer's Noise session. Not `Clone`; owned by the [`crate::session`]
/// registry keyed by peer id.
pub struct NoiseSession {
    role: Role,
    inner: Inner,
    remote_static: Option<[u8; 32]>,
}

impl NoiseSession {
    pub fn new_initiator(local_private_key: &[u8; 32]) -> Result<Self, NoiseError> {
        let handshake = Builder::new(NOISE_PARAMS.parse().map_err(noise_build_err)?)
            .local_private_key(local_private_key)
            .build_initiator()
            .map_err(noise_build_err)?;
        Ok(Self { role: Role::Initiator, inner: Inner::Handshaking(Box::new(handshake)), remote_static: None })
    }

    pub fn new_responder(local_private_key: &[u8; 32]) -> Result<Self, NoiseError> {
        let handshake = Builder::new(NOISE_PARAMS.parse().map_err(noise_build_err)?)
            .local_private_key(local_private_key)
            .build_responder()
            .map_err(noise_build_err)?;
        Ok(Self { role: Role::Responder, inner: Inner::Handshaking(Box::new(handshake)), remote_static: None })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_established(&self) -> bool {
        matches!(self.inner, Inner::Established { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.inner, Inner::Failed)
    }

    pub fn remote_static_key(&self) -> Option<&[u8; 32]> {
        self.remote_static.as_ref()
    }

    /// Produces the next outbound handshake message, or `None` once this
    /// side has nothing further to send this round.
    pub fn write_handshake_message(&mut self) -> Result<Vec<u8>, NoiseError> {
        let Inner::Handshaking(hs) = &mut self.inner else {
            return Err(NoiseError::OutOfOrder { expected: "handshaking", actual: "established-or-failed" });
        };
        let mut buf = vec![0u8; 1024];
        let len = hs.write_message(&[], &mut buf).map_err(|e| {
            self.inner = Inner::Failed;
            NoiseError::HandshakeFailed(e.to_string())
        })?;
        buf.truncate(len);
        self.maybe_finalize()?;
        Ok(buf)
    }

    /// Consumes an inbound handshake message.
    pub fn read_handshake_message(&mut self, message: &[u8]) -> Result<(), NoiseError> {
        let Inner::Handshaking(hs) = &mut self.inner else {
            return Err(NoiseError::OutOfOrder { expected: "handshaking", actual: "established-or-failed" });
        };
        let mut buf = vec![0u8; message.len().max(64)];
        hs.read_message(message, &mut buf).map_err(|e| {
            self.inner = Inner::Failed;
            NoiseError::HandshakeFailed(e.to_string())
        })?;
        self.maybe_finalize()?;
        Ok(())
    }

    fn maybe_finalize(&mut self) -> Result<(), NoiseError> {
        let is_handshake_finished = matches!(&self.inner, Inner::Handshaking(hs) if hs.is_handshake_finished());
        if !is_handshake_finished {
            return Ok(());
        }
        let Inner::Handshaking(hs) = std::mem::replace(&mut self.inner, Inner::Failed) else {
            unreachable!()
        };
        let remote_static: Option<[u8; 32]> =
            hs.get_remote_static().and_then(|s| s.try_into().ok());
        let transport = hs.into_transport_mode().map_err(|e| NoiseError::HandshakeFailed(e.to_string()))?;
        self.remote_static = remote_static;
        self.inner = Inner::Established { transport: Box::new(transport), send_nonce: 0, recv_nonce: None };
        Ok(())
    }

    /// Encrypts `plaintext` into a record: `[8-byte BE nonce][ciphertext+tag]`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let Inner::Established { transport, send_nonce, .. } = &mut self.inner else {
            return Err(NoiseError::NotEstablished);
        };
        let mut ciphertext = vec![0u8; plaintext.len() + 16];
        let len = transport
            .write_message(plaintext, &mut ciphertext)
            .map_err(|_| NoiseError::DecryptFailed)?;
        ciphertext.truncate(len);

        let nonce = *send_nonce;
        *send_nonce += 1;

        let mut record = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        record.extend_from_slice(&nonce.to_be_bytes());
        record.extend_from_slice(&ciphertext);
        Ok(record)
    }

    /// Decrypts a record produced by [`Self::encrypt`], rejecting any nonce
    /// that does not strictly exceed the last one accepted from this peer.
    pub fn decrypt(&mut self, record: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let Inner::Established { transport, recv_nonce, .. } = &mut self.inner else {
            return Err(NoiseError::NotEstablished);
        };
        if record.len() < NONCE_LEN {
            return Err(NoiseError::DecryptFailed);
        }
        let nonce = u64::from_be_bytes(record[..NONCE_LEN].try_into().unwrap());
        if let Some(last) = *recv_nonce {
            if nonce <= last {
                return Err(NoiseError::NonceReplay { seen: nonce, last });
            }
        }

        let ciphertext = &record[NONCE_LEN..];
        let mut plaintext = vec![0u8; ciphertext.len()];
        let len = transport
            .read_message(ciphertext, &mut plaintext)
            .map_err(|_| NoiseError::DecryptFailed)?;
        plaintext.truncate(len);

        *recv_nonce = Some(nonce);
        Ok(plaintext)
    }
}

fn noise_build_err(e: impl std::fmt::Display) -> NoiseError {
    NoiseError::HandshakeFailed(e.to_string())
}

/// Generates a fresh X25519 static keypair in the form `snow` expects.
pub fn generate_static_keypair() -> ([u8; 32], [u8; 32]) {
    let builder = Builder::new(NOISE_PARAMS.parse().expect("static noise params string"));
    let keypair = builder.generate_keypair().expect("keypair generation");
    let mut private = [0u8; 32];
    let mut public = [0u8; 32];
    private.copy_from_slice(&keypair.private);
    public.copy_from_slice(&keypair.public);
    (private, public)
}
