//! Recognized configuration knobs, collected into a single `Config`
//! struct rather than freestanding `const`s since every value here is
//! meant to be overridable per deployment, not compiled in.

use std::time::Duration;

/// Default BLE transport MTU in bytes; the router fragments payloads
/// exceeding `max_fragment_size` before handing them to a transport.
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 400;

#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum size of any single decoded payload, bytes.
    pub max_message_size: usize,
    /// Default TTL stamped on locally originated broadcast packets, 1..=7.
    pub default_ttl: u8,
    /// Minimum time between resend attempts for a single outbox entry.
    pub resend_cooldown: Duration,
    /// Window after a session is established during which a fresh
    /// handshake message from the same peer is tolerated as a legitimate
    /// restart rather than rejected as a downgrade attempt.
    pub downgrade_grace: Duration,
    /// Bound on how long an incomplete handshake is kept around before
    /// it's discarded and the next send retriggers a fresh one.
    pub handshake_timeout: Duration,
    /// Fragment reassembly timeout; partials are discarded after this.
    pub reassembly_timeout: Duration,
    /// Dedup retention window.
    pub dedup_window: Duration,
    /// Dedup store capacity (entries); must be at least 1024.
    pub dedup_capacity: usize,
    /// Whether this node forwards packets not addressed to it.
    pub relay_enabled: bool,
    /// Maximum fragment payload size, 128..=4096.
    pub max_fragment_size: usize,
    /// Consecutive handshake failures before a peer is marked PeerUnreachable.
    pub max_handshake_failures: u32,
    /// Consecutive malformed frames from one peer before it is marked
    /// PeerUnreachable, mirroring the handshake-failure escalation.
    pub max_malformed_frames: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: 500_000,
            default_ttl: 7,
            resend_cooldown: Duration::from_millis(5_000),
            downgrade_grace: Duration::from_millis(10_000),
            handshake_timeout: Duration::from_millis(10_000),
            reassembly_timeout: Duration::from_millis(30_000),
            dedup_window: Duration::from_secs(60),
            dedup_capacity: 1024,
            relay_enabled: true,
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            max_handshake_failures: 5,
            max_malformed_frames: 10,
        }
    }
}

impl Config {
    /// Validates configured bounds; used by callers that build a `Config`
    /// from untrusted/user-supplied values (e.g. a config file).
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=7).contains(&self.default_ttl) {
            return Err(format!("default_ttl {} out of range 1..=7", self.default_ttl));
        }
        if !(128..=4096).contains(&self.max_fragment_size) {
            return Err(format!(
                "max_fragment_size {} out of range 128..=4096",
                self.max_fragment_size
            ));
        }
        if self.dedup_capacity < 1024 {
            return Err(format!("dedup_capacity {} below floor of 1024", self.dedup_capacity));
        }
        if self.dedup_window < Duration::from_secs(60) {
            return Err("dedup_window below floor of 60s".into());
        }
        Ok(())
    }
}
