//! BitChat core: Noise sessions, mesh packet routing, and the outbox-backed
//! message router that together move typed payloads between peers over an
//! arbitrary set of transports (BLE, relay, or anything else implementing
//! [`transport::Transport`]).
//!
//! This crate is the offline-capable mesh chat CORE. UI, discovery, and the
//! concrete transports are external collaborators; see `transport` for the
//! interface they must implement.

pub mod codec;
pub mod config;
pub mod error;
pub mod favorites;
pub mod keystore;
pub mod message_router;
pub mod noise;
pub mod outbox;
pub mod payload;
pub mod router;
pub mod session;
pub mod transport;
pub mod types;

pub use config::Config;
pub use error::CoreError;
pub use types::PeerId;
