//! Minimal node binary wiring the core together. Real transports (BLE,
//! a relay socket) are out of scope for this crate; this binary uses the
//! in-memory transport so `bitchat-node` can be started, inspected, and
//! exercised locally without external hardware.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use bitchat_core::config::Config;
use bitchat_core::keystore::FileKeyStore;
use bitchat_core::message_router::MessageRouter;
use bitchat_core::outbox::Outbox;
use bitchat_core::router::PacketRouter;
use bitchat_core::session::SessionManager;
use bitchat_core::transport::MemoryTransport;
use bitchat_core::types::PeerId;

#[derive(Parser)]
#[command(name = "bitchat-node", version, about = "BitChat mesh chat core — standalone node")]
struct Args {
    /// Directory for the identity key and outbox database.
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Maximum decoded payload size, bytes.
    #[arg(long)]
    max_message_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data directory {:?}", args.data_dir))?;

    let mut config = Config::default();
    if let Some(max) = args.max_message_size {
        config.max_message_size = max;
    }
    config.validate().map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;

    let keystore = Arc::new(FileKeyStore::new(&args.data_dir));
    let sessions = Arc::new(
        SessionManager::with_handshake_timeout(
            keystore,
            config.max_handshake_failures,
            config.downgrade_grace,
            config.handshake_timeout,
        )
        .context("initializing session manager")?,
    );

    let local_peer = PeerId::random();
    info!(peer_id = %local_peer, "node starting");

    let packet_router = Arc::new(PacketRouter::new(
        local_peer,
        config.dedup_capacity,
        config.dedup_window,
        config.reassembly_timeout,
        config.relay_enabled,
    ));
    let outbox = Arc::new(Outbox::open(args.data_dir.join("outbox"))?);
    let transport = Arc::new(MemoryTransport::new());

    let _router = MessageRouter::new(local_peer, config, sessions, packet_router, outbox, transport);

    info!("node ready; wire a Transport implementation to join a mesh");
    Ok(())
}
