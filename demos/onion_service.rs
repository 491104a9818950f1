//! Example: Create an ephemeral onion service
//!
//! Publishes port 80 of a new onion service, forwarding to a local port, and
//! removes it again on Ctrl+C.
//!
//! Run with: TOR_CONTROL_PASSWORD=secret cargo run --example onion_service -- 8080

use tor_session::{AddOnion, EventType, OnionFlag, Result, TorSession};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let local_port: u16 = std::env::args()
        .nth(1)
        .and_then(|port| port.parse().ok())
        .unwrap_or(8080);

    let session = TorSession::from_env()?;

    // Descriptor uploads are reported as HS_DESC events
    session
        .register(EventType::HsDesc, |event| {
            println!("[HS_DESC] {}", event.payload);
        })
        .await?;

    let request = AddOnion::new()
        .flag(OnionFlag::DiscardPK)
        .port(80, format!("127.0.0.1:{}", local_port));
    let service = session.add_onion(&request).await?;

    println!("Onion service: http://{}", service.address.full_address());
    println!("Forwarding to 127.0.0.1:{} (Ctrl+C to remove)", local_port);

    tokio::signal::ctrl_c().await?;

    session.del_onion(&service.address).await?;
    println!("Onion service removed");
    session.disconnect(false).await
}
