//! Example: Monitor Tor events
//!
//! Subscribes to circuit and bandwidth events and prints them until Ctrl+C.
//! The session reconnects and resubscribes on its own if the daemon restarts
//! while a command is being sent.
//!
//! Run with: TOR_CONTROL_PASSWORD=secret cargo run --example events

use tor_session::{EventType, Result, SessionNotification, TorSession};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let session = TorSession::from_env()?;
    let mut notifications = session.notifications();

    session
        .register(EventType::Circ, |event| {
            let args = event.positional();
            let id = args.first().copied().unwrap_or("?");
            let status = args.get(1).copied().unwrap_or("?");
            let purpose = event.key_values().remove("PURPOSE").unwrap_or_default();
            println!("[CIRCUIT] {} {} {}", id, status, purpose);
        })
        .await?;

    session
        .register(EventType::Bw, |event| {
            let args = event.positional();
            println!(
                "[BANDWIDTH] read {} B/s, written {} B/s",
                args.first().copied().unwrap_or("0"),
                args.get(1).copied().unwrap_or("0")
            );
        })
        .await?;

    println!(
        "Subscribed to {:?}; waiting for events (Ctrl+C to exit)",
        session.subscribed_events()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notification = notifications.recv() => {
                if let Ok(SessionNotification::Ended) = notification {
                    println!("Control connection ended");
                    break;
                }
            }
        }
    }

    session.clear_events().await.ok();
    session.disconnect(false).await
}
