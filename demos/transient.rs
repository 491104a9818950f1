//! Example: Transient sessions
//!
//! Each command opens, authenticates, runs and closes its own connection,
//! unless it asks to keep the connection open for a follow-up.
//!
//! Run with: cargo run --example transient -- 127.0.0.1:9051 secret

use std::time::Duration;
use tor_session::{
    CommandOptions, ConnectionAddress, Result, SessionConfig, Signal, TorSession,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let address = match args.next() {
        Some(addr) => ConnectionAddress::parse(&addr)?,
        None => ConnectionAddress::default(),
    };

    let mut config = SessionConfig::new()
        .address(address)
        .persistent(false)
        .command_timeout(Duration::from_secs(10));
    if let Some(password) = args.next() {
        config = config.password(password);
    }
    let session = TorSession::new(config);

    // Two commands on one connection
    let version = session
        .send_command_with("GETINFO version", CommandOptions::keep_open())
        .await?;
    println!("{}", version.message());
    println!("State after keep_open: {}", session.state());

    let info = session.get_info(&["traffic/read", "traffic/written"]).await?;
    for (key, value) in &info {
        println!("{} = {}", key, value);
    }
    println!("State after last command: {}", session.state());

    // A fresh connection for this one
    session.signal(Signal::NewNym).await?;
    println!("New identity requested");

    Ok(())
}
