//! # tor-session
//!
//! A session-oriented async client for the Tor control protocol.
//!
//! A [`TorSession`] owns at most one connection to a Tor control port and
//! hides its lifecycle from callers:
//!
//! - Connects and authenticates lazily on the first command (NULL, password,
//!   cookie or SAFECOOKIE)
//! - Serializes concurrent commands in call order over one connection
//! - Routes asynchronous `650` events to registered listeners while commands
//!   are in flight
//! - Restores event subscriptions after every reconnect
//! - Optionally closes the connection after each command (transient mode)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tor_session::{Result, SessionConfig, TorSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = TorSession::new(SessionConfig::new().password("secret"));
//!
//!     let reply = session.send_command("GETINFO version").await?;
//!     println!("{}", reply.message());
//!
//!     session.disconnect(false).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Events
//!
//! ```rust,no_run
//! # use tor_session::{EventType, SessionConfig, TorSession};
//! # async fn example() -> tor_session::Result<()> {
//! let session = TorSession::new(SessionConfig::from_env()?);
//!
//! session
//!     .register(EventType::Bw, |event| {
//!         println!("bandwidth: {}", event.payload);
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Transient sessions
//!
//! With `persistent(false)` every command opens, authenticates, runs and
//! closes its own connection. Pass [`CommandOptions::keep_open`] to keep the
//! connection for a follow-up command.
//!
//! ## Feature Flags
//!
//! - `test-utils`: reply builders and fixtures in [`test_utils`]
//!
//! ## Protocol Compatibility
//!
//! Implements the client side of Tor Control Protocol version 1 as specified
//! in the [Tor Control Specification](https://spec.torproject.org/control-spec/).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod auth;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use auth::AuthCredential;
pub use commands::{AddOnion, ControlCommand, HsFetch, OnionFlag, OnionKey, OnionService};
pub use config::{ConnectionAddress, SessionConfig};
pub use connection::{ConnectionState, SessionNotification};
pub use error::{Result, StatusCode, TorControlError};
pub use events::{EventDispatcher, EventMessage, EventType, Listener};
pub use protocol::{Reply, ReplyLine};
pub use session::{CommandOptions, CommandReply, TorSession};
pub use types::{CircuitId, OnionAddress, Signal, StreamId};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tor Control Protocol version supported.
pub const PROTOCOL_VERSION: u32 = 1;
