//! The session: command correlation and event subscriptions.
//!
//! A [`TorSession`] is a cheap, cloneable handle. Every operation takes the
//! session's operation lock, which is a fair mutex, so commands from
//! concurrent callers are written one at a time in the order they were
//! issued and each reply resolves exactly the command that is in flight.

use crate::config::SessionConfig;
use crate::connection::{ConnectionManager, ConnectionState, SessionNotification};
use crate::error::{Result, TorControlError};
use crate::events::{setevents_command, EventDispatcher, EventMessage, EventType, Listener};
use crate::protocol::Reply;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// Per-command overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Keep a transient session's connection open after this command.
    pub keep_open: bool,
    /// Reply deadline; the session's `command_timeout` when `None`.
    pub timeout: Option<Duration>,
}

impl CommandOptions {
    /// Options that keep the connection open after the command.
    pub fn keep_open() -> Self {
        Self {
            keep_open: true,
            timeout: None,
        }
    }

    /// Set the reply deadline for this command.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A successful reply to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// Status code, always in the 250 family.
    pub code: u16,
    /// One entry per logical reply line, status prefix stripped.
    pub messages: Vec<String>,
    /// The reply exactly as received.
    pub raw: String,
}

impl CommandReply {
    /// The first message, which for most commands is the whole answer.
    pub fn message(&self) -> &str {
        self.messages.first().map(String::as_str).unwrap_or("")
    }
}

impl TryFrom<Reply> for CommandReply {
    type Error = TorControlError;

    fn try_from(reply: Reply) -> Result<Self> {
        let reply = reply.into_result()?;
        Ok(CommandReply {
            code: reply.code,
            messages: reply.messages(),
            raw: reply.raw,
        })
    }
}

struct Inner {
    manager: ConnectionManager,
    dispatcher: Arc<EventDispatcher>,
    ops: Mutex<()>,
}

/// A client session with a Tor control port.
///
/// # Example
///
/// ```rust,no_run
/// use tor_session::{SessionConfig, TorSession};
///
/// # async fn example() -> tor_session::Result<()> {
/// let session = TorSession::new(SessionConfig::new().password("secret"));
/// session.connect().await?;
///
/// let reply = session.send_command("GETINFO version").await?;
/// println!("{}", reply.message());
///
/// session.disconnect(false).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TorSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorSession")
            .field("address", &self.inner.manager.config().address)
            .field("state", &self.state())
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

impl TorSession {
    /// Create a session. No connection is made until one is needed.
    pub fn new(config: SessionConfig) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new());
        Self {
            inner: Arc::new(Inner {
                manager: ConnectionManager::new(config, Arc::clone(&dispatcher)),
                dispatcher,
                ops: Mutex::new(()),
            }),
        }
    }

    /// Create a session from [`SessionConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(SessionConfig::from_env()?))
    }

    /// The configuration this session was created with.
    pub fn config(&self) -> &SessionConfig {
        self.inner.manager.config()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    /// Whether the session is authenticated and accepting commands.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Receive [`SessionNotification`]s for connects and disconnects.
    pub fn notifications(&self) -> broadcast::Receiver<SessionNotification> {
        self.inner.manager.notifications()
    }

    /// The events this session is subscribed to, in subscription order.
    pub fn subscribed_events(&self) -> Vec<EventType> {
        self.inner.dispatcher.subscribed()
    }

    /// Connect and authenticate, then restore event subscriptions.
    ///
    /// Does nothing when already connected.
    pub async fn connect(&self) -> Result<()> {
        let _op = self.inner.ops.lock().await;
        self.inner.manager.connect().await?;
        info!("Control session ready on {}", self.config().address);
        Ok(())
    }

    /// Close the connection.
    ///
    /// Sends QUIT and waits for the daemon to close unless `force` is set,
    /// in which case the transport is dropped immediately. Waits for any
    /// command in flight to finish first.
    pub async fn disconnect(&self, force: bool) -> Result<()> {
        let _op = self.inner.ops.lock().await;
        self.inner.manager.disconnect(force).await
    }

    /// Send a raw command line and wait for its reply.
    ///
    /// Connects first when needed. The line is terminated with CRLF unless it
    /// already ends in a line break. A reply outside the 250 family becomes
    /// [`TorControlError::CommandRejected`].
    pub async fn send_command(&self, command: &str) -> Result<CommandReply> {
        self.send_command_with(command, CommandOptions::default())
            .await
    }

    /// Send a raw command line with per-command options.
    pub async fn send_command_with(
        &self,
        command: &str,
        options: CommandOptions,
    ) -> Result<CommandReply> {
        let _op = self.inner.ops.lock().await;
        self.run_command(command, options).await
    }

    /// Send a command while the operation lock is held.
    async fn run_command(&self, command: &str, options: CommandOptions) -> Result<CommandReply> {
        let manager = &self.inner.manager;
        manager.connect().await?;

        let deadline = options.timeout.unwrap_or(manager.config().command_timeout);
        let result = manager
            .exchange(command, deadline)
            .await
            .and_then(CommandReply::try_from);

        if !manager.config().persistent && !options.keep_open && manager.is_open() {
            if let Err(e) = manager.disconnect(false).await {
                debug!("Closing transient connection failed: {}", e);
            }
        }

        result
    }

    /// Replace the subscription set with `events`.
    ///
    /// The set is only updated once the daemon accepts the SETEVENTS
    /// command; on rejection it is left as it was.
    pub async fn subscribe(&self, events: &[EventType]) -> Result<()> {
        let _op = self.inner.ops.lock().await;
        self.subscribe_locked(events).await
    }

    async fn subscribe_locked(&self, events: &[EventType]) -> Result<()> {
        self.run_command(&setevents_command(events), CommandOptions::default())
            .await?;
        self.inner.dispatcher.set_subscribed(events);
        debug!("Subscribed to {:?}", events);
        Ok(())
    }

    /// Add one event to the subscription set.
    ///
    /// Sends nothing when the event is already subscribed.
    pub async fn add_event(&self, event: EventType) -> Result<()> {
        let _op = self.inner.ops.lock().await;
        self.add_event_locked(event).await
    }

    async fn add_event_locked(&self, event: EventType) -> Result<()> {
        if self.inner.dispatcher.is_subscribed(event) {
            return Ok(());
        }
        let mut events = self.inner.dispatcher.subscribed();
        events.push(event);
        self.subscribe_locked(&events).await
    }

    /// Unsubscribe from everything and drop every listener of those events.
    pub async fn clear_events(&self) -> Result<()> {
        let _op = self.inner.ops.lock().await;
        self.run_command(&setevents_command(&[]), CommandOptions::default())
            .await?;
        let cleared = self.inner.dispatcher.clear();
        debug!("Cleared subscription to {:?}", cleared);
        Ok(())
    }

    /// Subscribe to `event` if needed and call `listener` for each push.
    ///
    /// Listeners run on the connection's reader task, in registration order.
    /// They should return quickly; hand heavy work to a channel.
    ///
    /// The listener is in place before SETEVENTS is sent, so it sees pushes
    /// that follow the daemon's `250` immediately. If the subscription fails
    /// it is removed again.
    pub async fn register<F>(&self, event: EventType, listener: F) -> Result<()>
    where
        F: Fn(&EventMessage) + Send + Sync + 'static,
    {
        let _op = self.inner.ops.lock().await;
        let listener: Listener = Arc::new(listener);
        self.inner.dispatcher.attach(event, Arc::clone(&listener));

        if let Err(e) = self.add_event_locked(event).await {
            self.inner.dispatcher.detach(event, &listener);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_reply, Parsed};

    fn reply(text: &str) -> Reply {
        match parse_reply(text) {
            Some(Parsed::Reply { reply, .. }) => reply,
            other => panic!("not a reply: {:?}", other),
        }
    }

    #[test]
    fn test_command_reply_from_success() {
        let parsed = CommandReply::try_from(reply("250-version=0.4.8.9\r\n250 OK\r\n")).unwrap();
        assert_eq!(parsed.code, 250);
        assert_eq!(parsed.messages, vec!["version=0.4.8.9", "OK"]);
        assert_eq!(parsed.message(), "version=0.4.8.9");
        assert_eq!(parsed.raw, "250-version=0.4.8.9\r\n250 OK\r\n");
    }

    #[test]
    fn test_command_reply_accepts_250_family() {
        assert_eq!(CommandReply::try_from(reply("251 Ignored\r\n")).unwrap().code, 251);
    }

    #[test]
    fn test_command_reply_from_rejection() {
        match CommandReply::try_from(reply("552 Unrecognized key \"foo\"\r\n")) {
            Err(TorControlError::CommandRejected { code, message }) => {
                assert_eq!(code, 552);
                assert_eq!(message, "Unrecognized key \"foo\"");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_command_options() {
        let options = CommandOptions::keep_open().with_timeout(Duration::from_millis(50));
        assert!(options.keep_open);
        assert_eq!(options.timeout, Some(Duration::from_millis(50)));
        assert_eq!(CommandOptions::default().timeout, None);
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let session = TorSession::new(SessionConfig::default());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_connected());
        assert!(session.subscribed_events().is_empty());
    }

    #[tokio::test]
    async fn test_failed_register_removes_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let session = TorSession::new(SessionConfig::new().tcp("127.0.0.1", port));
        let result = session.register(EventType::Bw, |_| {}).await;
        assert!(result.unwrap_err().is_transport());
        assert_eq!(session.inner.dispatcher.listener_count(EventType::Bw), 0);
        assert!(session.subscribed_events().is_empty());
    }
}
