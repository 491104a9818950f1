//! Transport, authentication and lifecycle of the control connection.
//!
//! A [`ConnectionManager`] owns at most one live connection. Each connection
//! has a reader task that owns the read half and a [`ReplyBuffer`]; it routes
//! `650` pushes to the [`EventDispatcher`] and every other reply to the one
//! pending command. Writes go through the shared write half.
//!
//! The manager does not serialize callers itself. [`TorSession`] holds its
//! operation lock around every call into it, which is what keeps a single
//! command in flight.
//!
//! [`TorSession`]: crate::TorSession

use crate::auth::{
    authenticate_command, compute_client_hash, generate_client_nonce,
    parse_authchallenge_response, read_cookie_file, verify_server_hash, AuthCredential,
    COOKIE_LEN,
};
use crate::config::{ConnectionAddress, SessionConfig};
use crate::error::{Result, TorControlError};
use crate::events::{setevents_command, EventDispatcher};
use crate::protocol::{terminate_line, Parsed, Reply, ReplyBuffer};

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<tokio::sync::Mutex<BufWriter<BoxedWriter>>>;

const READ_CHUNK: usize = 4096;

/// Lifecycle state of a session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport is open.
    Disconnected,
    /// The transport is being opened.
    Connecting,
    /// The transport is open and AUTHENTICATE is in flight.
    Authenticating,
    /// Authenticated and accepting commands.
    Ready,
    /// QUIT was sent and the transport is closing.
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnecting => "disconnecting",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle notifications broadcast to session observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotification {
    /// A connection was authenticated and its subscriptions restored.
    Connected,
    /// The connection ended, by request or because the peer closed it.
    Ended,
}

/// The one in-flight command, if any, tagged with its connection's id.
#[derive(Default)]
struct PendingSlot {
    waiter: Option<(u64, oneshot::Sender<Result<Reply>>)>,
}

struct Connection {
    id: u64,
    writer: SharedWriter,
    reader: Option<JoinHandle<()>>,
}

struct ConnectionSlot {
    state: ConnectionState,
    conn: Option<Connection>,
}

/// State shared between the manager and the reader task.
struct Shared {
    slot: Mutex<ConnectionSlot>,
    pending: Mutex<PendingSlot>,
    dispatcher: Arc<EventDispatcher>,
    notifications: broadcast::Sender<SessionNotification>,
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, ConnectionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingSlot> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notification: SessionNotification) {
        // No receivers is fine
        let _ = self.notifications.send(notification);
    }

    fn route(&self, id: u64, parsed: Parsed) {
        match parsed {
            Parsed::Reply { reply, .. } if reply.is_async_event() => {
                trace!("Received event: {}", reply.body);
                self.dispatcher.dispatch(&reply.body);
            }
            Parsed::Reply { reply, .. } => {
                trace!("Received reply: {} {}", reply.code, reply.body);
                self.resolve(id, Ok(reply));
            }
            Parsed::Malformed { line, .. } => {
                warn!("Malformed reply line: {}", line);
                self.resolve(id, Err(TorControlError::MalformedReply(line)));
            }
        }
    }

    fn resolve(&self, id: u64, result: Result<Reply>) {
        let mut pending = self.lock_pending();
        match pending.waiter.take() {
            Some((owner, waiter)) if owner == id => {
                // The caller may have given up already
                let _ = waiter.send(result);
            }
            Some(other) => {
                debug!("Dropping reply from stale connection {}", id);
                pending.waiter = Some(other);
            }
            None => debug!("Dropping unsolicited reply"),
        }
    }

    /// Fail whatever is pending.
    fn close_pending(&self) {
        if let Some((_, waiter)) = self.lock_pending().waiter.take() {
            let _ = waiter.send(Err(TorControlError::ConnectionClosed));
        }
    }

    /// Called by a reader task once its transport is gone.
    fn connection_lost(&self, id: u64) {
        let mut slot = self.lock_slot();
        let (ours, other_live) = match &slot.conn {
            Some(conn) if conn.id == id => (true, false),
            Some(_) => (false, true),
            None => (false, false),
        };

        if ours {
            slot.conn = None;
            slot.state = ConnectionState::Disconnected;
        }
        if !other_live {
            self.close_pending();
        }
        drop(slot);

        if ours {
            debug!("Control connection {} ended", id);
            self.notify(SessionNotification::Ended);
        }
    }
}

async fn read_loop(id: u64, mut reader: BoxedReader, shared: Arc<Shared>) {
    let mut buffer = ReplyBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("Control port closed the connection");
                break;
            }
            Ok(n) => {
                buffer.extend(&chunk[..n]);
                while let Some(parsed) = buffer.next_reply() {
                    shared.route(id, parsed);
                }
            }
            Err(e) => {
                warn!("Reading from control port failed: {}", e);
                break;
            }
        }
    }

    if !buffer.is_empty() {
        debug!("Discarding {} bytes of partial reply", buffer.len());
    }
    shared.connection_lost(id);
}

/// Hide secrets from wire traces.
fn loggable(command: &str) -> &str {
    let command = command.trim_end();
    if command.starts_with("AUTHENTICATE ") {
        "AUTHENTICATE <redacted>"
    } else {
        command
    }
}

/// Owns the transport, the authentication handshake and resubscription.
pub(crate) struct ConnectionManager {
    config: SessionConfig,
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub(crate) fn new(config: SessionConfig, dispatcher: Arc<EventDispatcher>) -> Self {
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        Self {
            config,
            shared: Arc::new(Shared {
                slot: Mutex::new(ConnectionSlot {
                    state: ConnectionState::Disconnected,
                    conn: None,
                }),
                pending: Mutex::new(PendingSlot::default()),
                dispatcher,
                notifications,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.shared.lock_slot().state
    }

    /// Whether a transport is currently open, authenticated or not.
    pub(crate) fn is_open(&self) -> bool {
        self.shared.lock_slot().conn.is_some()
    }

    pub(crate) fn notifications(&self) -> broadcast::Receiver<SessionNotification> {
        self.shared.notifications.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.shared.lock_slot().state = state;
    }

    /// Open, authenticate and resubscribe, unless already ready.
    pub(crate) async fn connect(&self) -> Result<()> {
        if self.state() == ConnectionState::Ready && self.is_open() {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        let (reader, writer) = match self.open_with_retry().await {
            Ok(halves) => halves,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut slot = self.shared.lock_slot();
            slot.conn = Some(Connection {
                id,
                writer: Arc::new(tokio::sync::Mutex::new(BufWriter::new(writer))),
                reader: None,
            });
            slot.state = ConnectionState::Authenticating;
        }

        let handle = tokio::spawn(read_loop(id, reader, Arc::clone(&self.shared)));
        {
            let mut slot = self.shared.lock_slot();
            match slot.conn.as_mut().filter(|conn| conn.id == id) {
                Some(conn) => conn.reader = Some(handle),
                None => drop(handle),
            }
        }
        debug!("Connected to {}, authenticating", self.config.address);

        if let Err(e) = self.authenticate().await {
            debug!("Authentication failed: {}", e);
            self.teardown();
            return Err(e);
        }
        self.set_state(ConnectionState::Ready);

        if let Err(e) = self.resubscribe().await {
            warn!("Restoring event subscriptions failed: {}", e);
            self.teardown();
            return Err(e);
        }

        self.shared.notify(SessionNotification::Connected);
        Ok(())
    }

    /// Close the connection; courteously with QUIT unless `force` is set.
    pub(crate) async fn disconnect(&self, force: bool) -> Result<()> {
        let conn = {
            let mut slot = self.shared.lock_slot();
            match slot.conn.take() {
                Some(conn) => {
                    slot.state = ConnectionState::Disconnecting;
                    conn
                }
                None => {
                    slot.state = ConnectionState::Disconnected;
                    return Ok(());
                }
            }
        };

        if force {
            if let Some(reader) = conn.reader {
                reader.abort();
            }
            debug!("Control connection {} closed", conn.id);
        } else {
            let quit = self.write(&conn.writer, "QUIT\r\n").await;
            if let Some(reader) = conn.reader {
                let abort = reader.abort_handle();
                match quit {
                    Ok(()) => {
                        if timeout(self.config.command_timeout, reader).await.is_err() {
                            warn!("Control port did not close after QUIT");
                            abort.abort();
                        }
                    }
                    Err(e) => {
                        debug!("Sending QUIT failed: {}", e);
                        abort.abort();
                    }
                }
            }
            debug!("Control connection {} closed after QUIT", conn.id);
        }

        self.shared.close_pending();
        self.set_state(ConnectionState::Disconnected);
        self.shared.notify(SessionNotification::Ended);
        Ok(())
    }

    /// Drop the connection without protocol courtesy or notification.
    ///
    /// Returns whether there was a connection to drop.
    fn teardown(&self) -> bool {
        let conn = {
            let mut slot = self.shared.lock_slot();
            slot.state = ConnectionState::Disconnected;
            slot.conn.take()
        };
        self.shared.close_pending();
        match conn {
            Some(conn) => {
                if let Some(reader) = conn.reader {
                    reader.abort();
                }
                debug!("Control connection {} dropped", conn.id);
                true
            }
            None => false,
        }
    }

    /// Write one command and wait for the reply that answers it.
    ///
    /// Async events arriving meanwhile are dispatched by the reader task and
    /// never resolve the wait. On timeout the connection is dropped, since
    /// the reply still owed would otherwise answer the next command.
    pub(crate) async fn exchange(&self, command: &str, deadline: Duration) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        let writer = {
            let slot = self.shared.lock_slot();
            let conn = slot.conn.as_ref().ok_or(TorControlError::ConnectionClosed)?;
            let mut pending = self.shared.lock_pending();
            if pending.waiter.is_some() {
                warn!("Replacing an unresolved pending command");
            }
            pending.waiter = Some((conn.id, tx));
            Arc::clone(&conn.writer)
        };

        trace!("Sending command: {}", loggable(command));
        if let Err(e) = self.write(&writer, &terminate_line(command)).await {
            self.shared.lock_pending().waiter = None;
            return Err(e);
        }

        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TorControlError::ConnectionClosed),
            Err(_) => {
                warn!(
                    "No reply to '{}' within {:?}, dropping the connection",
                    loggable(command),
                    deadline
                );
                let was_ready = self.state() == ConnectionState::Ready;
                if self.teardown() && was_ready {
                    self.shared.notify(SessionNotification::Ended);
                }
                Err(TorControlError::Timeout)
            }
        }
    }

    async fn write(&self, writer: &SharedWriter, line: &str) -> Result<()> {
        let mut writer = writer.lock().await;
        timeout(self.config.write_timeout, async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| TorControlError::Timeout)??;
        Ok(())
    }

    async fn open_with_retry(&self) -> Result<(BoxedReader, BoxedWriter)> {
        let mut attempt = 0;
        loop {
            match self.open().await {
                Ok(halves) => return Ok(halves),
                Err(e) if attempt < self.config.reconnect_attempts => {
                    attempt += 1;
                    debug!(
                        "Opening {} failed ({}), retry {}/{}",
                        self.config.address, e, attempt, self.config.reconnect_attempts
                    );
                    sleep(self.config.reconnect_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn open(&self) -> Result<(BoxedReader, BoxedWriter)> {
        let address = &self.config.address;
        let connect = async {
            match address {
                ConnectionAddress::Tcp { host, port } => {
                    let stream = TcpStream::connect((host.as_str(), *port)).await?;
                    stream.set_nodelay(true)?;
                    let (read_half, write_half) = stream.into_split();
                    Ok::<(BoxedReader, BoxedWriter), std::io::Error>((
                        Box::new(read_half),
                        Box::new(write_half),
                    ))
                }
                ConnectionAddress::Unix(path) => open_unix(path).await,
            }
        };

        match timeout(self.config.connect_timeout, connect).await {
            Err(_) => Err(TorControlError::Timeout),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::Unsupported => {
                Err(TorControlError::NotSupported(e.to_string()))
            }
            Ok(Err(e)) => Err(TorControlError::ConnectionFailed(format!(
                "{}: {}",
                address, e
            ))),
            Ok(Ok(halves)) => Ok(halves),
        }
    }

    async fn authenticate(&self) -> Result<()> {
        let command = match &self.config.auth {
            AuthCredential::SafeCookie { cookie_path } => self.safecookie_command(cookie_path).await?,
            credential => authenticate_command(credential.hex_secret()?.as_deref()),
        };

        let reply = self.exchange(&command, self.config.command_timeout).await?;
        if reply.code != 250 {
            return Err(TorControlError::AuthenticationFailed(
                reply.raw.trim_end().to_string(),
            ));
        }

        debug!("Authentication successful");
        Ok(())
    }

    /// Run AUTHCHALLENGE and build the AUTHENTICATE line answering it.
    async fn safecookie_command(&self, cookie_path: &Path) -> Result<String> {
        let cookie = read_cookie_file(cookie_path)?;
        if cookie.len() != COOKIE_LEN {
            return Err(TorControlError::AuthenticationFailed(format!(
                "Cookie file has invalid length {} (expected {})",
                cookie.len(),
                COOKIE_LEN
            )));
        }

        let client_nonce = generate_client_nonce();
        let challenge = format!("AUTHCHALLENGE SAFECOOKIE {}", hex::encode_upper(client_nonce));
        let reply = self.exchange(&challenge, self.config.command_timeout).await?;
        if !reply.is_success() {
            return Err(TorControlError::AuthenticationFailed(
                reply.raw.trim_end().to_string(),
            ));
        }

        let (server_hash, server_nonce) = parse_authchallenge_response(reply.first_line())?;
        if !verify_server_hash(&cookie, &client_nonce, &server_nonce, &server_hash) {
            return Err(TorControlError::AuthenticationFailed(
                "Server hash verification failed".to_string(),
            ));
        }

        let client_hash = compute_client_hash(&cookie, &client_nonce, &server_nonce);
        Ok(authenticate_command(Some(&hex::encode_upper(client_hash))))
    }

    /// Replay the session's subscription set on a fresh connection.
    async fn resubscribe(&self) -> Result<()> {
        let events = self.shared.dispatcher.subscribed();
        if events.is_empty() {
            return Ok(());
        }

        debug!("Restoring subscription to {} event(s)", events.len());
        self.exchange(&setevents_command(&events), self.config.command_timeout)
            .await?
            .into_result()?;
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let conn = self.shared.lock_slot().conn.take();
        if let Some(reader) = conn.and_then(|conn| conn.reader) {
            reader.abort();
        }
    }
}

#[cfg(unix)]
async fn open_unix(path: &Path) -> std::io::Result<(BoxedReader, BoxedWriter)> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    let (read_half, write_half) = stream.into_split();
    Ok((Box::new(read_half), Box::new(write_half)))
}

#[cfg(not(unix))]
async fn open_unix(path: &Path) -> std::io::Result<(BoxedReader, BoxedWriter)> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("Unix sockets are unavailable here ({})", path.display()),
    ))
}
