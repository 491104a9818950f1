//! Scripted mock control port shared by the integration suites.
//!
//! The mock accepts any number of connections, records every command line it
//! receives, and answers each one with the [`Step`]s its handler returns.
//! `QUIT` is always answered with `250 closing connection` followed by a
//! close, the way the daemon does it.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tor_session::SessionConfig;

/// Password the default handler accepts.
pub const PASSWORD: &str = "test";

/// The AUTHENTICATE line the default handler accepts.
pub const AUTH_LINE: &str = "AUTHENTICATE 74657374";

/// One thing the mock does in answer to a command.
#[derive(Debug, Clone)]
pub enum Step {
    /// Write these bytes.
    Send(String),
    /// Wait before the next step.
    Pause(Duration),
    /// Drop the connection.
    Close,
}

/// Shorthand for a single write.
pub fn send(text: impl Into<String>) -> Step {
    Step::Send(text.into())
}

type Handler = Arc<dyn Fn(&str) -> Vec<Step> + Send + Sync>;

/// Answers the handshake and SETEVENTS, and rejects everything else.
pub fn default_reply(line: &str) -> Option<Vec<Step>> {
    if line.starts_with("AUTHENTICATE") {
        return Some(if line == AUTH_LINE {
            vec![send("250 OK\r\n")]
        } else {
            vec![send("515 Authentication failed: Password did not match\r\n")]
        });
    }
    if line.starts_with("SETEVENTS") {
        return Some(vec![send("250 OK\r\n")]);
    }
    if line == "GETINFO version" {
        return Some(vec![send("250-version=0.4.8.12\r\n250 OK\r\n")]);
    }
    None
}

fn fallback(line: &str) -> Vec<Step> {
    default_reply(line).unwrap_or_else(|| {
        let keyword = line.split(' ').next().unwrap_or_default();
        vec![send(format!("510 Unrecognized command \"{}\"\r\n", keyword))]
    })
}

/// A running mock control port.
pub struct MockControlPort {
    port: u16,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockControlPort {
    /// Start a mock that only knows the default replies.
    pub async fn start() -> Self {
        Self::with_handler(|_| None).await
    }

    /// Start a mock; `handler` answers first, the default replies fill in.
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Option<Vec<Step>> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock control port");
        let port = listener.local_addr().unwrap().port();

        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let handler: Handler =
            Arc::new(move |line: &str| handler(line).unwrap_or_else(|| fallback(line)));

        let task = {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    stream.set_nodelay(true).ok();
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, Arc::clone(&handler), Arc::clone(&received)));
                }
            })
        };

        Self {
            port,
            received,
            connections,
            task,
        }
    }

    /// Port the mock listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// A session config pointing at the mock with the accepted password.
    pub fn config(&self) -> SessionConfig {
        SessionConfig::new()
            .tcp("127.0.0.1", self.port)
            .password(PASSWORD)
            .command_timeout(Duration::from_secs(2))
    }

    /// Every line received so far, across connections.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Lines received so far that are not part of the handshake.
    pub fn commands(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter(|line| !line.starts_with("AUTHENTICATE"))
            .collect()
    }

    /// How many connections were accepted.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockControlPort {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve one connection, which may also be a Unix stream.
pub async fn serve<S>(stream: S, handler: Handler, received: Arc<Mutex<Vec<String>>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        received.lock().unwrap().push(line.clone());

        if line == "QUIT" {
            let _ = write_half.write_all(b"250 closing connection\r\n").await;
            break;
        }

        for step in handler(&line) {
            match step {
                Step::Send(text) => {
                    if write_half.write_all(text.as_bytes()).await.is_err() {
                        return;
                    }
                    let _ = write_half.flush().await;
                }
                Step::Pause(delay) => tokio::time::sleep(delay).await,
                Step::Close => return,
            }
        }
    }
    let _ = write_half.shutdown().await;
}

/// Serve the default replies on a Unix socket at `path`.
#[cfg(unix)]
pub fn start_unix(path: &Path) -> (Arc<Mutex<Vec<String>>>, JoinHandle<()>) {
    let listener = tokio::net::UnixListener::bind(path).expect("Failed to bind socket");
    let received = Arc::new(Mutex::new(Vec::new()));
    let handler: Handler = Arc::new(fallback);

    let task = {
        let received = Arc::clone(&received);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&handler), Arc::clone(&received)));
            }
        })
    };
    (received, task)
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
