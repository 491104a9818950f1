//! Session configuration.
//!
//! A [`SessionConfig`] names the control endpoint, the credential, the
//! persistence mode and the deadlines used by the session. Build it with the
//! chained setters or load it from the environment with
//! [`SessionConfig::from_env`].

use crate::auth::AuthCredential;
use crate::error::{Result, TorControlError};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding `host:port` or `unix:/path`.
pub const ENV_CONTROL_ADDR: &str = "TOR_CONTROL_ADDR";
/// Environment variable holding the control password.
pub const ENV_CONTROL_PASSWORD: &str = "TOR_CONTROL_PASSWORD";
/// Environment variable holding the path to the auth cookie.
pub const ENV_CONTROL_COOKIE: &str = "TOR_CONTROL_COOKIE";
/// Environment variable selecting persistent mode (`1`/`true`/`yes`).
pub const ENV_CONTROL_PERSISTENT: &str = "TOR_CONTROL_PERSISTENT";

/// Configuration of one control session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The address to connect to.
    pub address: ConnectionAddress,
    /// Authentication credentials.
    pub auth: AuthCredential,
    /// Keep the connection open between commands.
    ///
    /// When false, the session disconnects after every completed command and
    /// reconnects (and resubscribes) for the next one.
    pub persistent: bool,
    /// Deadline for opening the transport.
    pub connect_timeout: Duration,
    /// Default deadline for a command's reply.
    pub command_timeout: Duration,
    /// Deadline for writing a command.
    pub write_timeout: Duration,
    /// How many times to retry opening the transport before giving up.
    pub reconnect_attempts: u32,
    /// Delay between transport retries.
    pub reconnect_delay: Duration,
    /// Buffer size of the lifecycle notification channel.
    pub notification_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: ConnectionAddress::default(),
            auth: AuthCredential::None,
            persistent: true,
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(30),
            reconnect_attempts: 0,
            reconnect_delay: Duration::from_secs(1),
            notification_capacity: 16,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the endpoint, credential and persistence mode from the environment.
    ///
    /// Unset variables keep their defaults. A password takes precedence over
    /// a cookie path when both are set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var(ENV_CONTROL_ADDR) {
            config.address = ConnectionAddress::parse(&addr)?;
        }

        if let Ok(password) = std::env::var(ENV_CONTROL_PASSWORD) {
            config.auth = AuthCredential::Password(password);
        } else if let Ok(cookie) = std::env::var(ENV_CONTROL_COOKIE) {
            config.auth = AuthCredential::CookieFile(PathBuf::from(cookie));
        }

        if let Ok(value) = std::env::var(ENV_CONTROL_PERSISTENT) {
            config.persistent = parse_flag(&value).ok_or_else(|| {
                TorControlError::ConfigurationError(format!(
                    "{} must be a boolean, got '{}'",
                    ENV_CONTROL_PERSISTENT, value
                ))
            })?;
        }

        Ok(config)
    }

    /// Set the connection address.
    pub fn address(mut self, address: ConnectionAddress) -> Self {
        self.address = address;
        self
    }

    /// Connect to a TCP host and port.
    pub fn tcp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.address = ConnectionAddress::tcp(host, port);
        self
    }

    /// Connect to a Unix socket.
    pub fn unix(mut self, path: impl Into<PathBuf>) -> Self {
        self.address = ConnectionAddress::Unix(path.into());
        self
    }

    /// Set authentication credentials.
    pub fn auth(mut self, auth: AuthCredential) -> Self {
        self.auth = auth;
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.auth = AuthCredential::Password(password.into());
        self
    }

    /// Set cookie file authentication.
    pub fn cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth = AuthCredential::CookieFile(path.into());
        self
    }

    /// Keep the connection open between commands, or not.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the default command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set how often opening the transport is retried.
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// Set the delay between transport retries.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// The address of the control port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAddress {
    /// TCP host and port.
    Tcp {
        /// Host name or IP address.
        host: String,
        /// Control port.
        port: u16,
    },
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl Default for ConnectionAddress {
    fn default() -> Self {
        ConnectionAddress::tcp("127.0.0.1", 9051)
    }
}

impl ConnectionAddress {
    /// Create a TCP connection address.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        ConnectionAddress::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Create a Unix socket connection address.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ConnectionAddress::Unix(path.into())
    }

    /// Parse an address string.
    ///
    /// Supports:
    /// - `host:port` for TCP (`[::1]:9051` for IPv6 literals)
    /// - `unix:/path/to/socket` for Unix sockets
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(TorControlError::ConfigurationError(
                    "Empty Unix socket path".to_string(),
                ));
            }
            return Ok(ConnectionAddress::Unix(PathBuf::from(path)));
        }

        let invalid = || TorControlError::ConfigurationError(format!("Invalid address '{}'", s));
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(ConnectionAddress::tcp(host, port))
    }
}

impl std::fmt::Display for ConnectionAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionAddress::Tcp { host, port } if host.contains(':') => {
                write!(f, "[{}]:{}", host, port)
            }
            ConnectionAddress::Tcp { host, port } => write!(f, "{}:{}", host, port),
            ConnectionAddress::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.address, ConnectionAddress::tcp("127.0.0.1", 9051));
        assert!(matches!(config.auth, AuthCredential::None));
        assert!(config.persistent);
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::new()
            .tcp("localhost", 9151)
            .password("mypassword")
            .persistent(false)
            .command_timeout(Duration::from_secs(5))
            .reconnect_attempts(2);

        assert_eq!(config.address, ConnectionAddress::tcp("localhost", 9151));
        assert!(matches!(config.auth, AuthCredential::Password(_)));
        assert!(!config.persistent);
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_attempts, 2);
    }

    #[test]
    fn test_address_parsing() {
        assert_eq!(
            ConnectionAddress::parse("127.0.0.1:9051").unwrap(),
            ConnectionAddress::tcp("127.0.0.1", 9051)
        );
        assert_eq!(
            ConnectionAddress::parse("[::1]:9051").unwrap(),
            ConnectionAddress::tcp("::1", 9051)
        );
        assert_eq!(
            ConnectionAddress::parse("unix:/var/run/tor/control").unwrap(),
            ConnectionAddress::unix("/var/run/tor/control")
        );
        assert!(ConnectionAddress::parse("no-port").is_err());
        assert!(ConnectionAddress::parse("host:notaport").is_err());
        assert!(ConnectionAddress::parse(":9051").is_err());
        assert!(ConnectionAddress::parse("unix:").is_err());
    }

    #[test]
    fn test_address_display() {
        assert_eq!(ConnectionAddress::tcp("::1", 9051).to_string(), "[::1]:9051");
        assert_eq!(
            ConnectionAddress::unix("/run/tor/control").to_string(),
            "unix:/run/tor/control"
        );
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
