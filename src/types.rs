//! Identifiers and small value types used by the command builders.

use crate::error::TorControlError;
use std::fmt;
use std::str::FromStr;

/// A circuit identifier. `0` asks EXTENDCIRCUIT for a new circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CircuitId(pub u64);

impl CircuitId {
    /// The identifier EXTENDCIRCUIT reads as "build a new circuit".
    pub const NEW: CircuitId = CircuitId(0);
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CircuitId {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .map(CircuitId)
            .map_err(|_| TorControlError::ParseError(format!("Invalid circuit ID: {}", s)))
    }
}

/// A stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .map(StreamId)
            .map_err(|_| TorControlError::ParseError(format!("Invalid stream ID: {}", s)))
    }
}

/// A signal accepted by the SIGNAL command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Reload the torrc.
    Reload,
    /// Controlled shutdown.
    Shutdown,
    /// Dump stats to the log.
    Dump,
    /// Switch all open logs to debug.
    Debug,
    /// Immediate shutdown.
    Halt,
    /// Use clean circuits for new connections.
    NewNym,
    /// Forget client-side cached IPs.
    ClearDnsCache,
    /// Log an unscheduled heartbeat.
    Heartbeat,
    /// Become dormant.
    Dormant,
    /// Stop being dormant.
    Active,
}

impl Signal {
    const ALL: [Signal; 10] = [
        Signal::Reload,
        Signal::Shutdown,
        Signal::Dump,
        Signal::Debug,
        Signal::Halt,
        Signal::NewNym,
        Signal::ClearDnsCache,
        Signal::Heartbeat,
        Signal::Dormant,
        Signal::Active,
    ];

    /// The signal name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Reload => "RELOAD",
            Signal::Shutdown => "SHUTDOWN",
            Signal::Dump => "DUMP",
            Signal::Debug => "DEBUG",
            Signal::Halt => "HALT",
            Signal::NewNym => "NEWNYM",
            Signal::ClearDnsCache => "CLEARDNSCACHE",
            Signal::Heartbeat => "HEARTBEAT",
            Signal::Dormant => "DORMANT",
            Signal::Active => "ACTIVE",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Signal {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        // Unix signal names the daemon accepts as aliases
        let name = match upper.as_str() {
            "HUP" => "RELOAD",
            "INT" => "SHUTDOWN",
            "USR1" => "DUMP",
            "USR2" => "DEBUG",
            "TERM" => "HALT",
            other => other,
        };
        Signal::ALL
            .into_iter()
            .find(|signal| signal.as_str() == name)
            .ok_or_else(|| TorControlError::ParseError(format!("Unknown signal: {}", s)))
    }
}

/// An onion service address, stored without the `.onion` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Wrap a service ID, stripping a `.onion` suffix if present.
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        match address.strip_suffix(".onion") {
            Some(id) => OnionAddress(id.to_string()),
            None => OnionAddress(address),
        }
    }

    /// The service ID, as used by DEL_ONION and HSFETCH.
    pub fn service_id(&self) -> &str {
        &self.0
    }

    /// The address with its `.onion` suffix.
    pub fn full_address(&self) -> String {
        format!("{}.onion", self.0)
    }

    /// Whether this looks like a v3 service ID (56 base32 characters).
    pub fn is_v3(&self) -> bool {
        self.0.len() == 56
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OnionAddress {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.contains(char::is_whitespace) {
            return Err(TorControlError::ParseError(format!(
                "Invalid onion address: '{}'",
                s
            )));
        }
        Ok(OnionAddress::new(s))
    }
}
