//! Asynchronous event subscription and dispatch.
//!
//! Tor pushes `650` replies for every event named in the last SETEVENTS
//! command. The [`EventDispatcher`] remembers that set so it can be replayed
//! after a reconnect, and routes each push to the listeners registered for
//! its event name. The wire side of subscribing lives on
//! [`TorSession`](crate::TorSession).

use crate::protocol::{format_command, parse_key_value_pairs};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// Event types that can be subscribed to with SETEVENTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Circuit status changed.
    Circ,
    /// Stream status changed.
    Stream,
    /// OR connection status changed.
    OrConn,
    /// Bandwidth used in the last second.
    Bw,
    /// Debug log message.
    Debug,
    /// Info log message.
    Info,
    /// Notice log message.
    Notice,
    /// Warning log message.
    Warn,
    /// Error log message.
    Error,
    /// New descriptors available.
    NewDesc,
    /// New address mapping.
    AddrMap,
    /// Descriptors uploaded to us (directory authority).
    AuthDirNewDescs,
    /// Our descriptor changed.
    DescChanged,
    /// General status event.
    StatusGeneral,
    /// Client status event.
    StatusClient,
    /// Server status event.
    StatusServer,
    /// Guard node set changed.
    Guard,
    /// Network status changed.
    Ns,
    /// Stream bandwidth.
    StreamBw,
    /// Clients seen (bridge only).
    ClientsSeen,
    /// New consensus arrived.
    NewConsensus,
    /// Build timeout set.
    BuildTimeoutSet,
    /// Signal received.
    Signal,
    /// Configuration changed.
    ConfChanged,
    /// Minor circuit status change.
    CircMinor,
    /// Pluggable transport launched.
    TransportLaunched,
    /// Connection bandwidth.
    ConnBw,
    /// Circuit bandwidth.
    CircBw,
    /// Cell stats.
    CellStats,
    /// Token bucket empty.
    TbEmpty,
    /// Hidden service descriptor event.
    HsDesc,
    /// Hidden service descriptor content.
    HsDescContent,
    /// Network liveness changed.
    NetworkLiveness,
    /// Pluggable transport log.
    PtLog,
    /// Pluggable transport status.
    PtStatus,
}

impl EventType {
    /// Every event name the control protocol defines.
    pub const ALL: &'static [EventType] = &[
        EventType::Circ,
        EventType::Stream,
        EventType::OrConn,
        EventType::Bw,
        EventType::Debug,
        EventType::Info,
        EventType::Notice,
        EventType::Warn,
        EventType::Error,
        EventType::NewDesc,
        EventType::AddrMap,
        EventType::AuthDirNewDescs,
        EventType::DescChanged,
        EventType::StatusGeneral,
        EventType::StatusClient,
        EventType::StatusServer,
        EventType::Guard,
        EventType::Ns,
        EventType::StreamBw,
        EventType::ClientsSeen,
        EventType::NewConsensus,
        EventType::BuildTimeoutSet,
        EventType::Signal,
        EventType::ConfChanged,
        EventType::CircMinor,
        EventType::TransportLaunched,
        EventType::ConnBw,
        EventType::CircBw,
        EventType::CellStats,
        EventType::TbEmpty,
        EventType::HsDesc,
        EventType::HsDescContent,
        EventType::NetworkLiveness,
        EventType::PtLog,
        EventType::PtStatus,
    ];

    /// The event name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Circ => "CIRC",
            EventType::Stream => "STREAM",
            EventType::OrConn => "ORCONN",
            EventType::Bw => "BW",
            EventType::Debug => "DEBUG",
            EventType::Info => "INFO",
            EventType::Notice => "NOTICE",
            EventType::Warn => "WARN",
            EventType::Error => "ERR",
            EventType::NewDesc => "NEWDESC",
            EventType::AddrMap => "ADDRMAP",
            EventType::AuthDirNewDescs => "AUTHDIR_NEWDESCS",
            EventType::DescChanged => "DESCCHANGED",
            EventType::StatusGeneral => "STATUS_GENERAL",
            EventType::StatusClient => "STATUS_CLIENT",
            EventType::StatusServer => "STATUS_SERVER",
            EventType::Guard => "GUARD",
            EventType::Ns => "NS",
            EventType::StreamBw => "STREAM_BW",
            EventType::ClientsSeen => "CLIENTS_SEEN",
            EventType::NewConsensus => "NEWCONSENSUS",
            EventType::BuildTimeoutSet => "BUILDTIMEOUT_SET",
            EventType::Signal => "SIGNAL",
            EventType::ConfChanged => "CONF_CHANGED",
            EventType::CircMinor => "CIRC_MINOR",
            EventType::TransportLaunched => "TRANSPORT_LAUNCHED",
            EventType::ConnBw => "CONN_BW",
            EventType::CircBw => "CIRC_BW",
            EventType::CellStats => "CELL_STATS",
            EventType::TbEmpty => "TB_EMPTY",
            EventType::HsDesc => "HS_DESC",
            EventType::HsDescContent => "HS_DESC_CONTENT",
            EventType::NetworkLiveness => "NETWORK_LIVENESS",
            EventType::PtLog => "PT_LOG",
            EventType::PtStatus => "PT_STATUS",
        }
    }
}

impl FromStr for EventType {
    type Err = crate::error::TorControlError;

    /// Case-insensitive lookup in the protocol's event vocabulary.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|event| event.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                crate::error::TorControlError::ParseError(format!("Unknown event type: {}", s))
            })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An asynchronous event delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    /// Which event fired.
    pub event: EventType,
    /// Everything after the event name.
    pub payload: String,
}

impl EventMessage {
    /// `KEY=VALUE` arguments found in the payload.
    pub fn key_values(&self) -> HashMap<String, String> {
        parse_key_value_pairs(&self.payload)
    }

    /// Space-separated positional arguments before the first `KEY=VALUE`.
    pub fn positional(&self) -> Vec<&str> {
        self.payload
            .split_whitespace()
            .take_while(|arg| !arg.contains('='))
            .collect()
    }
}

/// Callback invoked for every event of the type it was registered for.
pub type Listener = Arc<dyn Fn(&EventMessage) + Send + Sync>;

/// Split a `650` reply body into its event name and payload.
///
/// The name runs to the first space (or line break, for data-block events)
/// and is matched case-insensitively. Returns `None` for bodies without a
/// separator, names shorter than two characters, and unknown names.
pub fn split_event(body: &str) -> Option<(EventType, &str)> {
    let sep = body.find([' ', '\n'])?;
    let name = &body[..sep];
    if name.len() < 2 {
        return None;
    }
    let event = EventType::from_str(name).ok()?;
    Some((event, &body[sep + 1..]))
}

/// Build the SETEVENTS line for a subscription set.
///
/// An empty set yields a bare `SETEVENTS`, which unsubscribes from everything.
pub fn setevents_command(events: &[EventType]) -> String {
    let names: Vec<&str> = events.iter().map(EventType::as_str).collect();
    format_command("SETEVENTS", &names)
}

#[derive(Default)]
struct DispatcherState {
    subscribed: Vec<EventType>,
    listeners: HashMap<EventType, Vec<Listener>>,
}

/// Subscription set and listener registry of one session.
#[derive(Default)]
pub struct EventDispatcher {
    state: Mutex<DispatcherState>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("EventDispatcher")
            .field("subscribed", &state.subscribed)
            .field(
                "listeners",
                &state.listeners.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current subscription set, in subscription order.
    pub fn subscribed(&self) -> Vec<EventType> {
        self.lock().subscribed.clone()
    }

    /// Whether `event` is part of the subscription set.
    pub fn is_subscribed(&self, event: EventType) -> bool {
        self.lock().subscribed.contains(&event)
    }

    /// Replace the subscription set, dropping duplicates but keeping order.
    pub fn set_subscribed(&self, events: &[EventType]) {
        let mut deduped = Vec::with_capacity(events.len());
        for event in events {
            if !deduped.contains(event) {
                deduped.push(*event);
            }
        }
        self.lock().subscribed = deduped;
    }

    /// Forget every subscription and the listeners attached to them.
    ///
    /// Returns the set that was cleared.
    pub fn clear(&self) -> Vec<EventType> {
        let mut state = self.lock();
        let previous = std::mem::take(&mut state.subscribed);
        for event in &previous {
            state.listeners.remove(event);
        }
        previous
    }

    /// Attach a listener behind any already registered for `event`.
    pub fn attach(&self, event: EventType, listener: Listener) {
        self.lock().listeners.entry(event).or_default().push(listener);
    }

    /// Remove one listener previously attached for `event`.
    pub fn detach(&self, event: EventType, listener: &Listener) {
        let mut state = self.lock();
        if let Some(listeners) = state.listeners.get_mut(&event) {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
            if listeners.is_empty() {
                state.listeners.remove(&event);
            }
        }
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: EventType) -> usize {
        self.lock().listeners.get(&event).map_or(0, Vec::len)
    }

    /// Route the body of a `650` reply to its listeners.
    ///
    /// Returns how many listeners were called. Listeners run outside the
    /// internal lock, so they may register further listeners. A listener
    /// that panics is logged and skipped; the rest still run.
    pub fn dispatch(&self, body: &str) -> usize {
        let Some((event, payload)) = split_event(body) else {
            debug!("Dropping unrecognized event: {}", body);
            return 0;
        };

        let listeners = self.lock().listeners.get(&event).cloned().unwrap_or_default();
        trace!("Dispatching {} to {} listener(s)", event, listeners.len());

        let message = EventMessage {
            event,
            payload: payload.to_string(),
        };
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&message))).is_err() {
                warn!("Listener for {} panicked", event);
            }
        }
        listeners.len()
    }
}
