//! Typed builders for the common control commands.
//!
//! Each builder validates its arguments when serialized, so a bad request
//! fails with [`TorControlError::InvalidArgument`] before anything reaches
//! the wire. [`TorSession`] has a convenience method per command family that
//! builds, sends and decodes the reply.
//!
//! # Example
//!
//! ```rust,no_run
//! use tor_session::commands::AddOnion;
//! use tor_session::{SessionConfig, TorSession};
//!
//! # async fn example() -> tor_session::Result<()> {
//! let session = TorSession::new(SessionConfig::new().password("secret"));
//! let service = session
//!     .add_onion(&AddOnion::new().port(80, "127.0.0.1:8080"))
//!     .await?;
//! println!("serving on {}", service.address.full_address());
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TorControlError};
use crate::protocol::{format_command, quote_string};
use crate::session::{CommandReply, TorSession};
use crate::types::{CircuitId, OnionAddress, Signal, StreamId};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A request that can be serialized to one command line.
pub trait ControlCommand {
    /// Validate the request and render it without the line terminator.
    fn to_command_line(&self) -> Result<String>;
}

fn invalid(message: impl Into<String>) -> TorControlError {
    TorControlError::InvalidArgument(message.into())
}

/// Reject empty values and anything that would split the argument.
fn check_token(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid(format!("{} must not be empty", what)));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid(format!(
            "{} must not contain whitespace: '{}'",
            what, value
        )));
    }
    Ok(())
}

fn keyword_with_keys(keyword: &str, keys: &[String]) -> Result<String> {
    if keys.is_empty() {
        return Err(invalid(format!("{} needs at least one key", keyword)));
    }
    for key in keys {
        check_token("Key", key)?;
    }
    let args: Vec<&str> = keys.iter().map(String::as_str).collect();
    Ok(format_command(keyword, &args))
}

fn collect_strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// `GETCONF key...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetConf {
    /// Configuration keys to read.
    pub keys: Vec<String>,
}

impl GetConf {
    /// Read the given keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: collect_strings(keys),
        }
    }

    /// Decode `key=value` lines; a bare `key` means the option is unset.
    ///
    /// Options that appear several times (such as `HiddenServicePort`)
    /// collect every value.
    pub fn parse_reply(reply: &CommandReply) -> HashMap<String, Vec<String>> {
        let mut result: HashMap<String, Vec<String>> = HashMap::new();
        for message in &reply.messages {
            match message.split_once('=') {
                Some((key, value)) => result
                    .entry(key.to_string())
                    .or_default()
                    .push(value.to_string()),
                None if message != "OK" => {
                    result.entry(message.clone()).or_default();
                }
                None => {}
            }
        }
        result
    }
}

impl ControlCommand for GetConf {
    fn to_command_line(&self) -> Result<String> {
        keyword_with_keys("GETCONF", &self.keys)
    }
}

/// `SETCONF key="value"...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetConf {
    /// Key and value pairs, applied atomically by the daemon.
    pub settings: Vec<(String, String)>,
}

impl SetConf {
    /// Set the given options.
    pub fn new<K, V>(settings: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            settings: settings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ControlCommand for SetConf {
    fn to_command_line(&self) -> Result<String> {
        if self.settings.is_empty() {
            return Err(invalid("SETCONF needs at least one setting"));
        }
        let mut args = Vec::with_capacity(self.settings.len());
        for (key, value) in &self.settings {
            check_token("Key", key)?;
            args.push(format!("{}={}", key, quote_string(value)));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Ok(format_command("SETCONF", &args))
    }
}

/// `RESETCONF key...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetConf {
    /// Keys to reset to their defaults.
    pub keys: Vec<String>,
}

impl ResetConf {
    /// Reset the given keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: collect_strings(keys),
        }
    }
}

impl ControlCommand for ResetConf {
    fn to_command_line(&self) -> Result<String> {
        keyword_with_keys("RESETCONF", &self.keys)
    }
}

/// `GETINFO key...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetInfo {
    /// Information keys to query.
    pub keys: Vec<String>,
}

impl GetInfo {
    /// Query the given keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: collect_strings(keys),
        }
    }

    /// Decode `key=value` lines and `key=` data blocks into a map.
    pub fn parse_reply(reply: &CommandReply) -> HashMap<String, String> {
        reply
            .messages
            .iter()
            .filter_map(|message| message.split_once('='))
            .map(|(key, value)| {
                // Data blocks start on the line after `key=`
                let value = value.strip_prefix('\n').unwrap_or(value);
                (key.to_string(), value.to_string())
            })
            .collect()
    }
}

impl ControlCommand for GetInfo {
    fn to_command_line(&self) -> Result<String> {
        keyword_with_keys("GETINFO", &self.keys)
    }
}

impl ControlCommand for Signal {
    fn to_command_line(&self) -> Result<String> {
        Ok(format_command("SIGNAL", &[self.as_str()]))
    }
}

/// `MAPADDRESS from=to...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapAddress {
    /// Original and replacement addresses.
    pub mappings: Vec<(String, String)>,
}

impl MapAddress {
    /// Map each `from` address to its `to` address.
    pub fn new<F, T>(mappings: impl IntoIterator<Item = (F, T)>) -> Self
    where
        F: Into<String>,
        T: Into<String>,
    {
        Self {
            mappings: mappings
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect(),
        }
    }

    /// Decode the mappings the daemon accepted.
    pub fn parse_reply(reply: &CommandReply) -> HashMap<String, String> {
        reply
            .messages
            .iter()
            .filter_map(|message| message.split_once('='))
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect()
    }
}

impl ControlCommand for MapAddress {
    fn to_command_line(&self) -> Result<String> {
        if self.mappings.is_empty() {
            return Err(invalid("MAPADDRESS needs at least one mapping"));
        }
        let mut args = Vec::with_capacity(self.mappings.len());
        for (from, to) in &self.mappings {
            check_token("Original address", from)?;
            check_token("Replacement address", to)?;
            args.push(format!("{}={}", from, to));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Ok(format_command("MAPADDRESS", &args))
    }
}

/// Key material for ADD_ONION.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnionKey {
    /// Have the daemon generate a key of this type (`NEW:<type>`).
    New(String),
    /// An existing private key (`<type>:<blob>`).
    Existing {
        /// Key algorithm, such as `ED25519-V3`.
        key_type: String,
        /// Base64 key blob.
        blob: String,
    },
}

impl OnionKey {
    /// A new key of the daemon's preferred type.
    pub fn best() -> Self {
        OnionKey::New("BEST".to_string())
    }

    /// A new ED25519-V3 key.
    pub fn ed25519_v3() -> Self {
        OnionKey::New("ED25519-V3".to_string())
    }

    fn validate(&self) -> Result<()> {
        match self {
            OnionKey::New(key_type) => check_token("Key type", key_type),
            OnionKey::Existing { key_type, blob } => {
                check_token("Key type", key_type)?;
                if key_type.eq_ignore_ascii_case("NEW") {
                    return Err(invalid("Existing key type must not be NEW"));
                }
                check_token("Key blob", blob)
            }
        }
    }
}

impl Default for OnionKey {
    fn default() -> Self {
        OnionKey::best()
    }
}

impl fmt::Display for OnionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnionKey::New(key_type) => write!(f, "NEW:{}", key_type),
            OnionKey::Existing { key_type, blob } => write!(f, "{}:{}", key_type, blob),
        }
    }
}

impl FromStr for OnionKey {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        let (key_type, rest) = s
            .split_once(':')
            .ok_or_else(|| invalid(format!("Key spec must be TYPE:BLOB or NEW:TYPE: '{}'", s)))?;
        let key = if key_type == "NEW" {
            OnionKey::New(rest.to_string())
        } else {
            OnionKey::Existing {
                key_type: key_type.to_string(),
                blob: rest.to_string(),
            }
        };
        key.validate()?;
        Ok(key)
    }
}

/// Flags accepted by ADD_ONION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnionFlag {
    /// Do not return the generated private key.
    DiscardPK,
    /// Keep the service after this control connection closes.
    Detach,
    /// Require v2 client authorization.
    BasicAuth,
    /// Require v3 client authorization.
    V3Auth,
    /// Single-hop service (requires a non-anonymous daemon).
    NonAnonymous,
    /// Close the circuit when MaxStreams is exceeded.
    MaxStreamsCloseCircuit,
}

impl OnionFlag {
    const ALL: [OnionFlag; 6] = [
        OnionFlag::DiscardPK,
        OnionFlag::Detach,
        OnionFlag::BasicAuth,
        OnionFlag::V3Auth,
        OnionFlag::NonAnonymous,
        OnionFlag::MaxStreamsCloseCircuit,
    ];

    /// The flag name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OnionFlag::DiscardPK => "DiscardPK",
            OnionFlag::Detach => "Detach",
            OnionFlag::BasicAuth => "BasicAuth",
            OnionFlag::V3Auth => "V3Auth",
            OnionFlag::NonAnonymous => "NonAnonymous",
            OnionFlag::MaxStreamsCloseCircuit => "MaxStreamsCloseCircuit",
        }
    }
}

impl fmt::Display for OnionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OnionFlag {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        OnionFlag::ALL
            .into_iter()
            .find(|flag| flag.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| invalid(format!("Unknown ADD_ONION flag: {}", s)))
    }
}

/// One `Port=` mapping of an onion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionPort {
    /// Port clients connect to on the onion address.
    pub virtual_port: u16,
    /// Local `host:port`, port or `unix:` path; same port on localhost when `None`.
    pub target: Option<String>,
}

impl fmt::Display for OnionPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "Port={},{}", self.virtual_port, target),
            None => write!(f, "Port={}", self.virtual_port),
        }
    }
}

/// `ADD_ONION` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOnion {
    /// Key to use or generate.
    pub key: OnionKey,
    /// Service flags.
    pub flags: Vec<OnionFlag>,
    /// Port mappings; at least one is required.
    pub ports: Vec<OnionPort>,
    /// Per-circuit stream limit.
    pub max_streams: Option<u16>,
    /// Authorized v3 client public keys (base32 x25519).
    pub client_auth_v3: Vec<String>,
}

impl AddOnion {
    /// A service with a fresh key of the daemon's preferred type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `key` instead of generating one.
    pub fn key(mut self, key: OnionKey) -> Self {
        self.key = key;
        self
    }

    /// Add a flag.
    pub fn flag(mut self, flag: OnionFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    /// Forward `virtual_port` to `target`.
    pub fn port(mut self, virtual_port: u16, target: impl Into<String>) -> Self {
        self.ports.push(OnionPort {
            virtual_port,
            target: Some(target.into()),
        });
        self
    }

    /// Forward `virtual_port` to the same port on localhost.
    pub fn virtual_port(mut self, virtual_port: u16) -> Self {
        self.ports.push(OnionPort {
            virtual_port,
            target: None,
        });
        self
    }

    /// Limit streams per rendezvous circuit.
    pub fn max_streams(mut self, max_streams: u16) -> Self {
        self.max_streams = Some(max_streams);
        self
    }

    /// Authorize a v3 client key.
    pub fn client_auth_v3(mut self, public_key: impl Into<String>) -> Self {
        self.client_auth_v3.push(public_key.into());
        self
    }

    /// Decode `ServiceID=`, `PrivateKey=` and `ClientAuthV3=` lines.
    pub fn parse_reply(reply: &CommandReply) -> Result<OnionService> {
        let mut service_id = None;
        let mut private_key = None;
        let mut client_auth_v3 = Vec::new();

        for message in &reply.messages {
            if let Some(id) = message.strip_prefix("ServiceID=") {
                service_id = Some(OnionAddress::new(id));
            } else if let Some(key) = message.strip_prefix("PrivateKey=") {
                private_key = Some(key.parse()?);
            } else if let Some(auth) = message.strip_prefix("ClientAuthV3=") {
                client_auth_v3.push(auth.to_string());
            }
        }

        let address = service_id.ok_or_else(|| {
            TorControlError::ParseError("ADD_ONION reply has no ServiceID".to_string())
        })?;
        Ok(OnionService {
            address,
            private_key,
            client_auth_v3,
        })
    }
}

impl ControlCommand for AddOnion {
    fn to_command_line(&self) -> Result<String> {
        self.key.validate()?;

        if self.ports.is_empty() {
            return Err(invalid("ADD_ONION needs at least one port"));
        }
        for port in &self.ports {
            if port.virtual_port == 0 {
                return Err(invalid("Virtual port must not be 0"));
            }
            if let Some(target) = &port.target {
                check_token("Port target", target)?;
            }
        }
        if self.max_streams == Some(0) && self.flags.contains(&OnionFlag::MaxStreamsCloseCircuit)
        {
            return Err(invalid("MaxStreamsCloseCircuit needs a non-zero MaxStreams"));
        }
        for auth in &self.client_auth_v3 {
            check_token("Client auth key", auth)?;
        }

        let mut args = vec![self.key.to_string()];
        if !self.flags.is_empty() {
            let flags: Vec<&str> = self.flags.iter().map(OnionFlag::as_str).collect();
            args.push(format!("Flags={}", flags.join(",")));
        }
        if let Some(max_streams) = self.max_streams {
            args.push(format!("MaxStreams={}", max_streams));
        }
        args.extend(self.ports.iter().map(OnionPort::to_string));
        args.extend(
            self.client_auth_v3
                .iter()
                .map(|auth| format!("ClientAuthV3={}", auth)),
        );

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Ok(format_command("ADD_ONION", &args))
    }
}

/// A service created by ADD_ONION.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionService {
    /// The service's address.
    pub address: OnionAddress,
    /// The generated key, unless `DiscardPK` was set or a key was supplied.
    pub private_key: Option<OnionKey>,
    /// Client keys generated for v3 authorization.
    pub client_auth_v3: Vec<String>,
}

/// `DEL_ONION service-id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelOnion(pub OnionAddress);

impl ControlCommand for DelOnion {
    fn to_command_line(&self) -> Result<String> {
        check_token("Service ID", self.0.service_id())?;
        Ok(format_command("DEL_ONION", &[self.0.service_id()]))
    }
}

/// `HSFETCH address [SERVER=server...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsFetch {
    /// The service whose descriptor to fetch.
    pub address: OnionAddress,
    /// HSDirs to ask instead of the responsible ones.
    pub servers: Vec<String>,
}

impl HsFetch {
    /// Fetch the descriptor of `address` from the responsible HSDirs.
    pub fn new(address: OnionAddress) -> Self {
        Self {
            address,
            servers: Vec::new(),
        }
    }

    /// Ask `server` (a fingerprint or long name) as well.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.servers.push(server.into());
        self
    }
}

impl ControlCommand for HsFetch {
    fn to_command_line(&self) -> Result<String> {
        check_token("Onion address", self.address.service_id())?;
        let mut args = vec![self.address.service_id().to_string()];
        for server in &self.servers {
            check_token("Server", server)?;
            args.push(format!("SERVER={}", server));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Ok(format_command("HSFETCH", &args))
    }
}

/// `EXTENDCIRCUIT id [path] [purpose=...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendCircuit {
    /// The circuit to extend, or [`CircuitId::NEW`].
    pub circuit: CircuitId,
    /// Relays to extend through, by fingerprint or nickname.
    pub path: Vec<String>,
    /// Purpose of a new circuit (`general` or `controller`).
    pub purpose: Option<String>,
}

impl ExtendCircuit {
    /// Build a new circuit through `path`.
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            circuit: CircuitId::NEW,
            path: collect_strings(path),
            purpose: None,
        }
    }

    /// Extend an existing circuit instead.
    pub fn circuit(mut self, circuit: CircuitId) -> Self {
        self.circuit = circuit;
        self
    }

    /// Set the purpose of a new circuit.
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Decode `EXTENDED <id>`.
    pub fn parse_reply(reply: &CommandReply) -> Result<CircuitId> {
        let text = reply.message();
        text.strip_prefix("EXTENDED ")
            .ok_or_else(|| TorControlError::ParseError(format!("Unexpected reply: {}", text)))?
            .trim()
            .parse()
    }
}

impl ControlCommand for ExtendCircuit {
    fn to_command_line(&self) -> Result<String> {
        let mut args = vec![self.circuit.to_string()];
        if !self.path.is_empty() {
            for relay in &self.path {
                check_token("Relay", relay)?;
                if relay.contains(',') {
                    return Err(invalid(format!("Relay must not contain ',': '{}'", relay)));
                }
            }
            args.push(self.path.join(","));
        }
        if let Some(purpose) = &self.purpose {
            check_token("Purpose", purpose)?;
            args.push(format!("purpose={}", purpose));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Ok(format_command("EXTENDCIRCUIT", &args))
    }
}

/// `CLOSECIRCUIT id [IfUnused]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCircuit {
    /// Circuit to close.
    pub circuit: CircuitId,
    /// Only close the circuit if no streams use it.
    pub if_unused: bool,
}

impl ControlCommand for CloseCircuit {
    fn to_command_line(&self) -> Result<String> {
        let id = self.circuit.to_string();
        let line = if self.if_unused {
            format_command("CLOSECIRCUIT", &[&id, "IfUnused"])
        } else {
            format_command("CLOSECIRCUIT", &[&id])
        };
        Ok(line)
    }
}

/// `ATTACHSTREAM stream circuit [HOP=n]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachStream {
    /// Stream to attach.
    pub stream: StreamId,
    /// Target circuit; `0` hands the stream back to the daemon.
    pub circuit: CircuitId,
    /// Exit at this hop instead of the last one.
    pub hop: Option<u8>,
}

impl ControlCommand for AttachStream {
    fn to_command_line(&self) -> Result<String> {
        let mut args = vec![self.stream.to_string(), self.circuit.to_string()];
        match self.hop {
            Some(0) => return Err(invalid("HOP must be at least 1")),
            Some(hop) => args.push(format!("HOP={}", hop)),
            None => {}
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Ok(format_command("ATTACHSTREAM", &args))
    }
}

/// `CLOSESTREAM stream reason`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseStream {
    /// Stream to close.
    pub stream: StreamId,
    /// Relay end reason code (6 is DONE).
    pub reason: u8,
}

impl ControlCommand for CloseStream {
    fn to_command_line(&self) -> Result<String> {
        let id = self.stream.to_string();
        let reason = self.reason.to_string();
        Ok(format_command("CLOSESTREAM", &[&id, &reason]))
    }
}

impl TorSession {
    /// Validate and send a typed command.
    pub async fn execute<C>(&self, command: &C) -> Result<CommandReply>
    where
        C: ControlCommand + ?Sized,
    {
        let line = command.to_command_line()?;
        self.send_command(&line).await
    }

    /// Read configuration options.
    pub async fn get_conf(&self, keys: &[&str]) -> Result<HashMap<String, Vec<String>>> {
        let reply = self.execute(&GetConf::new(keys.iter().copied())).await?;
        Ok(GetConf::parse_reply(&reply))
    }

    /// Change configuration options.
    pub async fn set_conf(&self, settings: &[(&str, &str)]) -> Result<()> {
        self.execute(&SetConf::new(settings.iter().copied())).await?;
        Ok(())
    }

    /// Reset configuration options to their defaults.
    pub async fn reset_conf(&self, keys: &[&str]) -> Result<()> {
        self.execute(&ResetConf::new(keys.iter().copied())).await?;
        Ok(())
    }

    /// Query information keys.
    pub async fn get_info(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let reply = self.execute(&GetInfo::new(keys.iter().copied())).await?;
        Ok(GetInfo::parse_reply(&reply))
    }

    /// Send a signal to the daemon.
    pub async fn signal(&self, signal: Signal) -> Result<()> {
        self.execute(&signal).await?;
        Ok(())
    }

    /// Install address mappings; returns the mappings the daemon reports.
    pub async fn map_address(&self, mappings: &[(&str, &str)]) -> Result<HashMap<String, String>> {
        let reply = self
            .execute(&MapAddress::new(mappings.iter().copied()))
            .await?;
        Ok(MapAddress::parse_reply(&reply))
    }

    /// Create an onion service.
    pub async fn add_onion(&self, request: &AddOnion) -> Result<OnionService> {
        let reply = self.execute(request).await?;
        AddOnion::parse_reply(&reply)
    }

    /// Remove an onion service created by this or a detached session.
    pub async fn del_onion(&self, address: &OnionAddress) -> Result<()> {
        self.execute(&DelOnion(address.clone())).await?;
        Ok(())
    }

    /// Ask the daemon to fetch a service descriptor.
    ///
    /// The result arrives as `HS_DESC` events.
    pub async fn hs_fetch(&self, request: &HsFetch) -> Result<()> {
        self.execute(request).await?;
        Ok(())
    }

    /// Build or extend a circuit; returns its ID.
    pub async fn extend_circuit(&self, request: &ExtendCircuit) -> Result<CircuitId> {
        let reply = self.execute(request).await?;
        ExtendCircuit::parse_reply(&reply)
    }

    /// Close a circuit.
    pub async fn close_circuit(&self, circuit: CircuitId, if_unused: bool) -> Result<()> {
        self.execute(&CloseCircuit { circuit, if_unused }).await?;
        Ok(())
    }

    /// Attach a stream to a circuit.
    pub async fn attach_stream(&self, stream: StreamId, circuit: CircuitId) -> Result<()> {
        self.execute(&AttachStream {
            stream,
            circuit,
            hop: None,
        })
        .await?;
        Ok(())
    }

    /// Close a stream.
    pub async fn close_stream(&self, stream: StreamId, reason: u8) -> Result<()> {
        self.execute(&CloseStream { stream, reason }).await?;
        Ok(())
    }
}
