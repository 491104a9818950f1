//! Authentication credentials and the secrets derived from them.
//!
//! Every credential ends up as a hex string on the `AUTHENTICATE` line:
//! passwords are hex-encoded byte for byte, cookies are the hex of the cookie
//! file. SAFECOOKIE additionally runs an `AUTHCHALLENGE` exchange first; the
//! HMAC helpers for that live here, the exchange itself in
//! [`crate::connection`].

use crate::error::{Result, TorControlError};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};

type HmacSha256 = Hmac<Sha256>;

const SERVER_HASH_KEY: &[u8] = b"Tor safe cookie authentication server-to-controller hash";
const CLIENT_HASH_KEY: &[u8] = b"Tor safe cookie authentication controller-to-server hash";

/// Length of a Tor authentication cookie and of the SAFECOOKIE nonces.
pub const COOKIE_LEN: usize = 32;

/// Authentication credentials for the control port.
#[derive(Debug, Clone, Default)]
pub enum AuthCredential {
    /// No authentication (NULL method).
    #[default]
    None,
    /// Raw password, sent hex-encoded.
    Password(String),
    /// Cookie file whose bytes are sent hex-encoded.
    CookieFile(PathBuf),
    /// Cookie bytes already loaded by the caller.
    CookieData(Vec<u8>),
    /// SAFECOOKIE challenge-response using the cookie at this path.
    SafeCookie {
        /// Path to the cookie file.
        cookie_path: PathBuf,
    },
}

impl AuthCredential {
    /// Create password credentials.
    pub fn password(password: impl Into<String>) -> Self {
        AuthCredential::Password(password.into())
    }

    /// Create cookie file credentials.
    pub fn cookie_file(path: impl Into<PathBuf>) -> Self {
        AuthCredential::CookieFile(path.into())
    }

    /// Create safe cookie credentials.
    pub fn safe_cookie(cookie_path: impl Into<PathBuf>) -> Self {
        AuthCredential::SafeCookie {
            cookie_path: cookie_path.into(),
        }
    }

    /// The hex secret for a plain `AUTHENTICATE` line.
    ///
    /// `None` for NULL authentication. SAFECOOKIE has no static secret and
    /// yields an error; it must go through the challenge exchange.
    pub fn hex_secret(&self) -> Result<Option<String>> {
        match self {
            AuthCredential::None => Ok(None),
            AuthCredential::Password(password) => Ok(Some(hex::encode_upper(password))),
            AuthCredential::CookieFile(path) => {
                Ok(Some(hex::encode_upper(read_cookie_file(path)?)))
            }
            AuthCredential::CookieData(cookie) => Ok(Some(hex::encode_upper(cookie))),
            AuthCredential::SafeCookie { .. } => Err(TorControlError::InvalidArgument(
                "SAFECOOKIE has no static secret".to_string(),
            )),
        }
    }
}

/// Build the `AUTHENTICATE` command line for a hex secret.
pub fn authenticate_command(hex_secret: Option<&str>) -> String {
    match hex_secret {
        Some(secret) => format!("AUTHENTICATE {}", secret),
        None => "AUTHENTICATE".to_string(),
    }
}

/// Read the authentication cookie from a file.
pub fn read_cookie_file(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path).map_err(|e| {
        TorControlError::AuthenticationFailed(format!(
            "Failed to read cookie file '{}': {}",
            path.display(),
            e
        ))
    })?;

    if data.is_empty() {
        return Err(TorControlError::AuthenticationFailed(format!(
            "Cookie file '{}' is empty",
            path.display()
        )));
    }

    Ok(data)
}

/// Generate a random client nonce for SAFECOOKIE authentication.
pub fn generate_client_nonce() -> [u8; COOKIE_LEN] {
    use rand::Rng;
    let mut nonce = [0u8; COOKIE_LEN];
    rand::rng().fill(&mut nonce);
    nonce
}

fn safecookie_hash(key: &[u8], cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length should be valid");
    mac.update(cookie);
    mac.update(client_nonce);
    mac.update(server_nonce);
    mac.finalize().into_bytes().to_vec()
}

/// Hash the daemon must present in its AUTHCHALLENGE reply.
pub fn compute_server_hash(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> Vec<u8> {
    safecookie_hash(SERVER_HASH_KEY, cookie, client_nonce, server_nonce)
}

/// Hash the client sends back on the AUTHENTICATE line.
pub fn compute_client_hash(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> Vec<u8> {
    safecookie_hash(CLIENT_HASH_KEY, cookie, client_nonce, server_nonce)
}

/// Parse `AUTHCHALLENGE SERVERHASH=<hex> SERVERNONCE=<hex>`.
///
/// Returns `(server_hash, server_nonce)`.
pub fn parse_authchallenge_response(text: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut server_hash = None;
    let mut server_nonce = None;

    for part in text.split_whitespace() {
        if let Some(hash) = part.strip_prefix("SERVERHASH=") {
            server_hash = Some(hex::decode(hash).map_err(|e| {
                TorControlError::ProtocolError(format!("Invalid SERVERHASH hex: {}", e))
            })?);
        } else if let Some(nonce) = part.strip_prefix("SERVERNONCE=") {
            server_nonce = Some(hex::decode(nonce).map_err(|e| {
                TorControlError::ProtocolError(format!("Invalid SERVERNONCE hex: {}", e))
            })?);
        }
    }

    let server_hash = server_hash
        .ok_or_else(|| TorControlError::ProtocolError("Missing SERVERHASH".to_string()))?;
    let server_nonce = server_nonce
        .ok_or_else(|| TorControlError::ProtocolError("Missing SERVERNONCE".to_string()))?;

    for (name, value) in [("SERVERHASH", &server_hash), ("SERVERNONCE", &server_nonce)] {
        if value.len() != COOKIE_LEN {
            return Err(TorControlError::ProtocolError(format!(
                "Invalid {} length: {}",
                name,
                value.len()
            )));
        }
    }

    Ok((server_hash, server_nonce))
}

/// Check the daemon's SAFECOOKIE hash in constant time.
pub fn verify_server_hash(
    cookie: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
    expected_hash: &[u8],
) -> bool {
    let computed = compute_server_hash(cookie, client_nonce, server_nonce);
    computed.len() == expected_hash.len()
        && computed
            .iter()
            .zip(expected_hash)
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}
