//! Reply builders and canned control-port traffic for tests.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tor-session = { version = "0.1", features = ["test-utils"] }
//! ```
//!
//! ```rust,ignore
//! use tor_session::test_utils::{fixtures, MockTorResponse};
//!
//! let reply = MockTorResponse::new()
//!     .data_line("version=0.4.8.12")
//!     .finish()
//!     .build();
//! assert_eq!(reply, "250-version=0.4.8.12\r\n250 OK\r\n");
//! ```

use crate::auth::compute_server_hash;

/// Builder for control-port replies as the daemon would write them.
#[derive(Debug, Clone, Default)]
pub struct MockTorResponse {
    lines: Vec<String>,
}

impl MockTorResponse {
    /// Create an empty reply.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bare `250 OK`.
    pub fn ok() -> Self {
        Self {
            lines: vec!["250 OK".to_string()],
        }
    }

    /// A single-line failure.
    pub fn error(code: u16, message: &str) -> Self {
        Self {
            lines: vec![format!("{} {}", code, message)],
        }
    }

    /// An asynchronous `650` event.
    pub fn event(body: &str) -> Self {
        Self {
            lines: vec![format!("650 {}", body)],
        }
    }

    /// Add a `250-` continuation line.
    pub fn data_line(mut self, line: &str) -> Self {
        self.lines.push(format!("250-{}", line));
        self
    }

    /// Add a `250+` data block, dot-stuffing lines that start with `.`.
    pub fn data_block(mut self, header: &str, content: &str) -> Self {
        self.lines.push(format!("250+{}", header));
        for line in content.lines() {
            if line.starts_with('.') {
                self.lines.push(format!(".{}", line));
            } else {
                self.lines.push(line.to_string());
            }
        }
        self.lines.push(".".to_string());
        self
    }

    /// Add the final `250 OK`.
    pub fn finish(mut self) -> Self {
        self.lines.push("250 OK".to_string());
        self
    }

    /// Render with CRLF terminators.
    pub fn build(&self) -> String {
        self.lines.iter().map(|l| format!("{}\r\n", l)).collect()
    }

    /// Render as bytes.
    pub fn as_bytes(&self) -> Vec<u8> {
        self.build().into_bytes()
    }
}

/// The AUTHCHALLENGE reply a daemon holding `cookie` would send.
pub fn authchallenge_response(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> String {
    let server_hash = compute_server_hash(cookie, client_nonce, server_nonce);
    format!(
        "250 AUTHCHALLENGE SERVERHASH={} SERVERNONCE={}\r\n",
        hex::encode_upper(server_hash),
        hex::encode_upper(server_nonce)
    )
}

/// Canned replies and events.
pub mod fixtures {
    /// Password used by the fixtures.
    pub const PASSWORD: &str = "test";

    /// The AUTHENTICATE line for [`PASSWORD`].
    pub const PASSWORD_AUTH_LINE: &str = "AUTHENTICATE 74657374";

    /// A v3 service ID.
    pub const SERVICE_ID: &str = "pg6mmjiyjmcrsslvykfwnntlaru7p5svn6y2ymmju6nubxndf4pscryd";

    /// Successful AUTHENTICATE.
    pub fn auth_ok_response() -> &'static str {
        "250 OK\r\n"
    }

    /// Rejected AUTHENTICATE.
    pub fn auth_failed_response() -> &'static str {
        "515 Authentication failed: Password did not match HashedControlPassword value from configuration\r\n"
    }

    /// GETINFO version.
    pub fn version_response() -> &'static str {
        "250-version=0.4.8.12 (git-abc123)\r\n\
         250 OK\r\n"
    }

    /// GETINFO config-text, as a data block.
    pub fn config_text_response() -> &'static str {
        "250+config-text=\r\n\
         ControlPort 9051\r\n\
         SocksPort 9050\r\n\
         .\r\n\
         250 OK\r\n"
    }

    /// ADD_ONION with a generated key.
    pub fn add_onion_response() -> String {
        format!(
            "250-ServiceID={}\r\n250-PrivateKey=ED25519-V3:c2VjcmV0a2V5\r\n250 OK\r\n",
            SERVICE_ID
        )
    }

    /// Circuit built.
    pub fn circuit_built_event() -> &'static str {
        "650 CIRC 12345 BUILT $9695DFC35FFEB861329B9F1AB04C46397020CE31~Relay1 PURPOSE=GENERAL\r\n"
    }

    /// Bandwidth sample.
    pub fn bandwidth_event() -> &'static str {
        "650 BW 100 200\r\n"
    }

    /// Unknown configuration key.
    pub fn error_response() -> &'static str {
        "552 Unrecognized key \"NoSuchOption\"\r\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{parse_authchallenge_response, verify_server_hash};
    use crate::protocol::{parse_reply, Parsed};

    #[test]
    fn test_mock_response_with_data() {
        let response = MockTorResponse::new()
            .data_line("version=0.4.8.12")
            .data_line("config-file=/etc/tor/torrc")
            .finish();

        let expected = "250-version=0.4.8.12\r\n250-config-file=/etc/tor/torrc\r\n250 OK\r\n";
        assert_eq!(response.build(), expected);
    }

    #[test]
    fn test_data_block_is_dot_stuffed() {
        let response = MockTorResponse::new()
            .data_block("config-text=", ".hidden\nplain")
            .finish()
            .build();
        assert_eq!(
            response,
            "250+config-text=\r\n..hidden\r\nplain\r\n.\r\n250 OK\r\n"
        );

        match parse_reply(&response) {
            Some(Parsed::Reply { reply, .. }) => {
                assert_eq!(reply.body, "config-text=\n.hidden\nplain\nOK");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_error_and_event() {
        assert_eq!(
            MockTorResponse::error(552, "Unknown option").build(),
            "552 Unknown option\r\n"
        );
        assert_eq!(MockTorResponse::event("BW 1 2").build(), "650 BW 1 2\r\n");
    }

    #[test]
    fn test_authchallenge_response_verifies() {
        let cookie = [7u8; 32];
        let client_nonce = [1u8; 32];
        let server_nonce = [2u8; 32];

        let line = authchallenge_response(&cookie, &client_nonce, &server_nonce);
        let text = line.trim_end().trim_start_matches("250 ");
        let (hash, nonce) = parse_authchallenge_response(text).unwrap();
        assert_eq!(nonce, server_nonce);
        assert!(verify_server_hash(&cookie, &client_nonce, &nonce, &hash));
    }
}
