//! Reply framing and parsing.
//!
//! This module is pure: it turns buffered control-port text into structured
//! [`Reply`] values and formats outgoing command lines. It never touches a
//! socket. The reader task in [`crate::connection`] feeds it through a
//! [`ReplyBuffer`], which keeps unconsumed bytes across reads so a reply may
//! span several reads and one read may carry several replies.

use crate::error::{Result, StatusCode, TorControlError};
use std::collections::HashMap;

/// Marker of the final line of a reply.
pub const END_MARKER: char = ' ';
/// Marker of a mid-reply line.
pub const MID_MARKER: char = '-';
/// Marker of a line followed by a dot-terminated data block.
pub const DATA_MARKER: char = '+';

/// A single reply line from Tor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// The 3-digit status code.
    pub code: u16,
    /// The separator character: '-' for mid-reply, '+' for data, ' ' for end.
    pub separator: char,
    /// The text content of the line, with any data block appended after `\n`.
    pub text: String,
}

impl ReplyLine {
    /// Parse a reply line (without its line terminator).
    pub fn parse(line: &str) -> Result<Self> {
        let code_str = line.get(..3).ok_or_else(|| {
            TorControlError::ProtocolError(format!("Reply line too short: '{}'", line))
        })?;

        if !code_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TorControlError::ProtocolError(format!(
                "Invalid status code in: '{}'",
                line
            )));
        }
        let code: u16 = code_str.parse().map_err(|_| {
            TorControlError::ProtocolError(format!("Invalid status code in: '{}'", line))
        })?;

        let separator = line[3..].chars().next().ok_or_else(|| {
            TorControlError::ProtocolError(format!("Missing separator in: '{}'", line))
        })?;

        if !matches!(separator, END_MARKER | MID_MARKER | DATA_MARKER) {
            return Err(TorControlError::ProtocolError(format!(
                "Invalid separator '{}' in: '{}'",
                separator, line
            )));
        }

        Ok(ReplyLine {
            code,
            separator,
            text: line[4..].to_string(),
        })
    }

    /// Check if this is the final line of a reply.
    pub fn is_end(&self) -> bool {
        self.separator == END_MARKER
    }

    /// Check if this line introduces a data block.
    pub fn is_data(&self) -> bool {
        self.separator == DATA_MARKER
    }

    /// Check if this is a mid-reply line.
    pub fn is_mid(&self) -> bool {
        self.separator == MID_MARKER
    }
}

/// A complete reply from Tor, potentially spanning multiple lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The status code of the first line.
    pub code: u16,
    /// The marker of the first line: single-line, continuation or data block.
    pub marker: char,
    /// Line bodies joined with `\n`.
    pub body: String,
    /// The individual reply lines.
    pub lines: Vec<ReplyLine>,
    /// The raw text this reply was parsed from, terminators included.
    pub raw: String,
}

impl Reply {
    /// Assemble a reply from its parsed lines.
    pub fn new(lines: Vec<ReplyLine>, raw: impl Into<String>) -> Result<Self> {
        let first = lines
            .first()
            .ok_or_else(|| TorControlError::ProtocolError("Empty reply".to_string()))?;
        let code = first.code;
        let marker = first.separator;
        let body = lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Reply {
            code,
            marker,
            body,
            lines,
            raw: raw.into(),
        })
    }

    /// Get the status code as an enum.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code)
    }

    /// Check if this reply indicates success.
    pub fn is_success(&self) -> bool {
        self.status_code().is_success()
    }

    /// Check if this is an asynchronous event.
    pub fn is_async_event(&self) -> bool {
        self.status_code() == StatusCode::AsyncEvent
    }

    /// Get the first line's text.
    pub fn first_line(&self) -> &str {
        self.lines.first().map(|l| l.text.as_str()).unwrap_or("")
    }

    /// One message per logical line, status-and-marker prefix stripped.
    pub fn messages(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.text.clone()).collect()
    }

    /// Convert this reply into a Result, returning an error if the reply indicates failure.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TorControlError::CommandRejected {
                code: self.code,
                message: self.body,
            })
        }
    }
}

/// Outcome of parsing one reply from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// A complete reply.
    Reply {
        /// The parsed reply.
        reply: Reply,
        /// Bytes of the buffer the reply occupied.
        consumed: usize,
    },
    /// A line that does not follow the reply grammar.
    ///
    /// When the line interrupts a multi-line reply, the rest of that reply
    /// is consumed with it so it cannot be taken for the next one.
    Malformed {
        /// The first offending line, terminator stripped.
        line: String,
        /// Bytes of the buffer up to and including the offending line, or
        /// through the end line of the reply it interrupted.
        consumed: usize,
    },
}

impl Parsed {
    /// Number of bytes to drop from the front of the buffer.
    pub fn consumed(&self) -> usize {
        match self {
            Parsed::Reply { consumed, .. } | Parsed::Malformed { consumed, .. } => *consumed,
        }
    }
}

/// Returns the line starting at `from` with its terminator removed, and the
/// offset just past the terminator. `None` when no terminator has arrived.
fn next_line(buf: &str, from: usize) -> Option<(&str, usize)> {
    let rest = &buf[from..];
    let nl = rest.find('\n')?;
    let line = &rest[..nl];
    let line = line.strip_suffix('\r').unwrap_or(line);
    Some((line, from + nl + 1))
}

/// Remove dot-stuffing from a data-block line.
fn unstuff(line: &str) -> &str {
    if line.starts_with("..") {
        &line[1..]
    } else {
        line
    }
}

/// Parse exactly one reply from the front of `buf`.
///
/// Returns `None` when the reply is not complete yet; the caller should wait
/// for more bytes and try again with the same buffer. Both `\r\n` and `\n`
/// terminate lines.
///
/// # Example
///
/// ```rust
/// use tor_session::protocol::{parse_reply, Parsed};
///
/// match parse_reply("250-a\r\n250 b\r\n") {
///     Some(Parsed::Reply { reply, consumed }) => {
///         assert_eq!(reply.body, "a\nb");
///         assert_eq!(consumed, 14);
///     }
///     other => panic!("unexpected: {:?}", other),
/// }
/// assert!(parse_reply("250 O").is_none());
/// ```
pub fn parse_reply(buf: &str) -> Option<Parsed> {
    let mut pos = 0;
    let mut lines = Vec::new();
    let mut broken: Option<String> = None;

    loop {
        let (raw_line, next) = next_line(buf, pos)?;
        pos = next;
        let mut line = match ReplyLine::parse(raw_line) {
            Ok(line) => line,
            Err(_) if lines.is_empty() && broken.is_none() => {
                return Some(Parsed::Malformed {
                    line: raw_line.to_string(),
                    consumed: pos,
                })
            }
            Err(_) => {
                // Mid-reply: skip ahead to this reply's end line
                broken.get_or_insert_with(|| raw_line.to_string());
                continue;
            }
        };

        if line.is_data() {
            let mut block = Vec::new();
            loop {
                let (data_line, next) = next_line(buf, pos)?;
                pos = next;
                if data_line == "." {
                    break;
                }
                block.push(unstuff(data_line));
            }
            if !block.is_empty() {
                line.text = format!("{}\n{}", line.text, block.join("\n"));
            }
        }

        let is_end = line.is_end();
        lines.push(line);
        if is_end {
            break;
        }
    }

    if let Some(line) = broken {
        return Some(Parsed::Malformed {
            line,
            consumed: pos,
        });
    }

    // `lines` always holds at least the terminating line here
    let reply = Reply::new(lines, &buf[..pos]).ok()?;
    Some(Parsed::Reply {
        reply,
        consumed: pos,
    })
}

/// Accumulates bytes read from the control port and drains complete replies.
///
/// Lines are classified once as they arrive, and a parse is only attempted
/// when a line could close a reply. A large data block arriving over many
/// reads is therefore parsed once.
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    buf: Vec<u8>,
    /// Offset of the first line not classified yet.
    scanned: usize,
    /// Whether `scanned` lies inside a data block.
    in_data: bool,
}

/// The marker byte of a well-formed reply line, `None` when malformed.
fn line_marker(line: &[u8]) -> Option<u8> {
    match line {
        [a, b, c, marker, ..]
            if a.is_ascii_digit()
                && b.is_ascii_digit()
                && c.is_ascii_digit()
                && matches!(*marker, b' ' | b'-' | b'+') =>
        {
            Some(*marker)
        }
        _ => None,
    }
}

impl ReplyBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet consumed by a reply.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether every received byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the next complete reply (or malformed line) off the front.
    pub fn next_reply(&mut self) -> Option<Parsed> {
        loop {
            let rest = &self.buf[self.scanned..];
            let nl = rest.iter().position(|&b| b == b'\n')?;
            let line = &rest[..nl];
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            let may_close = if self.in_data {
                if line == b"." {
                    self.in_data = false;
                }
                false
            } else {
                match line_marker(line) {
                    Some(b'-') => false,
                    Some(b'+') => {
                        self.in_data = true;
                        false
                    }
                    _ => true,
                }
            };
            self.scanned += nl + 1;

            if may_close {
                if let Some(parsed) = self.parse_scanned() {
                    return Some(parsed);
                }
            }
        }
    }

    fn parse_scanned(&mut self) -> Option<Parsed> {
        // Only whole lines are decoded, so a multi-byte character split
        // across reads stays unscanned until its line completes.
        let end = self.scanned;
        if std::str::from_utf8(&self.buf[..end]).is_err() {
            let lossy = String::from_utf8_lossy(&self.buf[..end]).into_owned();
            self.scanned = lossy.len();
            self.buf.splice(..end, lossy.into_bytes());
        }

        let text = std::str::from_utf8(&self.buf[..self.scanned]).ok()?;
        let parsed = parse_reply(text)?;
        self.buf.drain(..parsed.consumed());
        self.scanned -= parsed.consumed();
        Some(parsed)
    }
}

/// Parse keyword=value pairs from a reply line.
pub fn parse_key_value_pairs(text: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let mut remaining = text;

    loop {
        remaining = remaining.trim_start();
        let Some(key_end) = remaining.find('=') else {
            break;
        };

        let key = remaining[..key_end].to_string();
        remaining = &remaining[key_end + 1..];

        let (value, rest) = if remaining.starts_with('"') {
            parse_quoted_string(remaining)
        } else {
            let end = remaining.find(' ').unwrap_or(remaining.len());
            (remaining[..end].to_string(), &remaining[end..])
        };

        result.insert(key, value);
        remaining = rest;
    }

    result
}

/// Parse a quoted string, handling escape sequences.
fn parse_quoted_string(s: &str) -> (String, &str) {
    let mut result = String::new();
    let mut chars = s[1..].chars();
    let mut consumed = 1;

    while let Some(c) = chars.next() {
        consumed += c.len_utf8();
        match c {
            '"' => break,
            '\\' => {
                if let Some(next) = chars.next() {
                    consumed += next.len_utf8();
                    result.push(match next {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    });
                }
            }
            _ => result.push(c),
        }
    }

    (result, &s[consumed..])
}

/// Quote a string for use in a Tor control command.
pub fn quote_string(s: &str) -> String {
    let needs_quoting = s.is_empty()
        || s.chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || !(' '..='~').contains(&c));

    if !needs_quoting {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len() + 2);
    result.push('"');
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(c),
        }
    }
    result.push('"');
    result
}

/// Format a command line from a keyword and its arguments, without terminator.
pub fn format_command(keyword: &str, args: &[&str]) -> String {
    let mut cmd = keyword.to_string();
    for arg in args {
        cmd.push(' ');
        cmd.push_str(arg);
    }
    cmd
}

/// Terminate a command line with CRLF unless it already ends in a line break.
pub fn terminate_line(command: &str) -> String {
    if command.ends_with('\n') {
        command.to_string()
    } else {
        format!("{}\r\n", command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_reply(buf: &str) -> (Reply, usize) {
        match parse_reply(buf) {
            Some(Parsed::Reply { reply, consumed }) => (reply, consumed),
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[test]
    fn test_reply_line_parsing() {
        let line = ReplyLine::parse("250 OK").unwrap();
        assert_eq!(line.code, 250);
        assert_eq!(line.separator, ' ');
        assert_eq!(line.text, "OK");
        assert!(line.is_end());

        assert!(ReplyLine::parse("250-version=0.4.8.10").unwrap().is_mid());
        assert!(ReplyLine::parse("250+config-text=").unwrap().is_data());
    }

    #[test]
    fn test_reply_line_rejects_bad_input() {
        assert!(ReplyLine::parse("25").is_err());
        assert!(ReplyLine::parse("").is_err());
        assert!(ReplyLine::parse("ABC OK").is_err());
        assert!(ReplyLine::parse("+25 OK").is_err());
        assert!(ReplyLine::parse("250/OK").is_err());
        assert!(ReplyLine::parse("250").is_err());
    }

    #[test]
    fn test_single_line_reply() {
        let (reply, consumed) = expect_reply("250 OK\r\n");
        assert_eq!(reply.code, 250);
        assert_eq!(reply.marker, ' ');
        assert_eq!(reply.body, "OK");
        assert_eq!(consumed, 8);
        assert_eq!(reply.raw, "250 OK\r\n");
    }

    #[test]
    fn test_single_line_with_bare_lf() {
        let (reply, consumed) = expect_reply("250 OK\n");
        assert_eq!(reply.body, "OK");
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_single_line_incomplete() {
        assert!(parse_reply("250 OK").is_none());
        assert!(parse_reply("").is_none());
    }

    #[test]
    fn test_multi_line_reply() {
        let (reply, _) = expect_reply("250-a\r\n250 b\r\n");
        assert_eq!(reply.code, 250);
        assert_eq!(reply.marker, '-');
        assert_eq!(reply.body, "a\nb");
        assert_eq!(reply.messages(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_multi_line_incomplete_propagates() {
        assert!(parse_reply("250-a\r\n").is_none());
        assert!(parse_reply("250-a\r\n250-b\r\n250 c").is_none());
    }

    #[test]
    fn test_data_block_unstuffs_leading_dot() {
        let (reply, consumed) = expect_reply("250+data\r\n..dotted\r\n.\r\n250 OK\r\n");
        assert_eq!(reply.marker, '+');
        assert!(reply.body.contains(".dotted"));
        assert!(!reply.body.contains("..dotted"));
        assert_eq!(reply.body, "data\n.dotted\nOK");
        assert_eq!(consumed, "250+data\r\n..dotted\r\n.\r\n250 OK\r\n".len());
    }

    #[test]
    fn test_data_block_incomplete() {
        assert!(parse_reply("250+data\r\nline\r\n").is_none());
        assert!(parse_reply("250+data\r\nline\r\n.\r\n").is_none());
    }

    #[test]
    fn test_data_block_in_getinfo_reply() {
        let buf = "250+config-text=\r\nSocksPort 9050\r\nControlPort 9051\r\n.\r\n250 OK\r\n";
        let (reply, _) = expect_reply(buf);
        assert_eq!(reply.lines.len(), 2);
        assert_eq!(
            reply.lines[0].text,
            "config-text=\nSocksPort 9050\nControlPort 9051"
        );
    }

    #[test]
    fn test_malformed_marker_is_reported() {
        match parse_reply("250/OK\r\n250 OK\r\n") {
            Some(Parsed::Malformed { line, consumed }) => {
                assert_eq!(line, "250/OK");
                assert_eq!(consumed, 8);
            }
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_line_inside_reply_consumes_whole_reply() {
        assert!(parse_reply("250-a\r\nBAD LINE\r\n").is_none());

        let buf = "250-a\r\nBAD LINE\r\n250-b\r\nworse\r\n250 tail\r\n250 next\r\n";
        match parse_reply(buf) {
            Some(Parsed::Malformed { line, consumed }) => {
                assert_eq!(line, "BAD LINE");
                assert_eq!(&buf[consumed..], "250 next\r\n");
            }
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_only_first_reply_is_parsed() {
        let (reply, consumed) = expect_reply("650 BW 1 2\r\n250 OK\r\n");
        assert!(reply.is_async_event());
        assert_eq!(reply.body, "BW 1 2");
        assert_eq!(consumed, 12);
    }

    #[test]
    fn test_buffer_assembles_across_reads() {
        let mut buffer = ReplyBuffer::new();
        buffer.extend(b"250-version=0.4");
        assert!(buffer.next_reply().is_none());
        buffer.extend(b".8.12\r\n250 ");
        assert!(buffer.next_reply().is_none());
        buffer.extend(b"OK\r\n");

        match buffer.next_reply() {
            Some(Parsed::Reply { reply, .. }) => assert_eq!(reply.body, "version=0.4.8.12\nOK"),
            other => panic!("expected reply, got {:?}", other),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_drains_several_replies_from_one_read() {
        let mut buffer = ReplyBuffer::new();
        buffer.extend(b"650 BW 100 200\r\n250 OK\r\n552 Unknown\r\n");

        let codes: Vec<u16> = std::iter::from_fn(|| buffer.next_reply())
            .map(|p| match p {
                Parsed::Reply { reply, .. } => reply.code,
                Parsed::Malformed { .. } => 0,
            })
            .collect();
        assert_eq!(codes, vec![650, 250, 552]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_holds_interrupted_reply_until_its_end_line() {
        let mut buffer = ReplyBuffer::new();
        buffer.extend(b"250-a\r\nBAD LINE\r\n");
        assert!(buffer.next_reply().is_none());
        buffer.extend(b"250 tail\r\n250 next\r\n");

        match buffer.next_reply() {
            Some(Parsed::Malformed { line, .. }) => assert_eq!(line, "BAD LINE"),
            other => panic!("expected malformed, got {:?}", other),
        }
        match buffer.next_reply() {
            Some(Parsed::Reply { reply, .. }) => assert_eq!(reply.body, "next"),
            other => panic!("expected reply, got {:?}", other),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_data_block_over_many_small_reads() {
        let mut text = String::from("250+ns/all=\r\n");
        for i in 0..500 {
            text.push_str(&format!("r relay{} AAAA 2024-01-01\r\n", i));
        }
        // Lines shaped like reply lines inside the block must not end it
        text.push_str("250 not the end\r\n.\r\n250 OK\r\n");

        let mut buffer = ReplyBuffer::new();
        let mut replies = Vec::new();
        for chunk in text.as_bytes().chunks(7) {
            buffer.extend(chunk);
            replies.extend(std::iter::from_fn(|| buffer.next_reply()));
        }

        assert_eq!(replies.len(), 1);
        match &replies[0] {
            Parsed::Reply { reply, consumed } => {
                assert_eq!(*consumed, text.len());
                assert_eq!(reply.lines.len(), 2);
                assert!(reply.lines[0]
                    .text
                    .ends_with("r relay499 AAAA 2024-01-01\n250 not the end"));
                assert_eq!(reply.lines[1].text, "OK");
            }
            other => panic!("expected reply, got {:?}", other),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_keeps_split_utf8_character() {
        let text = "250 caf\u{e9}\r\n".as_bytes();
        let split = text.len() - 3;
        let mut buffer = ReplyBuffer::new();
        buffer.extend(&text[..split]);
        assert!(buffer.next_reply().is_none());
        buffer.extend(&text[split..]);

        match buffer.next_reply() {
            Some(Parsed::Reply { reply, .. }) => assert_eq!(reply.body, "caf\u{e9}"),
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_reply_into_result() {
        let (ok, _) = expect_reply("250 OK\r\n");
        assert!(ok.into_result().is_ok());

        let (rejected, _) = expect_reply("510 Unrecognized command \"FOO\"\r\n");
        match rejected.into_result() {
            Err(TorControlError::CommandRejected { code, message }) => {
                assert_eq!(code, 510);
                assert_eq!(message, "Unrecognized command \"FOO\"");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_key_value_parsing() {
        let pairs = parse_key_value_pairs("KEY1=value1 KEY2=\"quoted value\" MSG=\"a\\nb\"");
        assert_eq!(pairs.get("KEY1"), Some(&"value1".to_string()));
        assert_eq!(pairs.get("KEY2"), Some(&"quoted value".to_string()));
        assert_eq!(pairs.get("MSG"), Some(&"a\nb".to_string()));
        assert!(parse_key_value_pairs("").is_empty());
        assert!(parse_key_value_pairs("no pairs here").is_empty());
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_string("simple"), "simple");
        assert_eq!(quote_string(""), "\"\"");
        assert_eq!(quote_string("with space"), "\"with space\"");
        assert_eq!(quote_string("with\"quote"), "\"with\\\"quote\"");
        assert_eq!(quote_string("tab\there"), "\"tab\\there\"");
    }

    #[test]
    fn test_command_formatting() {
        assert_eq!(format_command("SETCONF", &["SocksPort=9050"]), "SETCONF SocksPort=9050");
        assert_eq!(format_command("SETEVENTS", &[]), "SETEVENTS");
        assert_eq!(terminate_line("GETINFO version"), "GETINFO version\r\n");
        assert_eq!(terminate_line("QUIT\r\n"), "QUIT\r\n");
    }
}
