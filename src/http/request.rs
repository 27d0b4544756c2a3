//! HTTP request head parsing.
//!
//! Only what the relay needs: the request line, a header mapping, the
//! upgrade marker, and the room segment of a WebSocket path.

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest request head accepted, request line and headers included.
pub const MAX_HEAD_LEN: usize = 8 * 1024;

/// Case-sensitive marker that identifies an upgrade request.
pub const UPGRADE_MARKER: &str = "Upgrade: websocket";

// ============================================================================
// Headers
// ============================================================================

/// Header lines of a request, in arrival order.
///
/// Lookups ignore ASCII case; when a name repeats, the last value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Parses every `Name: value` line after the request line, stopping at
    /// the first empty line. Lines without a colon are skipped.
    #[must_use]
    pub fn parse(head: &str) -> Self {
        let entries = head
            .split("\r\n")
            .skip(1)
            .take_while(|line| !line.is_empty())
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Self { entries }
    }

    /// Builds headers from name/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns the value of `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the number of header lines.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no header lines.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// RequestHead
// ============================================================================

/// A parsed HTTP request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target as sent, e.g. `/ws/lobby`.
    pub path: String,
    /// Header mapping.
    pub headers: Headers,
    /// The head exactly as received.
    raw: String,
}

impl RequestHead {
    /// Parses a request head (request line plus header lines).
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProtocolError::MalformedRequest`] if the request line
    /// does not have at least a method and a target.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();

        let request_line = raw.split("\r\n").next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
            return Err(Error::malformed_request(format!(
                "bad request line: {request_line:?}"
            )));
        };

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: Headers::parse(&raw),
            raw,
        })
    }

    /// The head exactly as received.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns `true` if the raw head contains `Upgrade: websocket`.
    #[inline]
    #[must_use]
    pub fn is_upgrade(&self) -> bool {
        self.raw.contains(UPGRADE_MARKER)
    }

    /// Returns the room name if the path designates a room endpoint.
    #[inline]
    #[must_use]
    pub fn room<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        room_from_path(&self.path, prefix)
    }
}

// ============================================================================
// Public Functions
// ============================================================================

/// Extracts the room segment from `path` under `prefix`.
///
/// The name is the text after the prefix up to the next `/` or `?`, taken
/// verbatim. Returns `None` for other paths or an empty name.
///
/// ```
/// use roomcast::http::room_from_path;
///
/// assert_eq!(room_from_path("/ws/lobby", "/ws/"), Some("lobby"));
/// assert_eq!(room_from_path("/ws/", "/ws/"), None);
/// assert_eq!(room_from_path("/index.html", "/ws/"), None);
/// ```
#[must_use]
pub fn room_from_path<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    let end = rest.find(['/', '?']).unwrap_or(rest.len());
    let room = &rest[..end];

    (!room.is_empty()).then_some(room)
}

/// Reads a request head up to and including the blank line.
///
/// Bytes after the blank line stay in `reader`, so the same buffered reader
/// can go on to decode frames.
///
/// # Errors
///
/// - [`crate::Error::Io`] with `UnexpectedEof` if the peer closes before the blank line
/// - [`crate::ProtocolError::MalformedRequest`] if the head exceeds [`MAX_HEAD_LEN`]
///   or the request line is invalid
pub async fn read_request_head<R>(reader: &mut R) -> Result<RequestHead>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = String::new();

    loop {
        let remaining = MAX_HEAD_LEN.saturating_sub(raw.len()) as u64;
        if remaining == 0 {
            return Err(Error::malformed_request("request head too large"));
        }

        let read = (&mut *reader).take(remaining).read_line(&mut raw).await?;
        if read == 0 {
            return Err(IoError::new(
                ErrorKind::UnexpectedEof,
                "connection closed before end of request head",
            )
            .into());
        }

        if !raw.ends_with('\n') {
            // take() limit reached mid-line
            return Err(Error::malformed_request("request head too large"));
        }

        if raw.ends_with("\r\n\r\n") || raw == "\r\n" {
            break;
        }
    }

    trace!(len = raw.len(), "Request head read");
    RequestHead::parse(raw)
}

// ============================================================================
// Tests
// ============================================================================
