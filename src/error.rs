//! Error types for roomcast.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use roomcast::{Result, protocol::frame::{read_frame, Frame}};
//!
//! async fn next_message(reader: &mut (impl tokio::io::AsyncRead + Unpin)) -> Result<Option<String>> {
//!     match read_frame(reader).await? {
//!         Frame::Text(text) => Ok(Some(text)),
//!         Frame::Close => Ok(None),
//!     }
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Handling |
//! |----------|----------|----------|
//! | Protocol | [`Error::Protocol`] | Connection torn down, no retry |
//! | I/O | [`Error::Io`] | Read or write loop aborted, client removed |
//! | Capacity | [`Error::QueueFull`], [`Error::QueueClosed`] | Message dropped for one recipient |
//! | Admission | [`Error::AdmissionRejected`] | 503 written, connection closed |
//! | Configuration | [`Error::Config`], [`Error::Json`] | Startup fails |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::net::SocketAddr;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::hub::ClientId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// ProtocolError
// ============================================================================

/// A handshake or frame outside the supported subset of RFC 6455.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Upgrade request carried no `Sec-WebSocket-Key` header.
    #[error("missing Sec-WebSocket-Key")]
    MissingNonce,

    /// Frame is not a single, masked text frame.
    #[error("unsupported frame (FIN={fin}, opcode=0x{opcode:x}, mask={masked})")]
    UnsupportedFrame {
        /// FIN bit of the offending frame.
        fin: bool,
        /// Raw 4-bit opcode.
        opcode: u8,
        /// MASK bit of the offending frame.
        masked: bool,
    },

    /// 64-bit extended length above the 2^31 cap.
    #[error("payload too large: {length} bytes")]
    PayloadTooLarge {
        /// Declared payload length.
        length: u64,
    },

    /// Text frame payload is not valid UTF-8.
    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,

    /// HTTP request head could not be parsed.
    #[error("malformed request: {reason}")]
    MalformedRequest {
        /// What was wrong with the request head.
        reason: String,
    },
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Handshake or frame violates the supported protocol subset.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // ========================================================================
    // Capacity Errors
    // ========================================================================
    /// Outbound queue of a client is at capacity.
    ///
    /// Recovered locally by dropping the message for that client only.
    #[error("Outbound queue full for {client}")]
    QueueFull {
        /// Client whose queue is full.
        client: ClientId,
    },

    /// Outbound queue of a client has been closed by removal.
    #[error("Outbound queue closed for {client}")]
    QueueClosed {
        /// Client that was removed.
        client: ClientId,
    },

    // ========================================================================
    // Admission Errors
    // ========================================================================
    /// Connection refused because the concurrent connection cap is reached.
    #[error("Admission rejected for {addr}: {capacity} connections active")]
    AdmissionRejected {
        /// Remote address of the refused connection.
        addr: SocketAddr,
        /// Configured capacity.
        capacity: usize,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error (short read, write failure, reset).
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON configuration error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an unsupported frame error.
    #[inline]
    pub fn unsupported_frame(fin: bool, opcode: u8, masked: bool) -> Self {
        Self::Protocol(ProtocolError::UnsupportedFrame {
            fin,
            opcode,
            masked,
        })
    }

    /// Creates a malformed request error.
    #[inline]
    pub fn malformed_request(reason: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::MalformedRequest {
            reason: reason.into(),
        })
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a protocol violation.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` if this is an I/O failure.
    #[inline]
    #[must_use]
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Returns `true` if this error is recovered by dropping one message.
    #[inline]
    #[must_use]
    pub fn is_capacity_error(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::QueueClosed { .. })
    }

    /// Returns `true` if the peer simply went away.
    ///
    /// EOF, reset and broken pipe are ordinary disconnects, not faults.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            Self::Io(err) => matches!(
                err.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
