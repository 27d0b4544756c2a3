//! HTTP → WebSocket upgrade handshake.
//!
//! Computes `Sec-WebSocket-Accept` from the client nonce and writes the
//! `101 Switching Protocols` response. No other header (such as
//! `Sec-WebSocket-Version`) is validated.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::http::Headers;

// ============================================================================
// Constants
// ============================================================================

/// GUID appended to the nonce before hashing (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Request header carrying the client nonce.
pub const NONCE_HEADER: &str = "Sec-WebSocket-Key";

// ============================================================================
// Public Functions
// ============================================================================

/// Derives the accept value: `base64(sha1(nonce + GUID))`.
#[must_use]
pub fn accept_key(nonce: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Builds the literal `101 Switching Protocols` response.
#[must_use]
pub fn handshake_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Answers an upgrade request with `101 Switching Protocols`.
///
/// # Errors
///
/// - [`ProtocolError::MissingNonce`] if `Sec-WebSocket-Key` is absent; nothing is written
/// - [`crate::Error::Io`] if writing the response fails
pub async fn complete_handshake<W>(writer: &mut W, headers: &Headers) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let nonce = headers
        .get(NONCE_HEADER)
        .ok_or(ProtocolError::MissingNonce)?;

    let response = handshake_response(&accept_key(nonce));
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;

    debug!("Handshake completed");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
