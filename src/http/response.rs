//! Literal HTTP responses written by the server.

// ============================================================================
// Imports
// ============================================================================

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Sent when the admission cap is reached.
pub const SERVICE_UNAVAILABLE: &str = "HTTP/1.1 503 Service Unavailable\r\n\
                                       Content-Type: text/plain\r\n\
                                       Content-Length: 11\r\n\r\n\
                                       Server busy";

/// Sent for unknown paths and missing files.
pub const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\n\r\n404 Not Found";

/// Sent when the request line cannot be parsed.
pub const BAD_REQUEST: &str = "HTTP/1.1 400 Bad Request\r\n\r\n";

// ============================================================================
// Public Functions
// ============================================================================

/// Builds a `200 OK` response carrying `body`.
#[must_use]
pub fn ok(content_type: &str, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );

    let mut response = Vec::with_capacity(head.len() + body.len());
    response.extend_from_slice(head.as_bytes());
    response.extend_from_slice(body);
    response
}

/// Writes a complete response to the connection.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if the write fails.
pub async fn write_response<W>(writer: &mut W, response: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(response).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
