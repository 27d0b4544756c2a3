//! HTTP/1.1 surface around the WebSocket core.
//!
//! The core consumes two things from here: "does this request ask for a
//! protocol upgrade?" ([`RequestHead::is_upgrade`]) and "write this full
//! response to the connection" ([`write_response`]). Everything else serves
//! plain requests from the static root.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | Request head reading, headers, room path |
//! | `response` | Literal responses (503, 404, 400, 200) |
//! | `static_files` | File serving with extension-based content type |

// ============================================================================
// Submodules
// ============================================================================

/// Request head parsing.
pub mod request;

/// Literal responses.
pub mod response;

/// Static file serving.
pub mod static_files;

// ============================================================================
// Re-exports
// ============================================================================

pub use request::{Headers, RequestHead, read_request_head, room_from_path};
pub use response::{BAD_REQUEST, NOT_FOUND, SERVICE_UNAVAILABLE, write_response};
pub use static_files::StaticFiles;
