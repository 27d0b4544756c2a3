//! TCP transport layer.
//!
//! Owns the listener, decides admission, and drives each accepted
//! connection through HTTP into the room hub.
//!
//! # Architecture
//!
//! ```text
//!  TcpListener ──accept──► Admission ──full──► 503, close
//!                              │
//!                              ▼ spawn
//!                         Connection ──plain──► static file / 404
//!                              │ upgrade
//!                              ▼
//!                  read loop ──► RoomRegistry::broadcast
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `admission` | Concurrent connection cap |
//! | `connection` | Per-connection driver and read loop |
//! | `server` | Listener, accept loop, shutdown |

// ============================================================================
// Submodules
// ============================================================================

/// Concurrent connection cap.
pub mod admission;

/// Per-connection driver and read loop.
pub mod connection;

/// Listener and accept loop.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use admission::{Admission, AdmissionGuard};
pub use connection::{Connection, ConnectionState, ServerContext};
pub use server::Server;
