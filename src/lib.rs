//! Roomcast - room-based WebSocket relay over raw TCP.
//!
//! Clients connect to `ws://host:port/ws/<room>`; every text message a client
//! sends is relayed to all other clients currently in the same room.
//!
//! # Architecture
//!
//! The relay speaks HTTP and WebSocket directly on the socket:
//!
//! - **Transport**: accept loop, admission cap, one task per connection
//! - **Protocol**: RFC 6455 handshake and a minimal frame codec
//! - **Hub**: room registry with a bounded outbound queue per client
//!
//! Key design principles:
//!
//! - Admission is decided at accept time, before any request is read
//! - Broadcast never blocks: a full queue drops the message for that peer
//! - Each client has one writer task, so frames never interleave
//! - Anything that is not a room upgrade is served from a static root
//!
//! # Quick Start
//!
//! ```no_run
//! use roomcast::{Result, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ServerConfig::builder()
//!         .port(8080)
//!         .max_connections(512)
//!         .build()?;
//!
//!     let server = Server::bind(config).await?;
//!     println!("chat at {}", server.ws_url("lobby"));
//!     server.run().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | [`ServerConfig`] and its builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`http`] | Request head parsing, canned responses, static files |
//! | [`hub`] | [`RoomRegistry`], [`Client`] and broadcast |
//! | [`protocol`] | WebSocket handshake and frame codec |
//! | [`transport`] | [`Server`], admission and connection driver |

// ============================================================================
// Modules
// ============================================================================

/// Server configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Minimal HTTP/1.1 handling for the upgrade request and static files.
pub mod http;

/// Room registry and broadcast.
pub mod hub;

/// WebSocket handshake and frame codec.
pub mod protocol;

/// TCP listener, admission and per-connection driver.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{ServerConfig, ServerConfigBuilder};

// Error types
pub use error::{Error, ProtocolError, Result};

// Hub types
pub use hub::{BroadcastReport, Client, ClientId, RoomRegistry};

// Transport types
pub use transport::{Admission, Server};
