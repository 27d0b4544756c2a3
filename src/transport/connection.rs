//! Per-connection driver.
//!
//! Takes one admitted connection from request head to teardown:
//!
//! 1. Read the HTTP request head
//! 2. Room path + `Upgrade: websocket` → handshake, join, read loop
//! 3. Anything else → static file or 404
//!
//! # Read Loop
//!
//! After joining, the connection decodes frames until a close frame, a
//! protocol violation, an I/O error, or removal by its writer task. Each text
//! message is broadcast to the rest of the room. Then the client leaves.
//!
//! Reads have no deadline: a silent peer holds its task until the OS
//! reports an error.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, trace};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::{
    BAD_REQUEST, Headers, RequestHead, StaticFiles, read_request_head, write_response,
};
use crate::hub::{Client, RoomRegistry};
use crate::protocol::frame::{Frame, read_frame};
use crate::protocol::handshake::complete_handshake;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle of an upgraded connection.
///
/// `Connecting → Upgraded → Active → Closed`; `Closed` is terminal and may
/// be entered from any earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Request head received, handshake not yet answered.
    Connecting,
    /// `101 Switching Protocols` sent.
    Upgraded,
    /// Registered in a room, read loop running.
    Active,
    /// Torn down.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Upgraded)
                | (Self::Upgraded, Self::Active)
                | (Self::Connecting | Self::Upgraded | Self::Active, Self::Closed)
        )
    }
}

// ============================================================================
// ServerContext
// ============================================================================

/// State shared by every connection task of one server.
#[derive(Clone)]
pub struct ServerContext {
    /// Room membership and broadcast.
    pub registry: Arc<RoomRegistry>,
    /// Static file root for plain requests.
    pub files: StaticFiles,
    /// Path prefix of room endpoints.
    pub room_prefix: String,
}

impl ServerContext {
    /// Builds the context for `config` around `registry`.
    #[must_use]
    pub fn new(config: &ServerConfig, registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            files: StaticFiles::new(&config.static_root),
            room_prefix: config.room_prefix.clone(),
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One accepted connection.
pub struct Connection<R, W> {
    /// Buffered read half; owned by the read loop.
    reader: BufReader<R>,
    /// Write half; handed to the writer task on join.
    writer: W,
    /// Remote address.
    addr: SocketAddr,
    /// Current lifecycle state.
    state: ConnectionState,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Wraps the two halves of an accepted connection.
    pub fn new(reader: R, writer: W, addr: SocketAddr) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            addr,
            state: ConnectionState::Connecting,
        }
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drives the connection to completion.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the connection. Nothing is reported to
    /// the peer for protocol or I/O errors; only an unparseable request line
    /// gets `400 Bad Request`.
    pub async fn run(mut self, ctx: &ServerContext) -> Result<()> {
        let head = match read_request_head(&mut self.reader).await {
            Ok(head) => head,
            Err(e) => {
                if e.is_protocol_error() {
                    write_response(&mut self.writer, BAD_REQUEST.as_bytes()).await?;
                }
                return Err(e);
            }
        };

        debug!(addr = %self.addr, method = %head.method, path = %head.path, "Request received");

        match head.room(&ctx.room_prefix) {
            Some(room) if head.is_upgrade() => self.upgrade(&head.headers, room, ctx).await,
            _ => self.serve_plain(&head, ctx).await,
        }
    }

    /// Answers a non-upgrade request from the static root.
    async fn serve_plain(&mut self, head: &RequestHead, ctx: &ServerContext) -> Result<()> {
        let response = ctx.files.respond(&head.path).await;
        write_response(&mut self.writer, &response).await
    }

    /// Handshake, join, read loop, leave.
    ///
    /// Returns after the writer task has finished, so the caller's admission
    /// slot outlives every use of the socket.
    async fn upgrade(mut self, headers: &Headers, room: &str, ctx: &ServerContext) -> Result<()> {
        if let Err(e) = complete_handshake(&mut self.writer, headers).await {
            self.transition(ConnectionState::Closed);
            return Err(e);
        }
        self.transition(ConnectionState::Upgraded);

        let Self {
            mut reader,
            writer,
            addr,
            mut state,
        } = self;

        let (client, writer_task) = ctx.registry.join(room, addr, writer);
        Self::log_transition(addr, &mut state, ConnectionState::Active);

        let result = read_loop(&mut reader, &client, &ctx.registry).await;

        // The socket is closed only once the writer has shut its half down
        ctx.registry.leave(&client);
        if let Err(e) = writer_task.await {
            debug!(%addr, error = %e, "Writer task ended abnormally");
        }
        Self::log_transition(addr, &mut state, ConnectionState::Closed);

        result
    }

    fn transition(&mut self, next: ConnectionState) {
        Self::log_transition(self.addr, &mut self.state, next);
    }

    fn log_transition(addr: SocketAddr, state: &mut ConnectionState, next: ConnectionState) {
        debug_assert!(
            state.can_transition_to(next),
            "illegal transition {state:?} -> {next:?}"
        );
        trace!(%addr, from = ?*state, to = ?next, "Connection state");
        *state = next;
    }
}

// ============================================================================
// Read Loop
// ============================================================================

/// Decodes frames and broadcasts each text message to the client's room.
///
/// Returns `Ok(())` on a close frame or when the client is removed by its
/// writer task, and the decode error otherwise.
async fn read_loop<R>(
    reader: &mut R,
    client: &Arc<Client>,
    registry: &RoomRegistry,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = read_frame(reader) => frame?,
            () = client.closed() => {
                debug!(client = %client.id(), "Client removed, stopping read loop");
                return Ok(());
            }
        };

        match frame {
            Frame::Text(text) => {
                let report = registry.broadcast(client.room(), &text, client.id());
                trace!(
                    client = %client.id(),
                    room = %client.room(),
                    delivered = report.delivered,
                    dropped = report.dropped,
                    "Message broadcast"
                );
            }
            Frame::Close => {
                debug!(client = %client.id(), "Close frame received");
                return Ok(());
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
