//! Listener and accept loop.
//!
//! # Connection Flow
//!
//! 1. `Server::bind` - Bind the listener from a [`ServerConfig`]
//! 2. `Server::run` - Accept connections until shutdown
//! 3. Each accepted connection is checked against [`Admission`] before any
//!    task is spawned. Over capacity, the peer gets `503` and is closed.
//! 4. Admitted connections run [`Connection::run`] on their own task
//! 5. `Server::shutdown` - Stop accepting and close every client

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::http::{SERVICE_UNAVAILABLE, write_response};
use crate::hub::RoomRegistry;

use super::admission::{Admission, AdmissionGuard};
use super::connection::{Connection, ServerContext};

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop wakes to check the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Server
// ============================================================================

/// A bound relay server.
///
/// # Example
///
/// ```no_run
/// use roomcast::{Server, ServerConfig};
///
/// # async fn example() -> roomcast::Result<()> {
/// let server = Server::bind(ServerConfig::default()).await?;
/// println!("listening on {}", server.local_addr());
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    /// Configuration the server was bound with.
    config: ServerConfig,
    /// Actual listen address (resolved port).
    local_addr: SocketAddr,
    /// Listener, taken by the first `run`.
    listener: Mutex<Option<TcpListener>>,
    /// State shared with connection tasks.
    context: ServerContext,
    /// Concurrent connection ledger.
    admission: Arc<Admission>,
    /// Set by `shutdown`, polled by the accept loop.
    shutdown: AtomicBool,
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Validates `config` and binds the listener.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::Io`] if binding fails
    pub async fn bind(config: ServerConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let listener = TcpListener::bind(config.socket_addr()).await?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "Listener bound");

        let registry = RoomRegistry::new(config.queue_capacity);
        let context = ServerContext::new(&config, registry);
        let admission = Admission::new(config.max_connections);

        Ok(Arc::new(Self {
            config,
            local_addr,
            listener: Mutex::new(Some(listener)),
            context,
            admission,
            shutdown: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// Server - Public API
// ============================================================================

impl Server {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the WebSocket URL of `room` on this server.
    ///
    /// Format: `ws://{local_addr}{room_prefix}{room}`
    #[must_use]
    pub fn ws_url(&self, room: &str) -> String {
        format!("ws://{}{}{room}", self.local_addr, self.config.room_prefix)
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the room registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.context.registry
    }

    /// Returns the admission ledger.
    #[inline]
    #[must_use]
    pub fn admission(&self) -> &Arc<Admission> {
        &self.admission
    }

    /// Returns `true` once `shutdown` has been called.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Accepts connections until [`Self::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the server is already running or has
    /// run before.
    pub async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| Error::config("server is already running"))?;

        info!(
            addr = %self.local_addr,
            prefix = %self.config.room_prefix,
            max_connections = self.config.max_connections,
            "Relay listening"
        );

        self.accept_loop(listener).await;
        Ok(())
    }

    /// Stops the accept loop and closes every client.
    pub fn shutdown(&self) {
        info!("Server shutting down");

        self.shutdown.store(true, Ordering::SeqCst);
        let closed = self.context.registry.close_all();

        info!(clients = closed, "Server shutdown complete");
    }
}

// ============================================================================
// Server - Accept Loop
// ============================================================================

impl Server {
    async fn accept_loop(&self, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            // Poll with a timeout so the shutdown flag is seen
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => self.dispatch(stream, addr).await,
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Admits and spawns, or rejects, one accepted connection.
    async fn dispatch(&self, stream: TcpStream, addr: SocketAddr) {
        debug!(%addr, "TCP connection accepted");

        match self.admission.admit(addr) {
            Some(guard) => {
                let context = self.context.clone();
                tokio::spawn(handle_connection(stream, guard, context));
            }
            None => reject(stream, addr, self.admission.capacity()).await,
        }
    }
}

// ============================================================================
// Connection Tasks
// ============================================================================

/// Runs one admitted connection; the slot is released when it returns.
async fn handle_connection(stream: TcpStream, guard: AdmissionGuard, context: ServerContext) {
    let addr = guard.addr();
    let (reader, writer) = stream.into_split();

    match Connection::new(reader, writer, addr).run(&context).await {
        Ok(()) => debug!(%addr, "Connection finished"),
        Err(e) if e.is_disconnect() || e.is_protocol_error() => {
            debug!(%addr, error = %e, "Connection closed");
        }
        Err(e) => warn!(%addr, error = %e, "Connection failed"),
    }

    drop(guard);
}

/// Answers `503 Service Unavailable` and closes.
async fn reject(mut stream: TcpStream, addr: SocketAddr, capacity: usize) {
    debug!(error = %Error::AdmissionRejected { addr, capacity }, "Sending 503");

    if let Err(e) = write_response(&mut stream, SERVICE_UNAVAILABLE.as_bytes()).await {
        debug!(%addr, error = %e, "Failed to send 503");
    }
    let _ = stream.shutdown().await;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};

    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncReadExt;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    use crate::protocol::frame::encode_frame;
    use crate::protocol::handshake::{accept_key, handshake_response};

    type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config(max_connections: usize, root: &std::path::Path) -> ServerConfig {
        ServerConfig::builder()
            .bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .port(0)
            .max_connections(max_connections)
            .static_root(root)
            .build()
            .expect("valid config")
    }

    async fn start(config: ServerConfig) -> (Arc<Server>, JoinHandle<Result<()>>) {
        let server = Server::bind(config).await.expect("bind");
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move { runner.run().await });
        (server, handle)
    }

    async fn join(server: &Server, room: &str) -> WsClient {
        let (ws, _response) = connect_async(server.ws_url(room)).await.expect("connect");
        ws
    }

    async fn wait_for_members(server: &Server, room: &str, count: usize) {
        timeout(Duration::from_secs(2), async {
            while server.registry().member_count(room) != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("membership in time");
    }

    async fn next_text(ws: &mut WsClient) -> String {
        let message = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("message in time")
            .expect("stream open")
            .expect("valid message");
        message.to_text().expect("text message").to_string()
    }

    async fn assert_silent(ws: &mut WsClient) {
        assert!(
            timeout(Duration::from_millis(150), ws.next()).await.is_err(),
            "unexpected message"
        );
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = Server::bind(test_config(4, dir.path())).await.expect("bind");

        assert!(server.local_addr().port() > 0);
        assert_eq!(
            server.ws_url("lobby"),
            format!("ws://{}/ws/lobby", server.local_addr())
        );
        assert_eq!(server.admission().capacity(), 4);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            queue_capacity: 0,
            ..ServerConfig::default()
        };
        let result = Server::bind(config).await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, handle) = start(test_config(4, dir.path())).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(server.run().await.is_err());

        server.shutdown();
        handle.await.expect("join").expect("run");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_room_except_sender() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, _handle) = start(test_config(16, dir.path())).await;

        let mut a = join(&server, "lobby").await;
        let mut b = join(&server, "lobby").await;
        let mut c = join(&server, "lobby").await;
        let mut d = join(&server, "dev").await;
        wait_for_members(&server, "lobby", 3).await;
        wait_for_members(&server, "dev", 1).await;

        a.send(WsMessage::Text("hello room".into())).await.expect("send");

        assert_eq!(next_text(&mut b).await, "hello room");
        assert_eq!(next_text(&mut c).await, "hello room");
        assert_silent(&mut a).await;
        assert_silent(&mut d).await;

        server.shutdown();
    }

    #[tokio::test]
    async fn test_messages_arrive_in_send_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, _handle) = start(test_config(16, dir.path())).await;

        let mut a = join(&server, "lobby").await;
        let mut b = join(&server, "lobby").await;
        wait_for_members(&server, "lobby", 2).await;

        for i in 0..20 {
            a.send(WsMessage::Text(format!("m{i}").into())).await.expect("send");
        }
        for i in 0..20 {
            assert_eq!(next_text(&mut b).await, format!("m{i}"));
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn test_large_message_relayed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, _handle) = start(test_config(16, dir.path())).await;

        let mut a = join(&server, "lobby").await;
        let mut b = join(&server, "lobby").await;
        wait_for_members(&server, "lobby", 2).await;

        let payload = "x".repeat(70_000);
        a.send(WsMessage::Text(payload.clone().into())).await.expect("send");
        assert_eq!(next_text(&mut b).await, payload);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_client_close_leaves_room() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, _handle) = start(test_config(16, dir.path())).await;

        let mut a = join(&server, "lobby").await;
        let _b = join(&server, "lobby").await;
        wait_for_members(&server, "lobby", 2).await;

        a.close(None).await.expect("close");
        wait_for_members(&server, "lobby", 1).await;
        assert_eq!(server.registry().room_count(), 1);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_raw_handshake_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, _handle) = start(test_config(16, dir.path())).await;

        let mut stream = TcpStream::connect(server.local_addr()).await.expect("connect");
        stream
            .write_all(
                b"GET /ws/lobby HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                  Sec-WebSocket-Version: 13\r\n\r\n",
            )
            .await
            .expect("request");

        let expected = handshake_response(&accept_key("dGhlIHNhbXBsZSBub25jZQ=="));
        assert!(expected.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

        let mut buf = vec![0u8; expected.len()];
        timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
            .await
            .expect("response in time")
            .expect("read");
        assert_eq!(buf, expected.as_bytes());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_unmasked_frame_disconnects_without_relay() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, _handle) = start(test_config(16, dir.path())).await;

        let mut b = join(&server, "lobby").await;

        let mut raw = TcpStream::connect(server.local_addr()).await.expect("connect");
        raw.write_all(
            b"GET /ws/lobby HTTP/1.1\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .expect("request");
        wait_for_members(&server, "lobby", 2).await;

        let mut head = vec![0u8; handshake_response(&accept_key("dGhlIHNhbXBsZSBub25jZQ==")).len()];
        raw.read_exact(&mut head).await.expect("handshake");

        raw.write_all(&encode_frame(b"unmasked")).await.expect("frame");
        wait_for_members(&server, "lobby", 1).await;
        assert_silent(&mut b).await;

        // EOF, or a reset if the kernel still held unread bytes
        let mut rest = Vec::new();
        let result = timeout(Duration::from_secs(2), raw.read_to_end(&mut rest))
            .await
            .expect("closed in time");
        assert!(!matches!(result, Ok(n) if n > 0));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_slot_held_until_backlogged_socket_closes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, _handle) = start(test_config(2, dir.path())).await;

        // A upgrades by hand and then stops reading
        let mut a = TcpStream::connect(server.local_addr()).await.expect("connect");
        a.write_all(
            b"GET /ws/lobby HTTP/1.1\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .expect("request");
        let mut head = vec![0u8; handshake_response(&accept_key("dGhlIHNhbXBsZSBub25jZQ==")).len()];
        a.read_exact(&mut head).await.expect("handshake");

        let mut b = join(&server, "lobby").await;
        wait_for_members(&server, "lobby", 2).await;

        let chunk = "y".repeat(1024 * 1024);
        for _ in 0..32 {
            b.send(WsMessage::Text(chunk.clone().into())).await.expect("send");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // A leaves while its writer is stuck on a full socket
        a.write_all(&[0x88, 0x80, 0, 0, 0, 0]).await.expect("close");
        wait_for_members(&server, "lobby", 1).await;

        // Queued frames are discarded: A only gets what was already in flight
        let mut rest = Vec::new();
        let _ = timeout(Duration::from_secs(5), a.read_to_end(&mut rest))
            .await
            .expect("socket closed after leave");
        assert!(rest.len() < 16 * chunk.len(), "received {} bytes", rest.len());

        timeout(Duration::from_secs(2), async {
            while server.admission().active() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slot released once the socket is gone");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_over_capacity_gets_503() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, _handle) = start(test_config(1, dir.path())).await;

        let _first = TcpStream::connect(server.local_addr()).await.expect("connect");
        timeout(Duration::from_secs(2), async {
            while server.admission().active() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first admitted");

        let mut second = TcpStream::connect(server.local_addr()).await.expect("connect");
        let mut response = Vec::new();
        timeout(Duration::from_secs(2), second.read_to_end(&mut response))
            .await
            .expect("response in time")
            .expect("read");

        assert_eq!(response, SERVICE_UNAVAILABLE.as_bytes());
        assert_eq!(server.admission().active(), 1);
        assert_eq!(server.registry().room_count(), 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_slot_released_after_disconnect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, _handle) = start(test_config(1, dir.path())).await;

        let a = join(&server, "lobby").await;
        wait_for_members(&server, "lobby", 1).await;
        drop(a);

        timeout(Duration::from_secs(2), async {
            while server.admission().active() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slot released");

        let _b = join(&server, "lobby").await;
        wait_for_members(&server, "lobby", 1).await;

        server.shutdown();
    }

    #[tokio::test]
    async fn test_static_and_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("app.js"), "let a;").expect("write");
        let (server, _handle) = start(test_config(16, dir.path())).await;

        let mut stream = TcpStream::connect(server.local_addr()).await.expect("connect");
        stream
            .write_all(b"GET /app.js HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .expect("request");
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.expect("read");
        assert_eq!(
            response,
            b"HTTP/1.1 200 OK\r\nContent-Type: text/javascript\r\nContent-Length: 6\r\n\r\nlet a;"
                .to_vec()
        );

        let mut stream = TcpStream::connect(server.local_addr()).await.expect("connect");
        stream
            .write_all(b"GET /nope.html HTTP/1.1\r\n\r\n")
            .await
            .expect("request");
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.expect("read");
        assert_eq!(response, crate::http::NOT_FOUND.as_bytes());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_clients() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, handle) = start(test_config(16, dir.path())).await;

        let mut a = join(&server, "lobby").await;
        wait_for_members(&server, "lobby", 1).await;

        server.shutdown();
        assert!(server.is_shutdown());
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("accept loop stopped")
            .expect("join")
            .expect("run");

        // Writer shut the socket down; the client sees the stream end
        let end = timeout(Duration::from_secs(2), a.next())
            .await
            .expect("stream end in time");
        assert!(!matches!(end, Some(Ok(WsMessage::Text(_)))));
        assert_eq!(server.registry().member_count("lobby"), 0);
    }
}
