//! Room registry and broadcast hub.
//!
//! Maps room name to its members, in join order, behind one lock. Join,
//! leave and broadcast all take the lock; broadcast holds it for the whole
//! iteration but only performs non-blocking enqueues, so a slow peer never
//! stalls the others.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                RoomRegistry                  │
//! │  "lobby" → [client-1, client-2, client-5]    │
//! │  "dev"   → [client-3]                        │
//! │  "empty" → []                                │
//! └──────────────────────────────────────────────┘
//!        │ try_send (drop-new if full)
//!        ▼
//!   bounded queue ──► writer task ──► socket
//! ```
//!
//! Rooms are created on first join and never removed; an emptied room stays
//! as an empty entry.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Error;

use super::client::{Client, ClientId, Message};
use super::writer::run_writer;

// ============================================================================
// Types
// ============================================================================

/// Room name to members, in join order.
type RoomMap = FxHashMap<String, Vec<Arc<Client>>>;

// ============================================================================
// BroadcastReport
// ============================================================================

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients the message was enqueued for.
    pub delivered: usize,
    /// Recipients whose queue was full; the message was dropped for them.
    pub dropped: usize,
}

// ============================================================================
// RoomRegistry
// ============================================================================

/// Shared room membership and broadcast.
///
/// Create one per server and hand `Arc` clones to connection tasks.
///
/// # Example
///
/// ```ignore
/// let registry = RoomRegistry::new(256);
/// let (client, writer) = registry.join("lobby", addr, write_half);
/// registry.broadcast("lobby", "hello", client.id());
/// registry.leave(&client);
/// ```
pub struct RoomRegistry {
    /// Members by room.
    rooms: Mutex<RoomMap>,
    /// Capacity of each client's outbound queue.
    queue_capacity: usize,
}

// ============================================================================
// RoomRegistry - Constructor
// ============================================================================

impl RoomRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `queue_capacity` - Outbound queue capacity per client (at least 1)
    #[must_use]
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            rooms: Mutex::new(RoomMap::default()),
            queue_capacity: queue_capacity.max(1),
        })
    }

    /// Returns the per-client queue capacity.
    #[inline]
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

// ============================================================================
// RoomRegistry - Membership
// ============================================================================

impl RoomRegistry {
    /// Registers a client in `room` and starts its writer task on `writer`.
    ///
    /// Must be called from within a tokio runtime. The returned handle
    /// completes once the writer task has shut the write half down.
    ///
    /// # Arguments
    ///
    /// * `room` - Room name, verbatim
    /// * `addr` - Remote address of the connection
    /// * `writer` - Write half of the connection, owned by the writer task
    pub fn join<W>(
        self: &Arc<Self>,
        room: &str,
        addr: SocketAddr,
        writer: W,
    ) -> (Arc<Client>, JoinHandle<()>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (client, queue) = self.register(room, addr);

        let handle = tokio::spawn(run_writer(
            Arc::clone(&client),
            queue,
            writer,
            Arc::clone(self),
        ));

        (client, handle)
    }

    /// Appends a new client to `room` and returns it with its queue receiver.
    pub(crate) fn register(
        &self,
        room: &str,
        addr: SocketAddr,
    ) -> (Arc<Client>, mpsc::Receiver<Message>) {
        let (client, queue) = Client::new(room, addr, self.queue_capacity);

        let members = {
            let mut rooms = self.rooms.lock();
            let members = rooms.entry(room.to_string()).or_default();
            members.push(Arc::clone(&client));
            members.len()
        };

        info!(client = %client.id(), %addr, room = %room, members, "Client joined");

        (client, queue)
    }

    /// Removes `client` from its room and closes its queue.
    ///
    /// The closed signal stops the writer task without draining, which then
    /// shuts down the write half, and ends the read loop. Calling this again for the
    /// same client finds nothing to remove and has no effect.
    pub fn leave(&self, client: &Client) {
        let removed = {
            let mut rooms = self.rooms.lock();
            let removed = rooms.get_mut(client.room()).and_then(|members| {
                let pos = members.iter().position(|m| m.id() == client.id())?;
                Some(members.remove(pos))
            });
            client.close();
            removed
        };

        if removed.is_some() {
            info!(client = %client.id(), addr = %client.addr(), room = %client.room(), "Client left");
        }
    }

    /// Removes every client from every room and closes their queues.
    ///
    /// Room entries are kept, emptied. Returns the number of clients removed.
    pub fn close_all(&self) -> usize {
        let removed: Vec<_> = {
            let mut rooms = self.rooms.lock();
            rooms.values_mut().flat_map(|members| members.drain(..)).collect()
        };

        for client in &removed {
            client.close();
        }

        if !removed.is_empty() {
            info!(clients = removed.len(), "All clients closed");
        }
        removed.len()
    }
}

// ============================================================================
// RoomRegistry - Broadcast
// ============================================================================

impl RoomRegistry {
    /// Enqueues `message` for every member of `room` except `sender`.
    ///
    /// A member whose queue is full misses this message; nobody else is
    /// affected and the call never waits.
    pub fn broadcast(&self, room: &str, message: &str, sender: ClientId) -> BroadcastReport {
        let message: Message = Arc::from(message);
        let mut report = BroadcastReport::default();

        let rooms = self.rooms.lock();
        let Some(members) = rooms.get(room) else {
            return report;
        };

        for member in members.iter().filter(|m| m.id() != sender) {
            match member.try_send(Arc::clone(&message)) {
                Ok(()) => report.delivered += 1,
                Err(Error::QueueFull { client }) => {
                    debug!(%client, room = %room, "Outbound queue full, message dropped");
                    report.dropped += 1;
                }
                Err(e) => debug!(client = %member.id(), error = %e, "Skipping closed client"),
            }
        }

        report
    }
}

// ============================================================================
// RoomRegistry - Introspection
// ============================================================================

impl RoomRegistry {
    /// Number of rooms ever joined, empty ones included.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Number of members in `room`.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.lock().get(room).map_or(0, Vec::len)
    }

    /// Member ids of `room`, in join order.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<ClientId> {
        self.rooms
            .lock()
            .get(room)
            .map(|members| members.iter().map(|m| m.id()).collect())
            .unwrap_or_default()
    }

    /// Names of all rooms, sorted.
    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.rooms.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    use crate::protocol::frame::encode_frame;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn drain(queue: &mut mpsc::Receiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(message) = queue.try_recv() {
            out.push(message.to_string());
        }
        out
    }

    #[test]
    fn test_register_appends_in_join_order() {
        let registry = RoomRegistry::new(4);
        let (a, _qa) = registry.register("lobby", addr(1));
        let (b, _qb) = registry.register("lobby", addr(2));
        let (c, _qc) = registry.register("lobby", addr(3));

        assert_eq!(registry.members("lobby"), vec![a.id(), b.id(), c.id()]);
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn test_broadcast_excludes_sender_and_other_rooms() {
        let registry = RoomRegistry::new(4);
        let (a, mut qa) = registry.register("lobby", addr(1));
        let (_b, mut qb) = registry.register("lobby", addr(2));
        let (_c, mut qc) = registry.register("lobby", addr(3));
        let (_d, mut qd) = registry.register("dev", addr(4));

        let report = registry.broadcast("lobby", "hi", a.id());

        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
        assert!(drain(&mut qa).is_empty());
        assert_eq!(drain(&mut qb), vec!["hi"]);
        assert_eq!(drain(&mut qc), vec!["hi"]);
        assert!(drain(&mut qd).is_empty());
    }

    #[test]
    fn test_full_queue_drops_for_that_member_only() {
        let registry = RoomRegistry::new(1);
        let (a, mut qa) = registry.register("lobby", addr(1));
        let (_b, mut qb) = registry.register("lobby", addr(2));
        let (_c, mut qc) = registry.register("lobby", addr(3));

        let first = registry.broadcast("lobby", "one", a.id());
        assert_eq!(first, BroadcastReport { delivered: 2, dropped: 0 });

        // C keeps up, B does not
        assert_eq!(drain(&mut qc), vec!["one"]);

        let second = registry.broadcast("lobby", "two", a.id());
        assert_eq!(second, BroadcastReport { delivered: 1, dropped: 1 });

        assert_eq!(drain(&mut qb), vec!["one"]);
        assert_eq!(drain(&mut qc), vec!["two"]);
        assert!(drain(&mut qa).is_empty());
        assert_eq!(registry.member_count("lobby"), 3);
    }

    #[test]
    fn test_broadcast_preserves_sender_order() {
        let registry = RoomRegistry::new(8);
        let (a, _qa) = registry.register("lobby", addr(1));
        let (_b, mut qb) = registry.register("lobby", addr(2));

        for message in ["1", "2", "3", "4"] {
            registry.broadcast("lobby", message, a.id());
        }

        assert_eq!(drain(&mut qb), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_broadcast_to_unknown_room() {
        let registry = RoomRegistry::new(4);
        let report = registry.broadcast("nowhere", "hi", ClientId::from_u64(0));
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_leave_removes_and_closes() {
        let registry = RoomRegistry::new(4);
        let (a, _qa) = registry.register("lobby", addr(1));
        let (b, mut qb) = registry.register("lobby", addr(2));

        registry.leave(&b);

        assert!(b.is_closed());
        assert_eq!(registry.members("lobby"), vec![a.id()]);

        let report = registry.broadcast("lobby", "after", a.id());
        assert_eq!(report.delivered, 0);
        assert!(drain(&mut qb).is_empty());
    }

    #[test]
    fn test_leave_twice_is_harmless() {
        let registry = RoomRegistry::new(4);
        let (a, _qa) = registry.register("lobby", addr(1));
        let (b, _qb) = registry.register("lobby", addr(2));

        registry.leave(&a);
        registry.leave(&a);

        assert_eq!(registry.members("lobby"), vec![b.id()]);
    }

    #[test]
    fn test_emptied_room_persists() {
        let registry = RoomRegistry::new(4);
        let (a, _qa) = registry.register("lobby", addr(1));

        registry.leave(&a);

        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.member_count("lobby"), 0);
        assert_eq!(registry.room_names(), vec!["lobby".to_string()]);
    }

    #[test]
    fn test_close_all_empties_rooms() {
        let registry = RoomRegistry::new(4);
        let (a, _qa) = registry.register("lobby", addr(1));
        let (b, _qb) = registry.register("dev", addr(2));

        assert_eq!(registry.close_all(), 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(registry.member_count("lobby"), 0);
        assert_eq!(registry.room_names(), vec!["dev".to_string(), "lobby".to_string()]);
        assert_eq!(registry.close_all(), 0);
    }

    #[tokio::test]
    async fn test_join_writes_frames_to_socket() {
        let registry = RoomRegistry::new(4);
        let (a, _qa) = registry.register("lobby", addr(1));
        let (server_side, mut peer) = tokio::io::duplex(1024);
        let (_b, _writer) = registry.join("lobby", addr(2), server_side);

        registry.broadcast("lobby", "hello", a.id());

        let expected = encode_frame(b"hello");
        let mut buf = vec![0u8; expected.len()];
        timeout(Duration::from_secs(1), peer.read_exact(&mut buf))
            .await
            .expect("frame in time")
            .expect("read");
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_leave_shuts_down_writer() {
        let registry = RoomRegistry::new(4);
        let (server_side, mut peer) = tokio::io::duplex(1024);
        let (b, _writer) = registry.join("lobby", addr(2), server_side);

        registry.leave(&b);

        let mut buf = Vec::new();
        let read = timeout(Duration::from_secs(1), peer.read_to_end(&mut buf))
            .await
            .expect("eof in time")
            .expect("read");
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_leave_stops_backlogged_writer() {
        let registry = RoomRegistry::new(64);
        let (a, _qa) = registry.register("lobby", addr(1));
        // Tiny pipe the peer never reads: the writer blocks mid-frame
        let (server_side, mut peer) = tokio::io::duplex(16);
        let (b, writer) = registry.join("lobby", addr(2), server_side);

        let big = "x".repeat(4096);
        for _ in 0..32 {
            registry.broadcast("lobby", &big, a.id());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        registry.leave(&b);

        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer stopped without draining")
            .expect("join");

        // Only what fit in the pipe before removal, then EOF
        let mut buf = Vec::new();
        let read = timeout(Duration::from_secs(1), peer.read_to_end(&mut buf))
            .await
            .expect("eof in time")
            .expect("read");
        assert!(read <= 16);
    }

    #[tokio::test]
    async fn test_write_failure_removes_client() {
        let registry = RoomRegistry::new(4);
        let (a, _qa) = registry.register("lobby", addr(1));
        let (server_side, peer) = tokio::io::duplex(64);
        let (b, _writer) = registry.join("lobby", addr(2), server_side);
        drop(peer);

        registry.broadcast("lobby", "into the void", a.id());

        timeout(Duration::from_secs(1), b.closed())
            .await
            .expect("client removed after failed write");
        assert_eq!(registry.members("lobby"), vec![a.id()]);
    }
}
