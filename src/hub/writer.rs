//! Per-client writer task.
//!
//! Drains the client's outbound queue through the frame encoder into the
//! write half of its socket until the client is removed. This is the only
//! place a socket write for a broadcast happens, outside the registry lock.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::protocol::frame::write_text;

use super::client::{Client, Message};
use super::registry::RoomRegistry;

// ============================================================================
// Writer Loop
// ============================================================================

/// Runs until the client is removed, the queue is closed, or a write fails.
///
/// Removal stops the task at once: queued messages are discarded and an
/// in-flight write is abandoned. A failed write removes the client from
/// `registry`. The write half is shut down on exit.
pub(crate) async fn run_writer<W>(
    client: Arc<Client>,
    mut queue: mpsc::Receiver<Message>,
    mut writer: W,
    registry: Arc<RoomRegistry>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            () = client.closed() => break,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;
            () = client.closed() => break,
            written = write_text(&mut writer, &message) => written,
        };

        if let Err(e) = written {
            debug!(client = %client.id(), addr = %client.addr(), error = %e, "Write failed, removing client");
            registry.leave(&client);
            break;
        }

        trace!(client = %client.id(), len = message.len(), "Frame written");
    }

    let _ = writer.shutdown().await;
    debug!(client = %client.id(), dropped = queue.len(), "Writer task terminated");
}
