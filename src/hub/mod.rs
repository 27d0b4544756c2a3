//! Room-based broadcast hub.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RoomRegistry`] | Room name → members; join, leave, broadcast |
//! | [`Client`] | One upgraded connection with its bounded outbound queue |
//! | [`ClientId`] | Identity used for sender exclusion and removal |
//! | [`BroadcastReport`] | Delivered/dropped counts of one broadcast |
//!
//! # Client Lifecycle
//!
//! 1. `RoomRegistry::join` - client appended to its room, writer task spawned
//! 2. `RoomRegistry::broadcast` - messages enqueued, written by the writer task
//! 3. `RoomRegistry::leave` - removed from the room, queue closed, socket shut down

// ============================================================================
// Submodules
// ============================================================================

/// Client entity and outbound queue.
pub mod client;

/// Room registry and broadcast.
pub mod registry;

/// Per-client writer task.
mod writer;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{Client, ClientId, Message};
pub use registry::{BroadcastReport, RoomRegistry};
