//! WebSocket protocol engine.
//!
//! Hand-written subset of RFC 6455: the opening handshake and single-frame
//! text messages.
//!
//! # Protocol Overview
//!
//! | Step | Direction | Format |
//! |------|-----------|--------|
//! | Upgrade request | Client → Server | HTTP/1.1 `GET` with `Upgrade: websocket` |
//! | `101 Switching Protocols` | Server → Client | [`handshake::handshake_response`] |
//! | Text message | Client → Server | Masked frame, FIN=1, opcode 0x1 |
//! | Text message | Server → Client | Unmasked frame, FIN=1, opcode 0x1 |
//! | Close | Client → Server | Opcode 0x8, ends the read loop |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame decode/encode and masking |
//! | `handshake` | Accept-key derivation and 101 response |

// ============================================================================
// Submodules
// ============================================================================

/// Frame decode/encode.
pub mod frame;

/// Opening handshake.
pub mod handshake;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{
    Frame, FrameHeader, LengthField, MAX_PAYLOAD_LEN, OpCode, apply_mask, encode_frame,
    encode_masked_frame, read_frame, read_payload, write_text,
};
pub use handshake::{WEBSOCKET_GUID, accept_key, complete_handshake, handshake_response};
