//! WebSocket frame codec.
//!
//! Decodes client frames from a byte stream and encodes server frames,
//! restricted to the subset the relay speaks: single-frame masked text from
//! clients, single-frame unmasked text to clients, and close.
//!
//! # Wire Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               | Masking-key, if MASK set to 1 |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! # Rejected Frames
//!
//! Fragmented frames (FIN=0), any opcode other than text or close, and
//! unmasked client frames fail with [`ProtocolError::UnsupportedFrame`].

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, ProtocolError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest payload accepted from a 64-bit extended length (2^31 bytes).
pub const MAX_PAYLOAD_LEN: u64 = 1 << 31;

/// FIN bit in header byte 0.
const FIN_BIT: u8 = 0x80;

/// Opcode bits in header byte 0.
const OPCODE_BITS: u8 = 0x0F;

/// MASK bit in header byte 1.
const MASK_BIT: u8 = 0x80;

/// Base length bits in header byte 1.
const LENGTH_BITS: u8 = 0x7F;

/// Base length marker for a 16-bit extended length.
const EXTENDED_16: u8 = 126;

/// Base length marker for a 64-bit extended length.
const EXTENDED_64: u8 = 127;

/// Upper bound on the initial payload buffer, so a declared length is not
/// trusted for allocation before the bytes actually arrive.
const PREALLOC_LIMIT: usize = 64 * 1024;

// ============================================================================
// OpCode
// ============================================================================

/// Frame opcode (low four bits of header byte 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Binary payload.
    Binary,
    /// Connection close.
    Close,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
    /// Reserved opcode.
    Reserved(u8),
}

impl OpCode {
    /// Decodes the low four bits of a header byte.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value & OPCODE_BITS {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    /// Returns the 4-bit wire value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(value) => value,
        }
    }
}

// ============================================================================
// FrameHeader
// ============================================================================

/// The fixed two-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Whether a 4-byte mask key follows the length.
    pub masked: bool,
    /// 7-bit base length (126 and 127 announce an extended length).
    pub base_len: u8,
}

impl FrameHeader {
    /// Parses the two header bytes.
    #[inline]
    #[must_use]
    pub const fn parse(bytes: [u8; 2]) -> Self {
        Self {
            fin: bytes[0] & FIN_BIT != 0,
            opcode: OpCode::from_u8(bytes[0]),
            masked: bytes[1] & MASK_BIT != 0,
            base_len: bytes[1] & LENGTH_BITS,
        }
    }

    /// Returns `true` for the only data frame accepted from clients:
    /// FIN=1, opcode=text, MASK=1.
    #[inline]
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.fin && self.opcode == OpCode::Text && self.masked
    }

    fn unsupported(&self) -> Error {
        Error::unsupported_frame(self.fin, self.opcode.as_u8(), self.masked)
    }
}

// ============================================================================
// LengthField
// ============================================================================

/// Encoding chosen for a payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    /// Length fits the 7-bit base field (0..=125).
    Short(u8),
    /// Marker 126 followed by a big-endian 16-bit length.
    Extended16(u16),
    /// Marker 127 followed by a big-endian 64-bit length.
    Extended64(u64),
}

impl LengthField {
    /// Selects the smallest encoding for `len`.
    #[must_use]
    pub fn for_len(len: usize) -> Self {
        if len < EXTENDED_16 as usize {
            Self::Short(len as u8)
        } else if let Ok(len) = u16::try_from(len) {
            Self::Extended16(len)
        } else {
            Self::Extended64(len as u64)
        }
    }

    /// Appends the length byte (OR-ed with `mask_bit`) and any extension.
    fn write_to(self, buf: &mut Vec<u8>, mask_bit: u8) {
        match self {
            Self::Short(len) => buf.push(mask_bit | len),
            Self::Extended16(len) => {
                buf.push(mask_bit | EXTENDED_16);
                buf.extend_from_slice(&len.to_be_bytes());
            }
            Self::Extended64(len) => {
                buf.push(mask_bit | EXTENDED_64);
                buf.extend_from_slice(&len.to_be_bytes());
            }
        }
    }

    /// Number of bytes this field occupies after header byte 0.
    #[inline]
    const fn encoded_len(self) -> usize {
        match self {
            Self::Short(_) => 1,
            Self::Extended16(_) => 3,
            Self::Extended64(_) => 9,
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete text message.
    Text(String),
    /// The peer sent a close frame; end of stream.
    Close,
}

// ============================================================================
// Masking
// ============================================================================

/// XORs `payload` in place with `key[i % 4]`.
///
/// Applying the same key twice restores the original bytes.
#[inline]
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

// ============================================================================
// Decode
// ============================================================================

/// Reads one client frame and returns its unmasked payload bytes.
///
/// Returns `Ok(None)` when the frame is a close frame. The close frame's own
/// mask key and payload are left unread since the connection is torn down.
///
/// # Errors
///
/// - [`ProtocolError::PayloadTooLarge`] if a 64-bit length exceeds [`MAX_PAYLOAD_LEN`]
/// - [`ProtocolError::UnsupportedFrame`] unless FIN=1, opcode=text, MASK=1
/// - [`Error::Io`] on any short read or I/O failure
pub async fn read_payload<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;
    let header = FrameHeader::parse(head);

    let len = match header.base_len {
        EXTENDED_16 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u64::from(u16::from_be_bytes(ext))
        }
        EXTENDED_64 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            let len = u64::from_be_bytes(ext);
            if len > MAX_PAYLOAD_LEN {
                return Err(ProtocolError::PayloadTooLarge { length: len }.into());
            }
            len
        }
        short => u64::from(short),
    };

    if header.opcode == OpCode::Close {
        trace!("Close frame received");
        return Ok(None);
    }

    if !header.is_supported() {
        return Err(header.unsupported());
    }

    let mut key = [0u8; 4];
    reader.read_exact(&mut key).await?;

    // len <= 2^31, so it fits usize on every target tokio supports
    let expected = len as usize;
    let mut payload = Vec::with_capacity(expected.min(PREALLOC_LIMIT));
    (&mut *reader).take(len).read_to_end(&mut payload).await?;

    if payload.len() != expected {
        return Err(IoError::new(
            ErrorKind::UnexpectedEof,
            format!("frame payload truncated: {}/{} bytes", payload.len(), expected),
        )
        .into());
    }

    apply_mask(&mut payload, key);
    trace!(len = expected, "Frame decoded");

    Ok(Some(payload))
}

/// Reads one client frame and returns it as text or a close signal.
///
/// # Errors
///
/// Everything [`read_payload`] returns, plus [`ProtocolError::InvalidUtf8`]
/// when the payload is not valid UTF-8.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    match read_payload(reader).await? {
        Some(payload) => String::from_utf8(payload)
            .map(Frame::Text)
            .map_err(|_| ProtocolError::InvalidUtf8.into()),
        None => Ok(Frame::Close),
    }
}

// ============================================================================
// Encode
// ============================================================================

/// Encodes a server-to-client text frame: FIN=1, opcode=text, no mask.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let length = LengthField::for_len(payload.len());
    let mut frame = Vec::with_capacity(1 + length.encoded_len() + payload.len());

    frame.push(FIN_BIT | OpCode::Text.as_u8());
    length.write_to(&mut frame, 0);
    frame.extend_from_slice(payload);

    frame
}

/// Encodes a client-to-server text frame masked with `key`.
///
/// The server never sends these; they are what [`read_payload`] accepts.
#[must_use]
pub fn encode_masked_frame(payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let length = LengthField::for_len(payload.len());
    let mut frame = Vec::with_capacity(1 + length.encoded_len() + 4 + payload.len());

    frame.push(FIN_BIT | OpCode::Text.as_u8());
    length.write_to(&mut frame, MASK_BIT);
    frame.extend_from_slice(&key);

    let start = frame.len();
    frame.extend_from_slice(payload);
    apply_mask(&mut frame[start..], key);

    frame
}

/// Writes `text` as one unmasked text frame with a single `write_all`.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write or flush fails.
pub async fn write_text<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(text.as_bytes());
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
