//! Wire codec: binary framing and the JSON text mode.
//!
//! Binary frame layout, bit-exact:
//!
//! ```text
//! [type: u8][timestamp: u64 be, ms][payload length: u32 be][payload: UTF-8 JSON]
//! ```
//!
//! The payload JSON carries the full message object including its `"type"`
//! tag; the decoder rejects frames whose tag disagrees with the type code.
//! JSON mode carries the same object as an entire text frame. A connection
//! latches to one mode on its first frame (handled by the connection, not
//! here).

use crate::protocol::{Message, Payload};
use thiserror::Error;

/// Fixed byte length of the binary frame header.
pub const HEADER_LEN: usize = 13;

/// Maximum accepted payload size (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// The two framing modes a connection can latch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    /// Type-tagged binary frames.
    Binary,
    /// Whole-frame JSON text.
    Json,
}

/// A raw transport frame, before or after encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A binary transport frame.
    Binary(Vec<u8>),
    /// A text transport frame.
    Text(String),
}

impl Frame {
    /// The protocol mode this frame belongs to.
    #[must_use]
    pub fn mode(&self) -> ProtocolMode {
        match self {
            Self::Binary(_) => ProtocolMode::Binary,
            Self::Text(_) => ProtocolMode::Json,
        }
    }
}

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame shorter than the fixed header.
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Header length field disagrees with the actual payload size.
    #[error("payload length mismatch: header says {declared}, got {actual}")]
    LengthMismatch {
        /// Length from the header.
        declared: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// Payload larger than [`MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// The type code is not assigned to any message variant.
    #[error("unknown type code: {0:#04x}")]
    UnknownTypeCode(u8),

    /// The payload tag does not match the frame's type code.
    #[error("type tag mismatch: code says {expected}, payload says {got}")]
    TagMismatch {
        /// Variant named by the type code.
        expected: &'static str,
        /// Tag found in the payload JSON.
        got: String,
    },

    /// Payload is not valid UTF-8.
    #[error("payload is not UTF-8")]
    InvalidUtf8,

    /// Payload JSON failed to parse or lacks required fields.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Returns the binary type code for a payload.
#[must_use]
pub fn type_code(payload: &Payload) -> u8 {
    match payload {
        Payload::Connect(_) => 0x00,
        Payload::Ping => 0x01,
        Payload::Pong => 0x02,
        Payload::Auth(_) => 0x10,
        Payload::AuthSuccess(_) => 0x11,
        Payload::AuthError(_) => 0x12,
        Payload::Subscribe(_) => 0x20,
        Payload::Unsubscribe(_) => 0x21,
        Payload::SyncResponse(_) => 0x22,
        Payload::SyncRequest(_) => 0x23,
        Payload::Delta(_) => 0x30,
        Payload::DeltaBatch(_) => 0x31,
        Payload::Ack(_) => 0x32,
        Payload::DeltaBatchChunk(_) => 0x33,
        Payload::AwarenessSubscribe(_) => 0x40,
        Payload::AwarenessUpdate(_) => 0x41,
        Payload::AwarenessState(_) => 0x42,
        Payload::Error(_) => 0xFF,
    }
}

/// Returns the variant name a type code selects, if the code is assigned.
#[must_use]
pub fn type_name_for_code(code: u8) -> Option<&'static str> {
    Some(match code {
        0x00 => "CONNECT",
        0x01 => "PING",
        0x02 => "PONG",
        0x10 => "AUTH",
        0x11 => "AUTH_SUCCESS",
        0x12 => "AUTH_ERROR",
        0x20 => "SUBSCRIBE",
        0x21 => "UNSUBSCRIBE",
        0x22 => "SYNC_RESPONSE",
        0x23 => "SYNC_REQUEST",
        0x30 => "DELTA",
        0x31 => "DELTA_BATCH",
        0x32 => "ACK",
        0x33 => "DELTA_BATCH_CHUNK",
        0x40 => "AWARENESS_SUBSCRIBE",
        0x41 => "AWARENESS_UPDATE",
        0x42 => "AWARENESS_STATE",
        0xFF => "ERROR",
        _ => return None,
    })
}

/// Encodes a message in the given mode.
pub fn encode(mode: ProtocolMode, message: &Message) -> Result<Frame, CodecError> {
    match mode {
        ProtocolMode::Binary => encode_binary(message).map(Frame::Binary),
        ProtocolMode::Json => encode_json(message).map(Frame::Text),
    }
}

/// Decodes a frame; the mode is inferred from the frame kind.
pub fn decode(frame: &Frame) -> Result<Message, CodecError> {
    match frame {
        Frame::Binary(bytes) => decode_binary(bytes),
        Frame::Text(text) => decode_json(text),
    }
}

/// Encodes a message as a binary frame.
pub fn encode_binary(message: &Message) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(type_code(&message.payload));
    frame.extend_from_slice(&message.timestamp_ms.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes a binary frame.
pub fn decode_binary(bytes: &[u8]) -> Result<Message, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::FrameTooShort(bytes.len()));
    }

    let code = bytes[0];
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[9..13]);
    let declared = u32::from_be_bytes(len_bytes) as usize;
    let payload = &bytes[HEADER_LEN..];

    if declared != payload.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }

    let expected = type_name_for_code(code).ok_or(CodecError::UnknownTypeCode(code))?;
    let text = std::str::from_utf8(payload).map_err(|_| CodecError::InvalidUtf8)?;
    let message: Message = serde_json::from_str(text)?;

    let got = message.payload.type_name();
    if got != expected {
        return Err(CodecError::TagMismatch {
            expected,
            got: got.to_string(),
        });
    }
    Ok(message)
}

/// Encodes a message as a JSON text frame.
pub fn encode_json(message: &Message) -> Result<String, CodecError> {
    let text = serde_json::to_string(message)?;
    if text.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(text.len()));
    }
    Ok(text)
}

/// Decodes a JSON text frame.
pub fn decode_json(text: &str) -> Result<Message, CodecError> {
    if text.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}
