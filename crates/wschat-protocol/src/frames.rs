//! Transport-level frames.
//!
//! A transport delivers whole frames; the relay only cares about the handful
//! of kinds a WebSocket connection carries.

use std::fmt;

/// Frame kind, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

impl FrameType {
    /// Lowercase name of the frame kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Text => "text",
            FrameType::Binary => "binary",
            FrameType::Ping => "ping",
            FrameType::Pong => "pong",
            FrameType::Close => "close",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame read from or written to a participant's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 data frame.
    Text(String),
    /// Binary data frame. Decoded the same way as text.
    Binary(Vec<u8>),
    /// Liveness check.
    Ping(Vec<u8>),
    /// Liveness acknowledgement.
    Pong(Vec<u8>),
    /// Connection close.
    Close,
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Text(_) => FrameType::Text,
            Frame::Binary(_) => FrameType::Binary,
            Frame::Ping(_) => FrameType::Ping,
            Frame::Pong(_) => FrameType::Pong,
            Frame::Close => FrameType::Close,
        }
    }

    /// Create a text frame.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Frame::Text(text.into())
    }

    /// Create an empty ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping(Vec::new())
    }

    /// Create a pong frame echoing a ping payload.
    #[must_use]
    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Frame::Pong(payload.into())
    }

    /// Payload bytes, empty for close frames.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(data) | Frame::Ping(data) | Frame::Pong(data) => data,
            Frame::Close => &[],
        }
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload().len()
    }
}
