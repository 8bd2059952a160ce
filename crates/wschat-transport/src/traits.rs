//! Transport abstraction traits for wschat.
//!
//! The relay core only ever sees a [`Connection`]: an id plus an independent
//! [`FrameReader`] and [`FrameWriter`], so the inbound and outbound sides of a
//! participant can run as separate tasks.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use wschat_protocol::Frame;

/// Counter backing [`ConnectionId::generate`].
static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a connection ID unique within this process.
    #[must_use]
    pub fn generate() -> Self {
        let n = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", n))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] wschat_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake or other setup failure.
    #[error("{0}")]
    Other(String),
}

/// The inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` once the peer has gone away cleanly. Deadlines are
    /// the caller's business.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// The outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one frame and flush it.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the outbound stream. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An accepted connection, already split into its two halves.
pub struct Connection {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Inbound frames.
    pub reader: Box<dyn FrameReader>,
    /// Outbound frames.
    pub writer: Box<dyn FrameWriter>,
    /// Remote address, if the transport knows it.
    pub remote_addr: Option<String>,
}

impl Connection {
    /// Wrap a reader/writer pair with a freshly generated id.
    #[must_use]
    pub fn new(reader: impl FrameReader + 'static, writer: impl FrameWriter + 'static) -> Self {
        Self {
            id: ConnectionId::generate(),
            reader: Box::new(reader),
            writer: Box::new(writer),
            remote_addr: None,
        }
    }

    /// Attach the remote address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// A source of accepted connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method waits until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Connection, TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}
