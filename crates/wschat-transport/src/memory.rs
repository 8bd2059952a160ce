//! In-memory transport.
//!
//! [`pair`] returns a server-side [`Connection`] and the [`MemoryPeer`] that
//! plays the browser. Useful for driving sessions in tests and benchmarks
//! without sockets.

use async_trait::async_trait;
use tokio::sync::mpsc;
use wschat_protocol::Frame;

use crate::traits::{Connection, FrameReader, FrameWriter, TransportError};

/// Create a connected in-memory pair.
#[must_use]
pub fn pair() -> (Connection, MemoryPeer) {
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_server) = mpsc::unbounded_channel();

    let connection = Connection::new(
        MemoryReader { rx: from_peer },
        MemoryWriter {
            tx: to_peer,
            open: true,
        },
    )
    .with_remote_addr("memory");

    let peer = MemoryPeer {
        tx: Some(to_server),
        rx: from_server,
    };

    (connection, peer)
}

/// Server-side reader fed by a [`MemoryPeer`].
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Server-side writer draining into a [`MemoryPeer`].
pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<Frame>,
    open: bool,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }
}

/// The client end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// Send a frame to the server. Returns `false` if the server side is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the server has dropped its writer and every frame
    /// has been read.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Receive a frame if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// End the inbound stream, as a browser closing its socket would.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }
}
