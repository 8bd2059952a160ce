//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as WsProtocolConfig;
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, info};
use wschat_protocol::{Frame, MAX_MESSAGE_SIZE};

use crate::traits::{Connection, FrameReader, FrameWriter, Transport, TransportError};
use crate::ws_error::map_receive_error;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Standalone WebSocket listener.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default limits.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Connection, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        upgrade_to_websocket(stream, self.config.max_message_size).await
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Perform the server side of the WebSocket handshake on a TCP stream.
///
/// # Errors
///
/// Returns an error if the handshake fails.
pub async fn upgrade_to_websocket(
    stream: TcpStream,
    max_message_size: usize,
) -> Result<Connection, TransportError> {
    let addr = stream.peer_addr().map_err(TransportError::Io)?;

    let ws_config = WsProtocolConfig {
        max_message_size: Some(max_message_size),
        max_frame_size: Some(max_message_size),
        ..Default::default()
    };

    let ws_stream = accept_async_with_config(stream, Some(ws_config))
        .await
        .map_err(|e| {
            error!("WebSocket handshake failed: {}", e);
            TransportError::Other(format!("WebSocket handshake failed: {}", e))
        })?;

    debug!("WebSocket handshake completed with {}", addr);

    Ok(split(ws_stream).with_remote_addr(addr.to_string()))
}

/// Split an established WebSocket stream into a [`Connection`].
pub fn split<S>(stream: WebSocketStream<S>) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = stream.split();
    Connection::new(
        WebSocketReader { stream },
        WebSocketWriter { sink, open: true },
    )
}

/// Inbound half of a tungstenite WebSocket.
pub struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => Frame::Text(text),
                Some(Ok(Message::Binary(data))) => Frame::Binary(data),
                Some(Ok(Message::Ping(data))) => Frame::Ping(data),
                Some(Ok(Message::Pong(data))) => Frame::Pong(data),
                Some(Ok(Message::Close(_))) => Frame::Close,
                // Raw frames only show up when writing, never when reading.
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return map_receive_error(e),
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            };
            return Ok(Some(frame));
        }
    }
}

/// Outbound half of a tungstenite WebSocket.
pub struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    open: bool,
}

#[async_trait]
impl<S> FrameWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.open, false) {
            return Ok(());
        }

        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }
}
