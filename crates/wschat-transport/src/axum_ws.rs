//! Adapter for sockets upgraded by axum's `WebSocketUpgrade` extractor.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::debug;
use wschat_protocol::Frame;

use crate::traits::{Connection, FrameReader, FrameWriter, TransportError};
use crate::ws_error::map_receive_error;

/// axum boxes the underlying tungstenite error; unwrap it so limits and
/// closed streams read the same as on the standalone listener.
fn map_axum_error(error: axum::Error) -> Result<Option<Frame>, TransportError> {
    match error.into_inner().downcast::<WsError>() {
        Ok(ws) => map_receive_error(*ws),
        Err(other) => Err(TransportError::ReceiveFailed(other.to_string())),
    }
}

/// Split an upgraded axum socket into a [`Connection`].
pub fn split(socket: WebSocket) -> Connection {
    let (sink, stream) = socket.split();
    Connection::new(AxumReader { stream }, AxumWriter { sink, open: true })
}

/// Inbound half of an axum WebSocket.
pub struct AxumReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for AxumReader {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(Frame::Text(text))),
            Some(Ok(Message::Binary(data))) => Ok(Some(Frame::Binary(data))),
            Some(Ok(Message::Ping(data))) => Ok(Some(Frame::Ping(data))),
            Some(Ok(Message::Pong(data))) => Ok(Some(Frame::Pong(data))),
            Some(Ok(Message::Close(_))) => Ok(Some(Frame::Close)),
            Some(Err(e)) => map_axum_error(e),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

/// Outbound half of an axum WebSocket.
pub struct AxumWriter {
    sink: SplitSink<WebSocket, Message>,
    open: bool,
}

#[async_trait]
impl FrameWriter for AxumWriter {
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

        // The peer may already be gone; there is nothing left to flush then.
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "Error closing WebSocket");
        }
        Ok(())
    }
}
