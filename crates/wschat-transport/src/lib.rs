//! # wschat-transport
//!
//! Transport layer for the wschat relay.
//!
//! Every transport hands the relay a [`Connection`]: a [`FrameReader`] and a
//! [`FrameWriter`] that can be driven from different tasks.
//!
//! - **WebSocket** - standalone listener built on tokio-tungstenite
//! - **axum** - adapter for sockets upgraded by an axum handler
//! - **memory** - in-process pair for tests and benchmarks
//!
//! ```rust,ignore
//! use wschat_transport::{Transport, WebSocketTransport};
//!
//! let transport = WebSocketTransport::bind("127.0.0.1:8080".parse()?).await?;
//! while let Ok(mut conn) = transport.accept().await {
//!     while let Ok(Some(frame)) = conn.reader.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "axum")]
pub mod axum_ws;

#[cfg(any(feature = "websocket", feature = "axum"))]
mod ws_error;

pub use traits::{Connection, ConnectionId, FrameReader, FrameWriter, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
