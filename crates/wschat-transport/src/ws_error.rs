//! Read error mapping shared by the tungstenite-backed readers.

use tokio_tungstenite::tungstenite::error::{CapacityError, Error as WsError};
use tracing::debug;
use wschat_protocol::{Frame, ProtocolError};

use crate::traits::TransportError;

/// Map a tungstenite read error. `Ok(None)` means the stream has ended.
pub(crate) fn map_receive_error(error: WsError) -> Result<Option<Frame>, TransportError> {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            debug!("WebSocket stream ended");
            Ok(None)
        }
        WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
            Err(TransportError::Protocol(ProtocolError::FrameTooLarge {
                size,
                limit: max_size,
            }))
        }
        e => Err(TransportError::ReceiveFailed(e.to_string())),
    }
}
