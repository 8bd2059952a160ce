//! Timing and buffer settings for the hub and sessions.

use std::time::Duration;
use wschat_protocol::MAX_MESSAGE_SIZE;

/// Default time allowed to write one frame to a peer.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Default time allowed between two inbound frames.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Default outbound queue capacity per participant.
pub const DEFAULT_SEND_BUFFER: usize = 256;

/// Default capacity of the hub's event queue.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Keepalive period for a given read window: 9/10 of it, so a ping always
/// reaches the peer before its own read deadline expires.
#[must_use]
pub fn ping_period_for(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for each outbound write.
    pub write_wait: Duration,
    /// Read liveness window. Any inbound frame, pongs included, resets it.
    pub pong_wait: Duration,
    /// Interval between outbound pings. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Maximum inbound data frame size in bytes.
    pub max_message_size: usize,
    /// Outbound queue capacity. A participant whose queue is full when a
    /// broadcast arrives is evicted.
    pub send_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: ping_period_for(DEFAULT_PONG_WAIT),
            max_message_size: MAX_MESSAGE_SIZE,
            send_buffer: DEFAULT_SEND_BUFFER,
        }
    }
}

impl SessionConfig {
    /// Set the read window and derive the ping period from it.
    #[must_use]
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = ping_period_for(pong_wait);
        self
    }

    /// Set the write deadline.
    #[must_use]
    pub fn with_write_wait(mut self, write_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self
    }

    /// Set the outbound queue capacity (at least 1).
    #[must_use]
    pub fn with_send_buffer(mut self, send_buffer: usize) -> Self {
        self.send_buffer = send_buffer.max(1);
        self
    }
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the event queue feeding the hub loop.
    pub event_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}
