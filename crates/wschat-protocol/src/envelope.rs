//! Chat envelopes exchanged between browsers and the relay.

use serde::{Deserialize, Serialize};

/// A single chat message.
///
/// Inbound frames decode into one of these; outbound frames carry a batch of
/// them (see [`ChatMessages`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name chosen by the sender.
    #[serde(default)]
    pub nickname: String,
    /// Message body.
    #[serde(default)]
    pub text: String,
}

impl ChatMessage {
    /// Create a new chat message.
    #[must_use]
    pub fn new(nickname: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            text: text.into(),
        }
    }

    /// Whether both fields are empty, which is what a malformed frame decodes to.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nickname.is_empty() && self.text.is_empty()
    }
}

/// A batch of chat messages written as one outbound frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessages {
    /// Messages in hub arrival order.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatMessages {
    /// Number of messages in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
