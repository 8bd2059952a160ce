//! JSON codec for chat envelopes.
//!
//! Inbound decoding is lenient: anything that is not a JSON object with
//! string `nickname` / `text` members still yields a [`ChatMessage`], with the
//! unusable fields left empty. Outbound encoding always produces a
//! `{"messages":[...]}` batch.

use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::envelope::{ChatMessage, ChatMessages};

/// Maximum inbound frame size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured size limit.
    #[error("Frame size {size} exceeds maximum {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// A batch needs at least one message.
    #[error("Cannot encode an empty batch")]
    EmptyBatch,

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Check a frame payload size against a limit.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if `size > limit`.
pub fn check_size(size: usize, limit: usize) -> Result<(), ProtocolError> {
    if size > limit {
        return Err(ProtocolError::FrameTooLarge { size, limit });
    }
    Ok(())
}

/// Decode one inbound frame into a chat message.
///
/// Never fails. Keys match ASCII case-insensitively and are applied in
/// document order, so the last string member for a field wins. Members that
/// are not strings are skipped, and a field with no string member stays empty.
#[must_use]
pub fn decode_message(data: &[u8]) -> ChatMessage {
    serde_json::from_slice::<LenientMessage>(data)
        .map(|lenient| lenient.0)
        .unwrap_or_default()
}

struct LenientMessage(ChatMessage);

impl<'de> Deserialize<'de> for LenientMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(LenientVisitor)
    }
}

struct LenientVisitor;

impl<'de> Visitor<'de> for LenientVisitor {
    type Value = LenientMessage;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a chat message object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut message = ChatMessage::default();
        while let Some(key) = map.next_key::<String>()? {
            let field = if key.eq_ignore_ascii_case("nickname") {
                &mut message.nickname
            } else if key.eq_ignore_ascii_case("text") {
                &mut message.text
            } else {
                map.next_value::<IgnoredAny>()?;
                continue;
            };
            if let Value::String(s) = map.next_value::<Value>()? {
                *field = s;
            }
        }
        Ok(LenientMessage(message))
    }
}

/// Borrowed view of a batch so messages shared behind `Arc` need no cloning.
#[derive(Serialize)]
struct BatchRef<'a> {
    messages: Vec<&'a ChatMessage>,
}

/// Encode messages into one outbound batch frame.
///
/// # Errors
///
/// Returns an error if there are no messages or serialization fails.
pub fn encode_batch<'a, I>(messages: I) -> Result<String, ProtocolError>
where
    I: IntoIterator<Item = &'a ChatMessage>,
{
    let batch = BatchRef {
        messages: messages.into_iter().collect(),
    };

    if batch.messages.is_empty() {
        return Err(ProtocolError::EmptyBatch);
    }

    Ok(serde_json::to_string(&batch)?)
}

/// Encode a single message as an inbound frame, the way a browser sends it.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_message(message: &ChatMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode an outbound batch frame, the way a browser reads it.
///
/// # Errors
///
/// Returns an error if the data is not a valid batch.
pub fn decode_batch(data: &[u8]) -> Result<ChatMessages, serde_json::Error> {
    serde_json::from_slice(data)
}
