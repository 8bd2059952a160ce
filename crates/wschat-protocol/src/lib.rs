//! # wschat-protocol
//!
//! Wire format for the wschat relay.
//!
//! - [`ChatMessage`] - one chat envelope, `{"nickname": .., "text": ..}`
//! - [`ChatMessages`] - an outbound batch, `{"messages": [..]}`
//! - [`Frame`] - the transport frames a connection carries
//!
//! ## Example
//!
//! ```rust
//! use wschat_protocol::{codec, ChatMessage};
//!
//! let inbound = codec::decode_message(br#"{"nickname":"alice","text":"hi"}"#);
//! assert_eq!(inbound, ChatMessage::new("alice", "hi"));
//!
//! let outbound = codec::encode_batch([&inbound]).unwrap();
//! assert_eq!(outbound, r#"{"messages":[{"nickname":"alice","text":"hi"}]}"#);
//! ```

pub mod codec;
pub mod envelope;
pub mod frames;

pub use codec::{decode_message, encode_batch, ProtocolError, MAX_MESSAGE_SIZE};
pub use envelope::{ChatMessage, ChatMessages};
pub use frames::{Frame, FrameType};
