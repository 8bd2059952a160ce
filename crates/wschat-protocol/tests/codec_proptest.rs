use proptest::prelude::*;
use wschat_protocol::codec::{decode_batch, decode_message, encode_batch, encode_message};
use wschat_protocol::ChatMessage;

proptest! {
    /// Arbitrary input never fails to decode.
    #[test]
    fn decode_accepts_any_bytes(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode_message(&data);
    }

    /// Whatever a browser encodes comes back out unchanged.
    #[test]
    fn browser_messages_survive_relay(nickname in ".{0,32}", text in ".{0,128}") {
        let inbound = ChatMessage::new(nickname, text);
        let frame = encode_message(&inbound).unwrap();
        let decoded = decode_message(frame.as_bytes());
        prop_assert_eq!(&decoded, &inbound);

        let batch = encode_batch([&decoded]).unwrap();
        prop_assert_eq!(decode_batch(batch.as_bytes()).unwrap().messages, vec![inbound]);
    }
}
