//! Property tests for the frame codec and receive buffer

use comfoair_core::protocol::{frame, ProtocolError, ReceiveAssembler, RxEvent, ESCAPE};
use proptest::prelude::*;

proptest! {
    #[test]
    fn decode_inverts_encode(
        command in any::<u16>(),
        payload in proptest::collection::vec(any::<u8>(), 0..=255),
    ) {
        let encoded = frame::encode(command, &payload).unwrap();
        let decoded = frame::decode(&encoded).unwrap();
        prop_assert_eq!(decoded.command, command);
        prop_assert_eq!(decoded.payload, payload);
    }

    /// No single-byte corruption between the markers is ever accepted
    #[test]
    fn single_byte_corruption_detected(
        command in any::<u16>(),
        payload in proptest::collection::vec(any::<u8>(), 0..64),
        position in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut encoded = frame::encode(command, &payload).unwrap();
        let inner = 2..encoded.len() - 2;
        let at = inner.start + position.index(inner.len());
        encoded[at] ^= flip;

        match frame::decode(&encoded) {
            Err(ProtocolError::FrameChecksumMismatch { .. })
            | Err(ProtocolError::FrameLengthMismatch { .. }) => {}
            other => prop_assert!(false, "corruption at {} accepted: {:?}", at, other),
        }
    }

    #[test]
    fn escape_bytes_are_doubled(
        payload in proptest::collection::vec(prop_oneof![Just(ESCAPE), any::<u8>()], 0..64),
    ) {
        let encoded = frame::encode(0x00CE, &payload).unwrap();
        let escapes = payload.iter().filter(|&&b| b == ESCAPE).count();
        // markers, command, length, checksum
        prop_assert_eq!(encoded.len(), 2 + 2 + 1 + payload.len() + escapes + 1 + 2);
        prop_assert_eq!(frame::decode(&encoded).unwrap().payload, payload);
    }

    /// Arbitrary chunking of a clean stream yields the same frame
    #[test]
    fn chunking_does_not_matter(
        payload in proptest::collection::vec(0x10u8..=0xEF, 0..32),
        split in any::<prop::sample::Index>(),
    ) {
        let encoded = frame::encode(0x00D2, &payload).unwrap();
        let at = split.index(encoded.len());

        let mut rx = ReceiveAssembler::new();
        let mut events = rx.feed(&encoded[..at]);
        events.extend(rx.feed(&encoded[at..]));

        prop_assert_eq!(events, vec![RxEvent::Frame(encoded)]);
        prop_assert!(rx.is_empty());
    }
}
