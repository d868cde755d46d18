//! Chunk-boundary invariance properties for the streaming codec.
//!
//! The parser must produce byte-identical results whether a frame
//! sequence arrives in one read or sliced at arbitrary points, down to a
//! byte at a time.

use bytes::{BufMut, BytesMut};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};
use wirepool::{Message, MessageCodec};

fn encode_all(messages: &[Message]) -> BytesMut {
    let mut codec = MessageCodec::default();
    let mut buf = BytesMut::new();
    for message in messages {
        codec.encode(message.clone(), &mut buf).expect("encode");
    }
    buf
}

/// Feed `bytes` to a fresh decoder, split at the given sorted offsets,
/// draining completed messages after every piece.
fn decode_chunked(bytes: &[u8], cuts: &[usize]) -> Vec<Message> {
    let mut codec = MessageCodec::default();
    let mut buf = BytesMut::new();
    let mut out = Vec::new();
    let mut last = 0;
    for &cut in cuts {
        buf.put_slice(&bytes[last..cut]);
        while let Some(message) = codec.decode(&mut buf).expect("decode") {
            out.push(message);
        }
        last = cut;
    }
    buf.put_slice(&bytes[last..]);
    while let Some(message) = codec.decode(&mut buf).expect("decode") {
        out.push(message);
    }
    out
}

proptest! {
    #[test]
    fn any_partition_decodes_identically(
        kinds in proptest::collection::vec("[a-z][a-z0-9._-]{0,11}", 1..4),
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..512), 1..4),
        cut_seed in proptest::collection::vec(any::<u16>(), 0..8),
    ) {
        let n = kinds.len().min(payloads.len());
        let messages: Vec<Message> = kinds
            .iter()
            .take(n)
            .zip(payloads.iter().take(n))
            .map(|(kind, payload)| Message::new(kind.clone(), payload.clone()))
            .collect();
        let bytes = encode_all(&messages);

        let mut cuts: Vec<usize> = cut_seed
            .iter()
            .map(|seed| usize::from(*seed) % (bytes.len() + 1))
            .collect();
        cuts.sort_unstable();

        let whole = decode_chunked(&bytes, &[]);
        let pieces = decode_chunked(&bytes, &cuts);
        prop_assert_eq!(&whole, &messages);
        prop_assert_eq!(&pieces, &messages);
    }

    #[test]
    fn byte_at_a_time_matches_single_chunk(
        kind in "[a-z]{1,8}",
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let message = Message::new(kind, payload);
        let bytes = encode_all(std::slice::from_ref(&message));
        let cuts: Vec<usize> = (1..bytes.len()).collect();
        let decoded = decode_chunked(&bytes, &cuts);
        prop_assert_eq!(decoded, vec![message]);
    }
}
