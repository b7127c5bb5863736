//! Codec tests

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use test_case::test_case;

use super::*;
use crate::protocol::{ClusterMessage, DecodeError, EncodeError, MAX_DATA_LENGTH};

fn encode(message: &ClusterMessage) -> BytesMut {
    let mut buf = BytesMut::new();
    Encoder::new().encode(message, &mut buf).unwrap();
    buf
}

#[test]
fn test_membership_wire_layout() {
    let buf = encode(&ClusterMessage::membership("10.0.0.1:9911", true, "pod-a"));

    let mut expected = vec![0, 0, 0, 11, 0, 13];
    expected.extend_from_slice(b"10.0.0.1:9911");
    expected.push(1);
    expected.extend_from_slice(&[0, 5]);
    expected.extend_from_slice(b"pod-a");

    assert_eq!(&buf[..], &expected[..]);
}

#[test]
fn test_data_wire_layout() {
    let buf = encode(&ClusterMessage::data(vec![0xde, 0xad]));
    assert_eq!(&buf[..], &[0, 0, 0, 12, 0, 0, 0, 2, 0xde, 0xad]);
}

#[test]
fn test_hello_wire_layout() {
    let mut buf = BytesMut::new();
    Encoder::new().encode_hello("10.0.0.2:9911", &mut buf).unwrap();

    assert_eq!(&buf[..4], &[0, 0, 0, 182]);
    assert_eq!(&buf[4..6], &[0, 13]);
    assert_eq!(&buf[6..], b"10.0.0.2:9911");

    let (address, len) = Decoder::new().decode_hello(&buf).unwrap().unwrap();
    assert_eq!(address, "10.0.0.2:9911");
    assert_eq!(len, buf.len());
}

#[test]
fn test_decode_leave_message() {
    let message = ClusterMessage::membership("10.0.0.1:9911", false, "pod-a");
    let buf = encode(&message);

    let (decoded, len) = Decoder::new().decode(&buf).unwrap().unwrap();
    assert_eq!(decoded, message);
    assert!(decoded.is_leave());
    assert_eq!(len, buf.len());
}

#[test]
fn test_decode_any_nonzero_join_flag_is_true() {
    let mut buf = encode(&ClusterMessage::membership("a", true, "b"));
    // key(4) + len(2) + "a"(1) => flag at offset 7
    buf[7] = 0x7f;
    let (decoded, _) = Decoder::new().decode(&buf).unwrap().unwrap();
    assert_eq!(decoded, ClusterMessage::membership("a", true, "b"));
}

#[test]
fn test_decode_empty_data() {
    let buf = encode(&ClusterMessage::data(Bytes::new()));
    let (decoded, len) = Decoder::new().decode(&buf).unwrap().unwrap();
    assert_eq!(decoded, ClusterMessage::data(Bytes::new()));
    assert_eq!(len, 8);
}

#[test_case(0 ; "zero")]
#[test_case(13 ; "unknown positive")]
#[test_case(182 ; "hello is not a message")]
#[test_case(-1 ; "negative")]
fn test_decode_invalid_message_key(key: i32) {
    let mut buf = BytesMut::new();
    buf.put_i32(key);
    buf.put_slice(b"trailing garbage");

    assert_eq!(
        Decoder::new().decode(&buf),
        Err(DecodeError::InvalidMessageKey(key))
    );
}

#[test]
fn test_decode_invalid_hello() {
    let buf = encode(&ClusterMessage::data(vec![1]));
    assert_eq!(
        Decoder::new().decode_hello(&buf),
        Err(DecodeError::InvalidHello(12))
    );
}

#[test]
fn test_decode_data_too_large_rejected_from_header_alone() {
    let declared = (MAX_DATA_LENGTH + 1) as i32;
    let mut buf = BytesMut::new();
    buf.put_i32(12);
    buf.put_i32(declared);

    // Only the 8 header bytes are present; the body is never waited for
    assert_eq!(
        Decoder::new().decode(&buf),
        Err(DecodeError::MessageTooLarge(declared))
    );
}

#[test]
fn test_decode_data_at_limit_waits_for_body() {
    let mut buf = BytesMut::new();
    buf.put_i32(12);
    buf.put_i32(MAX_DATA_LENGTH as i32);
    assert_eq!(Decoder::new().decode(&buf), Ok(None));
}

#[test]
fn test_decode_negative_data_length() {
    let mut buf = BytesMut::new();
    buf.put_i32(12);
    buf.put_i32(-5);
    assert_eq!(
        Decoder::new().decode(&buf),
        Err(DecodeError::MessageTooLarge(-5))
    );
}

#[test]
fn test_decode_custom_max_data_length() {
    let buf = encode(&ClusterMessage::data(vec![0u8; 16]));
    let decoder = Decoder::new().with_max_data_length(8);
    assert_eq!(decoder.decode(&buf), Err(DecodeError::MessageTooLarge(16)));
}

#[test]
fn test_decode_incomplete_prefixes() {
    let decoder = Decoder::new();
    for message in [
        ClusterMessage::membership("10.0.0.1:9911", true, "pod-a"),
        ClusterMessage::data(vec![1, 2, 3, 4, 5]),
    ] {
        let buf = encode(&message);
        for end in 0..buf.len() {
            assert_eq!(decoder.decode(&buf[..end]), Ok(None), "prefix {}", end);
        }
        assert!(decoder.decode(&buf).unwrap().is_some());
    }
}

#[test]
fn test_decode_frame_consumes_one_message() {
    let leave = ClusterMessage::membership("10.0.0.2:9911", false, "pod-b");
    let mut buf = encode(&ClusterMessage::data(vec![4, 5, 6]));
    buf.extend_from_slice(&encode(&leave));
    let payload_start = buf.as_ptr() as usize + 8;

    let decoder = Decoder::new();
    match decoder.decode_frame(&mut buf).unwrap() {
        Some(ClusterMessage::Data(payload)) => {
            assert_eq!(payload, Bytes::from_static(&[4, 5, 6]));
            // Split from the read buffer, not copied out of it
            assert_eq!(payload.as_ptr() as usize, payload_start);
        }
        other => panic!("expected data, got {:?}", other),
    }
    assert_eq!(buf, encode(&leave));

    assert_eq!(decoder.decode_frame(&mut buf).unwrap(), Some(leave));
    assert!(buf.is_empty());
    assert_eq!(decoder.decode_frame(&mut buf).unwrap(), None);
}

#[test]
fn test_decode_frame_incomplete_leaves_buffer() {
    let full = encode(&ClusterMessage::data(vec![1, 2, 3, 4]));
    let decoder = Decoder::new();
    for cut in [2, 6, full.len() - 1] {
        let mut buf = BytesMut::from(&full[..cut]);
        assert_eq!(decoder.decode_frame(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], &full[..cut]);
    }
}

#[test]
fn test_decode_frame_rejects_oversized_data() {
    let mut buf = BytesMut::new();
    buf.put_i32(12);
    buf.put_i32(MAX_DATA_LENGTH as i32 + 1);
    assert_eq!(
        Decoder::new().decode_frame(&mut buf),
        Err(DecodeError::MessageTooLarge(MAX_DATA_LENGTH as i32 + 1))
    );
}

#[test]
fn test_decode_invalid_utf8() {
    let mut buf = BytesMut::new();
    buf.put_i32(11);
    buf.put_u16(2);
    buf.put_slice(&[0xff, 0xfe]);
    buf.put_u8(1);
    buf.put_u16(0);
    assert_eq!(Decoder::new().decode(&buf), Err(DecodeError::InvalidUtf8));
}

#[test]
fn test_encode_rejects_long_string_without_writing() {
    let long = "x".repeat(70_000);
    let mut buf = BytesMut::new();
    let result = Encoder::new().encode(&ClusterMessage::membership("a", true, long), &mut buf);
    assert_eq!(result, Err(EncodeError::StringTooLong(70_000)));
    assert!(buf.is_empty());
}

#[test]
fn test_encode_rejects_oversized_payload() {
    let mut buf = BytesMut::new();
    let encoder = Encoder::new().with_max_data_length(4);
    let result = encoder.encode(&ClusterMessage::data(vec![0u8; 5]), &mut buf);
    assert_eq!(result, Err(EncodeError::MessageTooLarge(5)));
    assert!(buf.is_empty());
}

fn arb_message() -> impl Strategy<Value = ClusterMessage> {
    prop_oneof![
        (".{0,64}", any::<bool>(), ".{0,64}").prop_map(|(address, joining, identity)| {
            ClusterMessage::Membership {
                address,
                joining,
                identity,
            }
        }),
        proptest::collection::vec(any::<u8>(), 0..2048)
            .prop_map(|payload| ClusterMessage::Data(Bytes::from(payload))),
    ]
}

proptest! {
    #[test]
    fn prop_encode_decode_roundtrip(message in arb_message()) {
        let buf = encode(&message);
        let (decoded, len) = Decoder::new().decode(&buf).unwrap().unwrap();
        prop_assert_eq!(decoded, message);
        prop_assert_eq!(len, buf.len());
    }
}

// Stream framing

#[tokio::test]
async fn test_reader_reassembles_partial_reads() {
    let mut hello = BytesMut::new();
    Encoder::new().encode_hello("10.0.0.9:9911", &mut hello).unwrap();
    let join = encode(&ClusterMessage::membership("10.0.0.9:9911", true, "pod-9"));
    let data = encode(&ClusterMessage::data(vec![7u8; 100]));

    let mock = tokio_test::io::Builder::new()
        .read(&hello[..3])
        .read(&hello[3..])
        .read(&join[..5])
        .read(&join[5..])
        .read(&data[..1])
        .read(&data[1..50])
        .read(&data[50..])
        .build();

    let mut reader = FrameReader::new(mock);
    assert_eq!(reader.read_hello().await.unwrap(), "10.0.0.9:9911");
    assert_eq!(
        reader.read_message().await.unwrap(),
        ClusterMessage::membership("10.0.0.9:9911", true, "pod-9")
    );
    assert_eq!(
        reader.read_message().await.unwrap(),
        ClusterMessage::data(vec![7u8; 100])
    );
    assert!(matches!(reader.read_message().await, Err(FrameError::Eof)));
}

#[tokio::test]
async fn test_reader_multiple_frames_in_one_read() {
    let mut both = encode(&ClusterMessage::data(vec![1]));
    both.extend_from_slice(&encode(&ClusterMessage::data(vec![2])));

    let mock = tokio_test::io::Builder::new().read(&both).build();
    let mut reader = FrameReader::new(mock);

    assert_eq!(reader.read_message().await.unwrap(), ClusterMessage::data(vec![1]));
    assert_eq!(reader.read_message().await.unwrap(), ClusterMessage::data(vec![2]));
    assert!(reader.buffered().is_empty());
}

#[tokio::test]
async fn test_reader_eof_mid_frame_is_io_error() {
    let data = encode(&ClusterMessage::data(vec![9u8; 10]));
    let mock = tokio_test::io::Builder::new().read(&data[..6]).build();
    let mut reader = FrameReader::new(mock);

    match reader.read_message().await {
        Err(FrameError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("expected UnexpectedEof, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reader_invalid_key_does_not_advance() {
    let mut buf = BytesMut::new();
    buf.put_i32(99);
    let mock = tokio_test::io::Builder::new().read(&buf).build();
    let mut reader = FrameReader::new(mock);

    assert!(matches!(
        reader.read_message().await,
        Err(FrameError::Decode(DecodeError::InvalidMessageKey(99)))
    ));
    assert_eq!(reader.buffered(), &[0, 0, 0, 99]);
}

#[tokio::test(start_paused = true)]
async fn test_reader_read_timeout() {
    let (client, _server) = tokio::io::duplex(64);
    let mut reader = FrameReader::new(client).with_read_timeout(Duration::from_secs(5));

    assert!(matches!(reader.read_message().await, Err(FrameError::Timeout)));
}

#[tokio::test]
async fn test_write_frame_flushes() {
    let data = encode(&ClusterMessage::data(vec![3, 4]));
    let mut mock = tokio_test::io::Builder::new().write(&data).build();
    write_frame(&mut mock, &data).await.unwrap();
}
