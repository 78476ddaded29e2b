//! Property-based tests using proptest
//!
//! These tests check the codec invariants over randomly generated values:
//! encoded size matches `size_of`, decoding returns what was encoded, and
//! arbitrary input never panics the decoder.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use bytes::Bytes;
use proptest::prelude::*;
use serde_json::json;
use td2d_protocol::core::compiler::{compile_messages, TCP_PACKET};
use td2d_protocol::core::{Map, Packet, Value};
use td2d_protocol::transport::tcp::serialize_tcp;
use td2d_protocol::transport::TcpFrameCodec;
use tokio_util::codec::Decoder;

fn record_schema() -> td2d_protocol::core::CompiledSchema {
    let def = json!({ "types": {
        "record": ["container", [
            { "name": "id", "type": "varint" },
            { "name": "delta", "type": "i16" },
            { "name": "score", "type": "lu32" },
            { "name": "count", "type": "u8" },
            { "name": "blob", "type": ["buffer", { "count": "count" }] },
            { "name": "tags", "type": ["array", { "type": "u16", "countType": "u8" }] },
            { "name": "label", "type": "cstring" },
            { "name": "kind", "type": "u8" },
            { "name": "body", "type": ["switch", { "compareTo": "kind", "fields": {
                "0": "f64",
                "1": ["pstring", { "countType": "varint" }]
            }, "default": "void" }] }
        ]]
    } });
    compile_messages(&def, &["record"]).unwrap()
}

fn record() -> impl Strategy<Value = Value> {
    (
        any::<i32>(),
        any::<i16>(),
        any::<u32>(),
        prop::collection::vec(any::<u8>(), 0..40),
        prop::collection::vec(any::<u16>(), 0..20),
        "[a-z ]{0,20}",
        0u8..4,
        prop::num::f64::NORMAL,
        "\\PC{0,30}",
    )
        .prop_map(|(id, delta, score, blob, tags, label, kind, real, text)| {
            let mut map = Map::new();
            map.insert("id".into(), Value::Int(id.into()));
            map.insert("delta".into(), Value::Int(delta.into()));
            map.insert("score".into(), Value::Int(score.into()));
            map.insert("count".into(), Value::Int(blob.len() as i64));
            map.insert("blob".into(), Value::Bytes(Bytes::from(blob)));
            map.insert("tags".into(), Value::Array(tags.into_iter().map(Value::from).collect()));
            map.insert("label".into(), Value::String(label));
            map.insert("kind".into(), Value::Int(kind.into()));
            let body = match kind {
                0 => Value::Float(real),
                1 => Value::String(text),
                _ => Value::Null,
            };
            map.insert("body".into(), body);
            Value::Object(map)
        })
}

// Property: size_of agrees with the encoder and decode inverts encode
proptest! {
    #[test]
    fn prop_record_roundtrip(value in record()) {
        let schema = record_schema();
        let size = schema.size_of(&value, "record").expect("size_of should accept generated values");
        let bytes = schema.encode_to_vec(&value, "record").expect("encode should not fail");
        prop_assert_eq!(bytes.len(), size);

        let (decoded, consumed) = schema.decode(&bytes, 0, "record").expect("decode should not fail");
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(decoded, value);
    }
}

// Property: arbitrary bytes never panic the decoder
proptest! {
    #[test]
    fn prop_decode_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let schema = record_schema();
        if let Ok((_, consumed)) = schema.decode(&data, 0, "record") {
            prop_assert!(consumed <= data.len());
        }
    }
}

fn game_packet() -> impl Strategy<Value = (&'static str, serde_json::Value, bool)> {
    prop_oneof![
        ("[A-Za-z0-9_]{1,20}", -128i8..=127).prop_map(|(username, character)| {
            ("ClientIdentity", json!({ "username": username, "character": character }), false)
        }),
        (any::<u16>(), "\\PC{0,40}", any::<bool>()).prop_map(|(sender, message, relay)| {
            ("PassthroughChatMessage", json!({ "sender": sender, "message": message }), relay)
        }),
        (any::<u16>(), any::<bool>()).prop_map(|(client_id, lobby)| {
            ("ServerStatus", json!({ "clientId": client_id, "isLobby": lobby }), false)
        }),
        Just(("ServerHeartbeat", serde_json::Value::Null, false)),
    ]
}

// Property: a serialized frame decodes back to the same packet, raw bytes included
proptest! {
    #[test]
    fn prop_tcp_frame_roundtrip((name, data, relay) in game_packet(), id in prop_oneof![Just(100u16), Just(101u16)]) {
        let version = common::version(id);
        let mut packet = common::packet(&version, name, data);
        packet.passthrough = relay;

        let frame = serialize_tcp(&version, &packet).expect("fits in one frame");
        let size = version.schema().size_of(&packet.to_tcp_value(), TCP_PACKET).unwrap();
        prop_assert_eq!(frame.len(), version.frame_header_len() + size);

        let mut codec = TcpFrameCodec::new(version.clone());
        let mut buf = bytes::BytesMut::from(&frame[..]);
        let decoded = codec.decode(&mut buf).unwrap().expect("complete frame");
        prop_assert!(buf.is_empty());
        prop_assert_eq!(&decoded.raw, &frame);
        prop_assert_eq!(decoded.packet, packet);
    }
}

#[test]
fn test_udp_packet_value_shape() {
    let version = common::version(100);
    let packet: Packet = common::packet(&version, "ServerPlayerJoined", json!(7));
    let value = packet.to_udp_value();
    assert_eq!(value.get("type").and_then(Value::as_str), Some("ServerPlayerJoined"));
    assert_eq!(value.get("data"), Some(&Value::Int(7)));
    assert!(value.get("passthrough").is_none());
}
