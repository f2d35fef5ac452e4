//! Codec boundary behavior through trait objects, the way the delivery
//! layer consumes it.

use parcel_core::{Codec, CodecError, JsonCodec};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: u64,
    amount_cents: i64,
}

#[test]
fn codec_round_trips_behind_trait_object() {
    let codec: Box<dyn Codec<Item = OrderPlaced>> =
        Box::new(JsonCodec::with_manifest("order-placed.v1"));

    let event = OrderPlaced { order_id: 42, amount_cents: 1999 };
    let encoded = codec.encode(&event).expect("encode succeeds");
    assert_eq!(encoded.manifest.as_deref(), Some("order-placed.v1"));

    let decoded = codec
        .decode(&encoded.payload, encoded.manifest.as_deref())
        .expect("decode succeeds");
    assert_eq!(decoded, event);
}

#[test]
fn decode_failure_is_reported_not_panicked() {
    let codec = JsonCodec::<OrderPlaced>::new();
    let err = codec.decode(b"\x00\x01garbage", None).expect_err("payload is garbage");
    assert!(matches!(err, CodecError::Decode { .. }));
}

#[test]
fn truncated_payload_is_decode_error() {
    let codec = JsonCodec::<OrderPlaced>::new();
    let encoded = codec.encode(&OrderPlaced { order_id: 1, amount_cents: 5 }).unwrap();
    let truncated = &encoded.payload[..encoded.payload.len() - 2];
    assert!(codec.decode(truncated, None).is_err());
}
