//! Pluggable payload codec boundary.
//!
//! A codec turns opaque log payloads into domain objects and back. Decoding
//! failure is its own error class: the consuming pipeline treats it as
//! recoverable and can resume past the offending record. An optional manifest
//! string travels alongside the bytes as a type discriminator for
//! polymorphic payloads.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::CodecError;

/// Encoded payload plus its optional type discriminator.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Payload bytes to store in the log.
    pub payload: Bytes,
    /// Optional manifest string identifying the payload type.
    pub manifest: Option<String>,
}

/// Bidirectional payload codec for one domain type.
pub trait Codec: Send + Sync + 'static {
    /// Domain type this codec produces and consumes.
    type Item: Send + Sync + 'static;

    /// Encodes a domain object into payload bytes.
    fn encode(&self, item: &Self::Item) -> Result<Encoded, CodecError>;

    /// Decodes payload bytes into a domain object.
    ///
    /// `manifest` is the discriminator stored with the record, if any.
    fn decode(&self, payload: &[u8], manifest: Option<&str>) -> Result<Self::Item, CodecError>;
}

/// JSON codec over serde for a single concrete type.
///
/// With a manifest configured, encoded records carry it and decoding rejects
/// records whose manifest does not match. Without one, the manifest is
/// ignored on both paths.
#[derive(Debug)]
pub struct JsonCodec<T> {
    manifest: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Creates a codec that ignores manifests.
    pub fn new() -> Self {
        Self { manifest: None, _marker: PhantomData }
    }

    /// Creates a codec that stamps and checks the given manifest.
    pub fn with_manifest(manifest: impl Into<String>) -> Self {
        Self { manifest: Some(manifest.into()), _marker: PhantomData }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = T;

    fn encode(&self, item: &T) -> Result<Encoded, CodecError> {
        let payload = serde_json::to_vec(item).map_err(|e| CodecError::encode(e.to_string()))?;
        Ok(Encoded { payload: Bytes::from(payload), manifest: self.manifest.clone() })
    }

    fn decode(&self, payload: &[u8], manifest: Option<&str>) -> Result<T, CodecError> {
        if let Some(expected) = &self.manifest {
            if manifest != Some(expected.as_str()) {
                return Err(CodecError::ManifestMismatch {
                    expected: expected.clone(),
                    found: manifest.map(str::to_owned),
                });
            }
        }
        serde_json::from_slice(payload).map_err(|e| CodecError::decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        item: String,
    }

    #[test]
    fn json_round_trip() {
        let codec = JsonCodec::<Order>::new();
        let order = Order { id: 7, item: "widget".to_string() };

        let encoded = codec.encode(&order).unwrap();
        assert!(encoded.manifest.is_none());

        let decoded = codec.decode(&encoded.payload, None).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn manifest_stamped_and_checked() {
        let codec = JsonCodec::<Order>::with_manifest("order.v1");
        let order = Order { id: 1, item: "bolt".to_string() };

        let encoded = codec.encode(&order).unwrap();
        assert_eq!(encoded.manifest.as_deref(), Some("order.v1"));

        assert!(codec.decode(&encoded.payload, Some("order.v1")).is_ok());

        let err = codec.decode(&encoded.payload, Some("order.v2")).unwrap_err();
        assert!(matches!(err, CodecError::ManifestMismatch { .. }));

        let err = codec.decode(&encoded.payload, None).unwrap_err();
        assert!(matches!(err, CodecError::ManifestMismatch { found: None, .. }));
    }

    #[test]
    fn malformed_payload_is_decode_error() {
        let codec = JsonCodec::<Order>::new();
        let err = codec.decode(b"not json", None).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }
}
