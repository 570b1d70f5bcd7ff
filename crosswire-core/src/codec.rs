//! Message serialization codecs.
//!
//! A codec turns typed messages into wire bytes and back, and is identified
//! by a name that appears in content-type headers (e.g.
//! `application/connect+json`). Two codecs ship with the crate:
//! - [`JsonCodec`]: JSON via serde_json
//! - [`ProtoCodec`]: binary protobuf via prost

use bytes::Bytes;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialization failure raised by a [`Codec`].
#[derive(Clone, Debug, thiserror::Error)]
pub enum CodecError {
    /// Message serialization failed.
    #[error("serialization failed: {0}")]
    Serialize(String),

    /// Message deserialization failed.
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

/// A named message serializer/deserializer.
///
/// Both operations are pure with respect to the message being converted.
/// Clients are generic over their codec, so implementations dispatch
/// statically.
pub trait Codec: Clone + Send + Sync + 'static {
    /// The codec name used in content-type headers (e.g., "json", "proto").
    fn name(&self) -> &'static str;

    /// Serialize a typed message into bytes.
    fn serialize<M>(&self, message: &M) -> Result<Bytes, CodecError>
    where
        M: Message + Serialize;

    /// Deserialize a typed message from bytes.
    fn deserialize<M>(&self, bytes: &[u8]) -> Result<M, CodecError>
    where
        M: Message + DeserializeOwned + Default;
}

/// JSON codec backed by serde_json.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize<M>(&self, message: &M) -> Result<Bytes, CodecError>
    where
        M: Message + Serialize,
    {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| CodecError::Serialize(e.to_string()))
    }

    fn deserialize<M>(&self, bytes: &[u8]) -> Result<M, CodecError>
    where
        M: Message + DeserializeOwned + Default,
    {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}

/// Binary protobuf codec backed by prost.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtoCodec;

impl Codec for ProtoCodec {
    fn name(&self) -> &'static str {
        "proto"
    }

    fn serialize<M>(&self, message: &M) -> Result<Bytes, CodecError>
    where
        M: Message + Serialize,
    {
        Ok(Bytes::from(message.encode_to_vec()))
    }

    fn deserialize<M>(&self, bytes: &[u8]) -> Result<M, CodecError>
    where
        M: Message + DeserializeOwned + Default,
    {
        M::decode(bytes).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}
