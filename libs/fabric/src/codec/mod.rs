use prost::Message;

use crate::error::Result;

pub mod protobuf;

pub use self::protobuf::ProtobufCodec;

/// Codec trait for serializing and deserializing messages
pub trait Codec: Send + Sync {
    /// Encode a message into bytes
    fn encode<M: Message>(&self, message: &M) -> Result<Vec<u8>>;

    /// Decode bytes into a message
    fn decode<M: Message + Default>(&self, bytes: &[u8]) -> Result<M>;
}
