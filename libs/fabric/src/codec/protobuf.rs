use prost::Message;

use crate::codec::Codec;
use crate::error::Result;

/// Protocol buffer codec
///
/// Produces the bare message encoding; length framing is the transport's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufCodec;

impl Codec for ProtobufCodec {
    fn encode<M: Message>(&self, message: &M) -> Result<Vec<u8>> {
        Ok(message.encode_to_vec())
    }

    fn decode<M: Message + Default>(&self, bytes: &[u8]) -> Result<M> {
        Ok(M::decode(bytes)?)
    }
}
