use bytes::Bytes;

use super::{CodecError, PacketCodec};
use crate::protocol::Packet;

/// Compact binary encoding. Payload structs are serialized as positional
/// MessagePack arrays; only the `type` discriminator travels as a string, so
/// the decoder can still dispatch to the concrete layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl PacketCodec for BinaryCodec {
    fn encode(&self, packet: &Packet) -> Result<Bytes, CodecError> {
        rmp_serde::to_vec(packet)
            .map(Bytes::from)
            .map_err(|err| CodecError::Encode {
                packet_type: packet.type_name(),
                source: err.into(),
            })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|err| CodecError::Decode(err.into()))
    }

    fn is_binary(&self) -> bool {
        true
    }
}
