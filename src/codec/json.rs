use bytes::Bytes;

use super::{CodecError, PacketCodec};
use crate::protocol::Packet;

/// Field-named text encoding. Frames are UTF-8 JSON objects of the shape
/// `{"type": "<discriminator>", "data": {...}}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PacketCodec for JsonCodec {
    fn encode(&self, packet: &Packet) -> Result<Bytes, CodecError> {
        serde_json::to_vec(packet)
            .map(Bytes::from)
            .map_err(|err| CodecError::Encode {
                packet_type: packet.type_name(),
                source: err.into(),
            })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet, CodecError> {
        serde_json::from_slice(bytes).map_err(|err| CodecError::Decode(err.into()))
    }

    fn is_binary(&self) -> bool {
        false
    }
}
