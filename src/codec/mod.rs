//! Wire codecs for the packet protocol.
//!
//! Two encodings are supported: a field-named text encoding (JSON) and a
//! compact binary encoding (positional MessagePack). The router and portals
//! depend only on the [`PacketCodec`] contract, so either can be plugged in
//! per endpoint.

mod binary;
mod json;

pub use binary::BinaryCodec;
pub use json::JsonCodec;

use bytes::Bytes;

use crate::protocol::Packet;

/// Codec failures; malformed inbound frames are logged and dropped by the
/// dispatcher, the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {packet_type}: {source}")]
    Encode {
        packet_type: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to decode frame: {0}")]
    Decode(#[source] anyhow::Error),
}

/// Encode/decode contract between the transport, router and bridge.
pub trait PacketCodec: Send + Sync {
    fn encode(&self, packet: &Packet) -> Result<Bytes, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Packet, CodecError>;

    /// Whether encoded frames should be written as binary transport frames.
    fn is_binary(&self) -> bool;
}
