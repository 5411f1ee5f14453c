use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::codes::{FailType, SuccessType};
use super::types::{ConnectionId, PacketHeader, ProcessId, RoomId, WorldIndex};

/// Every packet on the wire, discriminated by its `type` string.
///
/// The adjacently tagged layout gives the text encoding
/// `{"type": "...", "data": {...}}` frames and lets the compact binary
/// encoding serialize payload fields positionally while the decoder still
/// dispatches on the tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Packet {
    /// First server frame after accept, carrying the assigned connection id.
    #[serde(rename = "HandshakePacket")]
    Handshake {
        header: PacketHeader,
        connection_id: ConnectionId,
    },
    /// Client request to join a room (a fresh one is picked when omitted).
    #[serde(rename = "JoinGamePacket")]
    JoinGame {
        header: PacketHeader,
        #[serde(default)]
        room_id: Option<RoomId>,
        player_name: String,
    },
    /// Client request to leave its current room.
    #[serde(rename = "LeaveGamePacket")]
    LeaveGame { header: PacketHeader },
    /// Delta-synchronization frame: only the changed fields of one entity.
    #[serde(rename = "SyncPacket")]
    Sync {
        header: PacketHeader,
        entity_type: String,
        data: serde_json::Map<String, serde_json::Value>,
    },
    #[serde(rename = "SuccessPacket")]
    Success {
        header: PacketHeader,
        message: String,
        success_type: SuccessType,
    },
    #[serde(rename = "FailedPacket")]
    Failed {
        header: PacketHeader,
        reason: String,
        fail_type: FailType,
    },
    /// Cross-process envelope; `process_id` identifies the pushing process so
    /// it can discard its own echo.
    #[serde(rename = "InterprocessPacket")]
    Interprocess {
        header: PacketHeader,
        process_id: ProcessId,
        inner: Box<Packet>,
    },
    /// Application payload scoped to one room.
    #[serde(rename = "RoomPacket")]
    Room {
        header: PacketHeader,
        room_id: RoomId,
        data: serde_json::Value,
    },
    /// Movement intent for one world object.
    #[serde(rename = "MoveIntentPacket")]
    MoveIntent {
        header: PacketHeader,
        world_index: WorldIndex,
        instance_id: Uuid,
        dx: f32,
        dy: f32,
    },
}

impl Packet {
    /// The `type` discriminator string as it appears on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "HandshakePacket",
            Self::JoinGame { .. } => "JoinGamePacket",
            Self::LeaveGame { .. } => "LeaveGamePacket",
            Self::Sync { .. } => "SyncPacket",
            Self::Success { .. } => "SuccessPacket",
            Self::Failed { .. } => "FailedPacket",
            Self::Interprocess { .. } => "InterprocessPacket",
            Self::Room { .. } => "RoomPacket",
            Self::MoveIntent { .. } => "MoveIntentPacket",
        }
    }

    pub fn header(&self) -> &PacketHeader {
        match self {
            Self::Handshake { header, .. }
            | Self::JoinGame { header, .. }
            | Self::LeaveGame { header }
            | Self::Sync { header, .. }
            | Self::Success { header, .. }
            | Self::Failed { header, .. }
            | Self::Interprocess { header, .. }
            | Self::Room { header, .. }
            | Self::MoveIntent { header, .. } => header,
        }
    }

    pub fn header_mut(&mut self) -> &mut PacketHeader {
        match self {
            Self::Handshake { header, .. }
            | Self::JoinGame { header, .. }
            | Self::LeaveGame { header }
            | Self::Sync { header, .. }
            | Self::Success { header, .. }
            | Self::Failed { header, .. }
            | Self::Interprocess { header, .. }
            | Self::Room { header, .. }
            | Self::MoveIntent { header, .. } => header,
        }
    }

    /// Stamp the recipient into the header before delivery.
    pub fn set_receiver(&mut self, receiver: ConnectionId) {
        self.header_mut().receiver = Some(receiver);
    }

    pub fn success(message: impl Into<String>, success_type: SuccessType) -> Self {
        Self::Success {
            header: PacketHeader::from_server(),
            message: message.into(),
            success_type,
        }
    }

    pub fn failed(reason: impl Into<String>, fail_type: FailType) -> Self {
        Self::Failed {
            header: PacketHeader::from_server(),
            reason: reason.into(),
            fail_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_matches_type_name() {
        let packet = Packet::success("ok", SuccessType::Generic);
        let json: serde_json::Value = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["type"], packet.type_name());
        assert_eq!(json["data"]["message"], "ok");
    }

    #[test]
    fn receiver_is_omitted_until_set() {
        let mut packet = Packet::LeaveGame {
            header: PacketHeader::from_server(),
        };
        let json = serde_json::to_string(&packet).unwrap();
        assert!(!json.contains("receiver"));

        let target = Uuid::new_v4();
        packet.set_receiver(target);
        assert_eq!(packet.header().receiver, Some(target));
    }

    #[test]
    fn interprocess_wraps_inner_packet() {
        let inner = Packet::failed("nope", FailType::RoomNotFound);
        let envelope = Packet::Interprocess {
            header: PacketHeader::from_server(),
            process_id: Uuid::new_v4(),
            inner: Box::new(inner.clone()),
        };

        let json = serde_json::to_string(&envelope).unwrap();
        let back: Packet = serde_json::from_str(&json).unwrap();
        match back {
            Packet::Interprocess { inner: got, .. } => assert_eq!(*got, inner),
            other => panic!("expected InterprocessPacket, got {}", other.type_name()),
        }
    }
}
