use rkyv::{rancor, Archive, Deserialize, Serialize};

use crate::sync::{PartFrame, RecordFrame};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 2;
pub const PROTOCOL_MAGIC: u32 = 0x5348_4C4C;
pub const DEFAULT_PORT: u16 = 27016;
pub const DEFAULT_TICK_RATE: u32 = 30;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum SyncMessage {
    Spawn {
        net_id: u64,
        owner: u64,
        is_player: bool,
        position: [f32; 3],
    },
    Despawn {
        net_id: u64,
    },
    /// Observers drop a `version` that is not newer than the last applied.
    State {
        net_id: u64,
        version: u32,
        record: RecordFrame,
        forced: bool,
    },
    Parts {
        net_id: u64,
        version: u32,
        entries: Vec<PartFrame>,
    },
    DataStrings {
        net_id: u64,
        player_name: String,
        blueprint: String,
    },
    Identity {
        net_id: u64,
        entity_id: String,
    },
    Tractor {
        net_id: u64,
        target: Option<u64>,
    },
    AbilityCosmetic {
        net_id: u64,
        location: [f32; 2],
        victim: [f32; 3],
    },
    RequestDataStrings {
        net_id: u64,
    },
    RequestIdentity {
        net_id: u64,
    },
    ForceUpdate {
        net_id: u64,
    },
    RequestTractor {
        net_id: u64,
        target: Option<u64>,
    },
    ChangeDirection {
        net_id: u64,
        direction: [f32; 3],
    },
    ExecuteAbility {
        net_id: u64,
        location: [f32; 2],
        target: [f32; 3],
    },
    VendorPurchase {
        net_id: u64,
        index: u32,
        vendor: u64,
    },
}

impl SyncMessage {
    pub fn net_id(&self) -> u64 {
        match self {
            Self::Spawn { net_id, .. }
            | Self::Despawn { net_id }
            | Self::State { net_id, .. }
            | Self::Parts { net_id, .. }
            | Self::DataStrings { net_id, .. }
            | Self::Identity { net_id, .. }
            | Self::Tractor { net_id, .. }
            | Self::AbilityCosmetic { net_id, .. }
            | Self::RequestDataStrings { net_id }
            | Self::RequestIdentity { net_id }
            | Self::ForceUpdate { net_id }
            | Self::RequestTractor { net_id, .. }
            | Self::ChangeDirection { net_id, .. }
            | Self::ExecuteAbility { net_id, .. }
            | Self::VendorPurchase { net_id, .. } => *net_id,
        }
    }

    /// Whether only the authority may originate this message.
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. }
                | Self::Despawn { .. }
                | Self::State { .. }
                | Self::Parts { .. }
                | Self::DataStrings { .. }
                | Self::Identity { .. }
                | Self::Tractor { .. }
                | Self::AbilityCosmetic { .. }
        )
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PacketError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(PacketError::Deserialize)
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    ConnectionRequest {
        player_name: String,
        blueprint: String,
    },
    ConnectionAccepted {
        session_id: u64,
        faction_count: i32,
    },
    ConnectionDenied {
        reason: String,
    },
    Sync(SyncMessage),
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Disconnect,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("packet of {0} bytes exceeds the transport limit")]
    TooLarge(usize),
    #[error("bad magic or protocol version")]
    BadHeader,
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let packet =
            rkyv::from_bytes::<Self, rancor::Error>(data).map_err(PacketError::Deserialize)?;
        if !packet.header.is_valid() {
            return Err(PacketError::BadHeader);
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::StateRecord;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn state_message_survives_the_wire() {
        let record = StateRecord::seed(4, 1);
        let message = SyncMessage::State {
            net_id: 9,
            version: 1,
            record: RecordFrame::from(&record),
            forced: true,
        };
        let packet = Packet::new(PacketHeader::new(3), PacketType::Sync(message.clone()));

        let bytes = packet.serialize().unwrap();
        assert!(bytes.len() <= MAX_PACKET_SIZE);

        let decoded = Packet::deserialize(&bytes).unwrap();
        assert_eq!(decoded.header.sequence, 3);
        assert_eq!(decoded.payload, PacketType::Sync(message));
    }

    #[test]
    fn foreign_header_is_rejected() {
        let mut header = PacketHeader::new(1);
        header.magic = 0xDEAD_BEEF;
        let bytes = Packet::new(header, PacketType::Disconnect)
            .serialize()
            .unwrap();
        assert!(matches!(
            Packet::deserialize(&bytes),
            Err(PacketError::BadHeader)
        ));
    }

    #[test]
    fn requests_are_not_authoritative() {
        assert!(!SyncMessage::ForceUpdate { net_id: 1 }.is_authoritative());
        assert!(SyncMessage::Despawn { net_id: 1 }.is_authoritative());
    }
}
