use std::fmt;

use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const MAX_DATAGRAM_SIZE: usize = 60_000;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x504C_4E4B;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

/// Closed set of message tags carried in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    PlayerJoin,
    PlayerLeave,
    FullGameState,
    EntityUpdate,
    PlayerInput,
    Chat,
    Ping,
    Pong,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlayerJoin => "PLAYER_JOIN",
            Self::PlayerLeave => "PLAYER_LEAVE",
            Self::FullGameState => "FULL_GAME_STATE",
            Self::EntityUpdate => "ENTITY_UPDATE",
            Self::PlayerInput => "PLAYER_INPUT",
            Self::Chat => "CHAT",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }

    /// Default batching class for the tag.
    pub fn priority(self) -> Priority {
        match self {
            Self::PlayerJoin | Self::PlayerLeave | Self::FullGameState => Priority::Critical,
            Self::PlayerInput => Priority::High,
            Self::EntityUpdate => Priority::Medium,
            Self::Chat | Self::Ping | Self::Pong => Priority::Low,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering hint for the outgoing batch. Not a delivery guarantee.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Archive, Serialize, Deserialize,
)]
#[rkyv(derive(Debug))]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct HealthSnapshot {
    pub current: f32,
    pub max: f32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerSnapshot {
    pub name: String,
    pub peer_id: Option<String>,
    pub network_id: Option<u32>,
    pub head_position: [f32; 3],
    pub head_rotation: [f32; 4],
}

/// Serializable projection of one entity. Positions and rotations travel at
/// full precision so ownership and pose survive a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntitySnapshot {
    pub entity_id: u32,
    pub kind: u8,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub velocity: Option<[f32; 3]>,
    pub model_id: Option<u32>,
    pub frame: Option<u32>,
    pub health: Option<HealthSnapshot>,
    pub spawn_marker: bool,
    pub player: Option<PlayerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityDelta {
    pub entity_id: u32,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub velocity: Option<[f32; 3]>,
    pub model_id: Option<u32>,
    pub frame: Option<u32>,
    pub head_position: Option<[f32; 3]>,
    pub head_rotation: Option<[f32; 4]>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityUpdateData {
    pub updates: Vec<EntityDelta>,
    /// Input sequence the host processed to produce these poses.
    pub input_sequence: Option<u32>,
    pub authoritative: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PeerMapping {
    pub peer_id: String,
    pub network_id: u32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct FullGameState {
    pub session_id: String,
    pub host_peer_id: String,
    pub entities: Vec<EntitySnapshot>,
    pub peers: Vec<PeerMapping>,
    /// Identifies one send of the state; a resend uses a newer id.
    pub transfer_id: u32,
    pub chunk_index: u32,
    pub chunk_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerInputData {
    pub sequence: u32,
    pub keys: u16,
    pub mouse_dx: f32,
    pub mouse_dy: f32,
    pub dt: f32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum MessagePayload {
    PlayerJoin { player: EntitySnapshot },
    PlayerLeave { peer_id: String, network_id: u32 },
    FullGameState(FullGameState),
    EntityUpdate(EntityUpdateData),
    PlayerInput(PlayerInputData),
    Chat { sender: String, text: String },
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
}

impl MessagePayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::PlayerJoin { .. } => MessageType::PlayerJoin,
            Self::PlayerLeave { .. } => MessageType::PlayerLeave,
            Self::FullGameState(_) => MessageType::FullGameState,
            Self::EntityUpdate(_) => MessageType::EntityUpdate,
            Self::PlayerInput(_) => MessageType::PlayerInput,
            Self::Chat { .. } => MessageType::Chat,
            Self::Ping { .. } => MessageType::Ping,
            Self::Pong { .. } => MessageType::Pong,
        }
    }
}

/// Envelope for one logical event on the data channel.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct NetworkMessage {
    pub priority: Priority,
    pub sequence_number: u32,
    pub timestamp: u64,
    pub payload: MessagePayload,
}

impl NetworkMessage {
    pub fn new(sequence_number: u32, timestamp: u64, payload: MessagePayload) -> Self {
        Self {
            priority: payload.message_type().priority(),
            sequence_number,
            timestamp,
            payload,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct DatagramHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
}

impl DatagramHeader {
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

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum DatagramBody {
    /// Connectivity check from the host, carrying the identity it assigned.
    Hello {
        token: String,
        host_peer_id: String,
        assigned_peer_id: String,
    },
    HelloAck {
        token: String,
    },
    Batch(Vec<NetworkMessage>),
    Close,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Datagram {
    pub header: DatagramHeader,
    pub body: DatagramBody,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Datagram {
    pub fn new(header: DatagramHeader, body: DatagramBody) -> Self {
        Self { header, body }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(PacketError::Deserialize)
    }
}

/// Encoded size of a message when batched on its own, used to split batches.
pub fn encoded_len(message: &NetworkMessage) -> Result<usize, PacketError> {
    rkyv::to_bytes::<rancor::Error>(message)
        .map(|bytes| bytes.len())
        .map_err(PacketError::Serialize)
}
