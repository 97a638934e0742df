mod config;
mod connection;
mod events;
mod protocol;
mod signaling;
mod stats;
mod tracking;
mod transport;

pub use config::TransportConfig;
pub use connection::{ConnectionState, PeerConnection, PeerId};
pub use events::{LeaveReason, SignalingState, TransportEvent};
pub use protocol::{
    Datagram, DatagramBody, DatagramHeader, EntityDelta, EntitySnapshot,
    EntityUpdateData, FullGameState, HealthSnapshot, MAX_DATAGRAM_SIZE, MessagePayload,
    MessageType, NetworkMessage, PROTOCOL_MAGIC, PROTOCOL_VERSION, PacketError, PeerMapping,
    PlayerInputData, PlayerSnapshot, Priority, sequence_greater_than,
};
pub use signaling::{
    IceCandidate, SessionDescription, SetupRole, SignalType, SignalingBlob, SignalingError,
    gather_candidates,
};
pub use stats::{NetworkStats, random_hex};
pub use tracking::{ReceiveTracker, RttEstimator};
pub use transport::{Transport, TransportError, unix_millis};
