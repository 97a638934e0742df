pub mod net;
pub mod session;
pub mod simulation;
pub mod snapshot;
pub mod sync;

pub use net::{
    LeaveReason, MessagePayload, MessageType, NetworkMessage, NetworkStats, PacketError, PeerId,
    Priority, SignalingState, Transport, TransportConfig, TransportError, TransportEvent,
};
pub use session::{NetworkId, PeerDirectory, Role, Session, SessionConfig, SessionMode};
pub use simulation::{InputKeys, InputSnapshot, Level, MouseDelta, MovementModel};
pub use snapshot::{Entity, EntityHandle, EntityKind, Transform, World};
pub use sync::{NetworkComponent, SyncConfig};
